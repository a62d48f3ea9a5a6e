//! HTTP/WebSocket Gateway
//!
//! Transport surface over the orchestration core:
//! - REST: auth, catalog browsing, request/response chat, history
//! - WebSocket: incremental `StreamUnit` delivery with disconnect
//!   cancellation
//!
//! All wire framing and serialization happens here; the core only sees
//! `TaskRequest` in and results/units out.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, Request, State, WebSocketUpgrade,
    },
    http::{header::AUTHORIZATION, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::catalog::{AgentCatalog, AgentCategory, AgentProfile};
use crate::config::Config;
use crate::conversation::{ConversationStore, StoreError};
use crate::formats::{FormatRegistry, ResponseFormat};
use crate::orchestrator::{AgentResult, OrchestrateError, Orchestrator, TaskRequest};
use crate::provider::build_provider;
use crate::users::{AuthError, AuthService, Claims, User};

/// Shared gateway state
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub auth: Arc<AuthService>,
    pub conversations: Arc<ConversationStore>,
}

/// Gateway error responses
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(&'static str),
    Internal(String),
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidCredentials
            | AuthError::TokenExpired
            | AuthError::InvalidToken => Self::Unauthorized(e.to_string()),
            AuthError::UsernameTaken | AuthError::WeakPassword => Self::BadRequest(e.to_string()),
            AuthError::UserNotFound => Self::NotFound("user not found"),
            AuthError::Internal(msg) => Self::Internal(msg),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<OrchestrateError> for ApiError {
    fn from(e: OrchestrateError) -> Self {
        Self::BadRequest(e.to_string())
    }
}

/// Error response format
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg.to_string()),
            Self::Internal(msg) => {
                warn!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };

        let body = Json(ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message,
        });

        (status, body).into_response()
    }
}

// ===== Auth =====

#[derive(Debug, Deserialize)]
struct CredentialsRequest {
    username: String,
    password: String,
}

/// User info safe to expose
#[derive(Debug, Serialize)]
struct UserInfo {
    id: String,
    username: String,
}

impl From<&User> for UserInfo {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    token: String,
    user: UserInfo,
}

async fn register_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CredentialsRequest>,
) -> Result<Json<UserInfo>, ApiError> {
    let user = state.auth.register(&req.username, &req.password)?;
    Ok(Json(UserInfo::from(&user)))
}

async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CredentialsRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let (user, token) = state.auth.login(&req.username, &req.password)?;
    Ok(Json(LoginResponse {
        token,
        user: UserInfo::from(&user),
    }))
}

/// Bearer-token middleware; inserts validated claims into extensions
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;

    let claims = state.auth.validate_token(token)?;
    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}

// ===== Catalog =====

async fn list_agents_handler(State(state): State<Arc<AppState>>) -> Json<Vec<AgentProfile>> {
    Json(state.orchestrator.catalog().list().to_vec())
}

async fn get_agent_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<AgentProfile>, ApiError> {
    state
        .orchestrator
        .catalog()
        .profile(&id)
        .cloned()
        .map(Json)
        .ok_or(ApiError::NotFound("unknown agent"))
}

async fn get_format_handler(
    State(state): State<Arc<AppState>>,
    Path(category): Path<String>,
) -> Result<Json<ResponseFormat>, ApiError> {
    let category =
        AgentCategory::parse(&category).ok_or(ApiError::NotFound("unknown category"))?;

    state
        .orchestrator
        .formats()
        .format_for(category)
        .cloned()
        .map(Json)
        .ok_or(ApiError::NotFound("no format for category"))
}

// ===== Chat =====

#[derive(Debug, Serialize)]
struct ChatResponse {
    /// Persisted conversation, when saving succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    conversation_id: Option<String>,
    results: Vec<AgentResult>,
}

async fn chat_handler(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Json(mut request): Json<TaskRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    request.user_id = Some(claims.sub.clone());

    let results = state.orchestrator.execute(&request).await?;

    // Persistence failure is logged, never surfaced as a chat failure
    let conversation_id = match state.conversations.save(&claims.sub, &request.task, &results) {
        Ok(id) => Some(id),
        Err(e) => {
            warn!("Failed to persist conversation: {}", e);
            None
        }
    };

    Ok(Json(ChatResponse {
        conversation_id,
        results,
    }))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<usize>,
}

async fn list_conversations_handler(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<ListParams>,
) -> Result<Response, ApiError> {
    let limit = params.limit.unwrap_or(20).min(100);
    let listing = state.conversations.list_for_user(&claims.sub, limit)?;
    Ok(Json(listing).into_response())
}

async fn get_conversation_handler(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let conversation = state
        .conversations
        .get(&id, &claims.sub)?
        .ok_or(ApiError::NotFound("conversation not found"))?;
    Ok(Json(conversation).into_response())
}

// ===== WebSocket streaming =====

#[derive(Debug, Deserialize)]
struct WsParams {
    /// Browsers cannot set headers on websocket upgrade; token rides the
    /// query string instead
    token: Option<String>,
}

async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let claims = match params.token.as_deref().map(|t| state.auth.validate_token(t)) {
        Some(Ok(claims)) => claims,
        _ => return ApiError::Unauthorized("missing or invalid token".to_string()).into_response(),
    };

    ws.on_upgrade(move |socket| handle_chat_socket(socket, state, claims))
}

/// Drive one websocket chat: first text frame is the task request, then
/// every `StreamUnit` goes out as a JSON frame until all agents finish.
/// Client disconnect cancels the whole in-flight request set.
async fn handle_chat_socket(mut socket: WebSocket, state: Arc<AppState>, claims: Claims) {
    let mut request: TaskRequest = loop {
        match socket.recv().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str(text.as_str()) {
                Ok(request) => break request,
                Err(e) => {
                    let frame = serde_json::json!({ "error": format!("invalid request: {}", e) });
                    let _ = socket.send(Message::Text(frame.to_string().into())).await;
                    return;
                }
            },
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
            Some(Ok(_)) => continue,
        }
    };

    request.user_id = Some(claims.sub.clone());
    info!(user = %claims.sub, agents = request.agent_ids.len(), "WebSocket chat started");

    let (handle, mut units) = match state.orchestrator.stream(&request) {
        Ok(pair) => pair,
        Err(e) => {
            let frame = serde_json::json!({ "error": e.to_string() });
            let _ = socket.send(Message::Text(frame.to_string().into())).await;
            return;
        }
    };

    loop {
        tokio::select! {
            unit = units.recv() => match unit {
                Some(unit) => {
                    let frame = serde_json::to_string(&unit).unwrap_or_default();
                    if socket.send(Message::Text(frame.into())).await.is_err() {
                        handle.cancel();
                        return;
                    }
                }
                // Every agent has emitted its terminal unit
                None => break,
            },
            msg = socket.recv() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    handle.cancel();
                    return;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    let _ = socket.send(Message::Close(None)).await;
}

// ===== Misc =====

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ===== Router / entry =====

/// Build the gateway router over shared state
pub fn router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/api/conversations", get(list_conversations_handler))
        .route("/api/conversations/{id}", get(get_conversation_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/auth/register", post(register_handler))
        .route("/api/auth/login", post(login_handler))
        .route("/api/agents", get(list_agents_handler))
        .route("/api/agents/{id}", get(get_agent_handler))
        .route("/api/categories/{category}/format", get(get_format_handler))
        .route("/ws/chat", get(ws_handler))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Assemble all components from config and serve until shutdown
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let formats = Arc::new(FormatRegistry::builtin());
    let catalog = Arc::new(AgentCatalog::builtin(&formats)?);
    let provider = build_provider(&config.provider);

    let orchestrator = Arc::new(Orchestrator::new(catalog, formats, provider));
    let auth = Arc::new(AuthService::open(&config.db_path, &config.jwt_secret)?);
    let conversations = Arc::new(ConversationStore::open(&config.db_path)?);

    let state = Arc::new(AppState {
        orchestrator,
        auth,
        conversations,
    });

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("AgentHub listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
