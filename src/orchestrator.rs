//! Agent Orchestrator
//!
//! Fans one task out to every selected agent concurrently, applies the
//! category format contract to each raw output, and fans the per-agent
//! results back into one list ordered by the request's agent ids.
//!
//! Failure isolation: an unknown id or a provider failure fills that
//! agent's slot with a failed result; it never aborts the batch. Only an
//! empty agent list fails the whole call.

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

use crate::catalog::{AgentCatalog, AgentProfile};
use crate::formats::{word_count, FormatRegistry, SectionContent, RAW_SECTION};
use crate::provider::{
    build_provider, ChatMessage, CompletionProvider, CompletionRequest, ProviderConfig,
    ProviderError,
};

/// Default sampling temperature for agent completions
const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Default response token limit per agent
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Outcome of one agent's run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Content delivered and met the category word floor
    Success,
    /// Content delivered but below the word floor, or truncated mid-stream
    Partial,
    /// No usable content (unknown agent or provider failure)
    Failed,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

/// One agent's slot in the aggregated output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub agent_id: String,
    pub agent_name: String,
    pub status: AgentStatus,
    /// Raw content as returned by the provider
    pub content: String,
    /// Ordered per-section breakdown of `content`
    pub sections: Vec<SectionContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub model: String,
    pub duration_ms: u64,
}

impl AgentResult {
    /// Slot for an id the catalog does not know
    pub fn unknown_agent(agent_id: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            agent_name: agent_id.to_string(),
            status: AgentStatus::Failed,
            content: String::new(),
            sections: Vec::new(),
            error: Some(format!("unknown agent: {}", agent_id)),
            model: String::new(),
            duration_ms: 0,
        }
    }

    /// Slot for a provider failure
    fn failure(profile: &AgentProfile, model: String, error: &ProviderError, started: Instant) -> Self {
        Self {
            agent_id: profile.id.clone(),
            agent_name: profile.name.clone(),
            status: AgentStatus::Failed,
            content: String::new(),
            sections: Vec::new(),
            error: Some(error.to_string()),
            model,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

/// One orchestration request
#[derive(Debug, Clone, Deserialize)]
pub struct TaskRequest {
    /// Task text sent to every selected agent
    pub task: String,
    /// Selected agents; each occurrence runs independently and owns one
    /// slot of the output, in this order
    #[serde(alias = "agents")]
    pub agent_ids: Vec<String>,
    /// Model override; falls back to each profile's default
    #[serde(default)]
    pub model: Option<String>,
    /// Per-request backend selection; falls back to the process default
    #[serde(default)]
    pub provider: Option<ProviderConfig>,
    /// Free-form context, serialized into the user message (sorted keys,
    /// so prompts are deterministic)
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Authenticated user, for logging and persistence only
    #[serde(default)]
    pub user_id: Option<String>,
}

impl TaskRequest {
    pub fn new(task: impl Into<String>, agent_ids: Vec<String>) -> Self {
        Self {
            task: task.into(),
            agent_ids,
            model: None,
            provider: None,
            context: BTreeMap::new(),
            user_id: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// Batch-level failures; everything per-agent lands in result slots instead
#[derive(Debug, Error)]
pub enum OrchestrateError {
    #[error("no agents selected")]
    EmptyAgentList,
}

/// Fan-out/fan-in executor over the catalog, format registry, and a
/// completion provider
pub struct Orchestrator {
    catalog: Arc<AgentCatalog>,
    formats: Arc<FormatRegistry>,
    provider: Arc<dyn CompletionProvider>,
}

impl Orchestrator {
    pub fn new(
        catalog: Arc<AgentCatalog>,
        formats: Arc<FormatRegistry>,
        provider: Arc<dyn CompletionProvider>,
    ) -> Self {
        Self {
            catalog,
            formats,
            provider,
        }
    }

    pub fn catalog(&self) -> &AgentCatalog {
        &self.catalog
    }

    pub fn formats(&self) -> &FormatRegistry {
        &self.formats
    }

    pub(crate) fn formats_arc(&self) -> Arc<FormatRegistry> {
        self.formats.clone()
    }

    /// Resolve the provider for one request: per-request config wins,
    /// otherwise the process-wide default
    pub(crate) fn provider_for(&self, request: &TaskRequest) -> Arc<dyn CompletionProvider> {
        match &request.provider {
            Some(config) => build_provider(config),
            None => self.provider.clone(),
        }
    }

    /// Execute the task on every selected agent concurrently.
    ///
    /// The returned list has one entry per requested agent id, in request
    /// order, independent of completion order.
    pub async fn execute(&self, request: &TaskRequest) -> Result<Vec<AgentResult>, OrchestrateError> {
        if request.agent_ids.is_empty() {
            return Err(OrchestrateError::EmptyAgentList);
        }

        let provider = self.provider_for(request);

        info!(
            agents = request.agent_ids.len(),
            user = request.user_id.as_deref().unwrap_or("-"),
            "Dispatching task to agents"
        );

        // join_all preserves input order, which gives the ordering
        // guarantee for free: slot i belongs to agent_ids[i]
        let futures = request.agent_ids.iter().map(|agent_id| {
            let provider = provider.clone();
            async move {
                match self.catalog.profile(agent_id) {
                    Some(profile) => self.run_agent(profile, request, provider).await,
                    None => {
                        warn!("Requested agent not in catalog: {}", agent_id);
                        AgentResult::unknown_agent(agent_id)
                    }
                }
            }
        });

        Ok(join_all(futures).await)
    }

    /// Run one agent to completion and shape its output
    async fn run_agent(
        &self,
        profile: &AgentProfile,
        request: &TaskRequest,
        provider: Arc<dyn CompletionProvider>,
    ) -> AgentResult {
        let started = Instant::now();
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| profile.default_model.clone());

        let completion = build_completion_request(profile, request, &self.formats, &model);

        let content = match complete_with_retry(provider.as_ref(), completion).await {
            Ok(content) => content,
            Err(e) => {
                warn!(agent = %profile.id, error = %e, "Agent completion failed");
                return AgentResult::failure(profile, model, &e, started);
            }
        };

        let sections = split_by_format(&self.formats, profile, &content);
        let floor = self.formats.min_words_for(profile);
        let status = if word_count(&content) < floor {
            AgentStatus::Partial
        } else {
            AgentStatus::Success
        };

        AgentResult {
            agent_id: profile.id.clone(),
            agent_name: profile.name.clone(),
            status,
            content,
            sections,
            error: None,
            model,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

/// Assemble the provider request for one agent: format-augmented system
/// prompt plus the task and serialized context as the user message
pub(crate) fn build_completion_request(
    profile: &AgentProfile,
    request: &TaskRequest,
    formats: &FormatRegistry,
    model: &str,
) -> CompletionRequest {
    let system = formats.build_prompt(profile.category, &profile.system_prompt);
    let user = compose_user_message(&request.task, &request.context);

    CompletionRequest::new(model)
        .with_message(ChatMessage::system(system))
        .with_message(ChatMessage::user(user))
        .with_temperature(DEFAULT_TEMPERATURE)
        .with_max_tokens(DEFAULT_MAX_TOKENS)
}

/// Task text plus deterministic context serialization
pub(crate) fn compose_user_message(task: &str, context: &BTreeMap<String, String>) -> String {
    if context.is_empty() {
        return task.to_string();
    }

    let mut message = String::from(task);
    message.push_str("\n\nContext:\n");
    for (key, value) in context {
        message.push_str(&format!("- {}: {}\n", key, value));
    }
    message
}

/// Section breakdown via the category's format, raw fallback without one
pub(crate) fn split_by_format(
    formats: &FormatRegistry,
    profile: &AgentProfile,
    content: &str,
) -> Vec<SectionContent> {
    match formats.format_for(profile.category) {
        Some(format) => format.split_sections(content),
        None => vec![SectionContent {
            id: RAW_SECTION.to_string(),
            text: content.trim().to_string(),
        }],
    }
}

/// Call the provider, retrying once (unchanged parameters) when the first
/// failure is transient
pub(crate) async fn complete_with_retry(
    provider: &dyn CompletionProvider,
    request: CompletionRequest,
) -> Result<String, ProviderError> {
    match provider.complete(request.clone()).await {
        Err(e) if e.is_transient() => {
            warn!(error = %e, "Transient provider error, retrying once");
            provider.complete(request).await
        }
        other => other,
    }
}
