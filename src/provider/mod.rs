//! Completion Provider Abstraction
//!
//! Provider-agnostic interface to an external text-completion backend.
//! `complete` returns the full text; `stream` returns a lazy, finite,
//! non-restartable sequence of text chunks. A factory maps configuration
//! (backend kind, API key, base URL) to a concrete backend.

pub mod anthropic;
pub mod openai;

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;

/// One message in a completion conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Completion request passed to a provider
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    /// Model name or hint (provider-specific resolution)
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn with_message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Provider failure taxonomy
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(String),

    #[error("authentication rejected by provider")]
    Auth,

    #[error("rate limited by provider")]
    RateLimited,

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("provider API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("no API key configured")]
    MissingApiKey,
}

impl ProviderError {
    /// Whether a retry with unchanged parameters could plausibly succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::RateLimited)
    }

    /// Map an HTTP error status + body to an error variant
    pub(crate) fn from_status(status: u16, body: &str) -> Self {
        match status {
            401 | 403 => Self::Auth,
            // 529 is Anthropic's "overloaded" answer; treat like 429
            429 | 529 => Self::RateLimited,
            _ => Self::Api {
                status,
                message: body.chars().take(500).collect(),
            },
        }
    }
}

/// Lazy chunk sequence; may yield an error mid-stream and then terminate.
/// Text already yielded stays with the consumer (progress is never lost).
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// Capability interface to a completion backend
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Full completion; resolves once the whole response is available
    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError>;

    /// Streaming completion; chunks arrive as the backend produces them
    async fn stream(&self, request: CompletionRequest) -> Result<ChunkStream, ProviderError>;
}

/// Supported backend families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Anthropic,
    /// Any OpenAI-compatible chat-completions endpoint
    OpenAi,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "anthropic" | "claude" => Some(Self::Anthropic),
            "openai" | "openai-compatible" => Some(Self::OpenAi),
            _ => None,
        }
    }
}

/// Backend selection; may arrive per request or from the environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: BackendKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

/// Instantiate the backend a config names. Pure configuration mapping,
/// no network activity.
pub fn build_provider(config: &ProviderConfig) -> Arc<dyn CompletionProvider> {
    match config.kind {
        BackendKind::Anthropic => Arc::new(AnthropicProvider::new(
            config.api_key.clone(),
            config.base_url.clone(),
        )),
        BackendKind::OpenAi => Arc::new(OpenAiProvider::new(
            config.api_key.clone(),
            config.base_url.clone(),
            config.default_model.clone(),
        )),
    }
}

/// Accumulates raw response bytes and yields complete lines.
///
/// SSE frames may split mid-line (and mid-UTF-8 codepoint) across network
/// chunks, so splitting happens on the byte buffer.
pub(crate) struct SseLineBuffer {
    buf: Vec<u8>,
}

impl SseLineBuffer {
    pub(crate) fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Feed a chunk of bytes; returns the complete lines it closed off
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line);
            lines.push(text.trim_end_matches(['\n', '\r']).to_string());
        }
        lines
    }
}

/// Extract the payload of an SSE `data:` line, if it is one
pub(crate) fn sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_request_builder() {
        let request = CompletionRequest::new("sonnet")
            .with_message(ChatMessage::system("You are helpful"))
            .with_message(ChatMessage::user("Hello"))
            .with_temperature(0.7)
            .with_max_tokens(512);

        assert_eq!(request.model, "sonnet");
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.temperature, Some(0.7));
        assert_eq!(request.max_tokens, Some(512));
    }

    #[test]
    fn test_error_transience() {
        assert!(ProviderError::Network("reset".into()).is_transient());
        assert!(ProviderError::RateLimited.is_transient());
        assert!(!ProviderError::Auth.is_transient());
        assert!(!ProviderError::MalformedResponse("bad json".into()).is_transient());
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(ProviderError::from_status(401, ""), ProviderError::Auth));
        assert!(matches!(
            ProviderError::from_status(429, ""),
            ProviderError::RateLimited
        ));
        assert!(matches!(
            ProviderError::from_status(500, "boom"),
            ProviderError::Api { status: 500, .. }
        ));
    }

    #[test]
    fn test_sse_line_buffer_split_chunks() {
        let mut buf = SseLineBuffer::new();

        assert!(buf.push(b"data: {\"a\":").is_empty());
        let lines = buf.push(b"1}\n\ndata: done\n");
        assert_eq!(lines, vec!["data: {\"a\":1}", "", "data: done"]);
    }

    #[test]
    fn test_sse_data_extraction() {
        assert_eq!(sse_data("data: {\"x\":1}"), Some("{\"x\":1}"));
        assert_eq!(sse_data("event: ping"), None);
    }

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!(BackendKind::parse("anthropic"), Some(BackendKind::Anthropic));
        assert_eq!(BackendKind::parse("OpenAI"), Some(BackendKind::OpenAi));
        assert_eq!(BackendKind::parse("mystery"), None);
    }
}
