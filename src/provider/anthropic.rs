//! Anthropic Messages API backend
//!
//! Non-streaming and SSE-streaming completion against the Messages API.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use super::{
    sse_data, ChatMessage, ChunkStream, CompletionProvider, CompletionRequest, ProviderError,
    SseLineBuffer,
};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic completion backend
pub struct AnthropicProvider {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

/// Message in Messages API shape (system goes in its own field)
#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    r#type: String,
    text: Option<String>,
}

impl AnthropicProvider {
    pub fn new(api_key: Option<String>, base_url: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    /// Resolve a model hint to a concrete model id
    fn model_id(model: &str) -> &str {
        match model.to_lowercase().as_str() {
            "haiku" => "claude-3-5-haiku-20241022",
            "sonnet" => "claude-sonnet-4-20250514",
            "opus" => "claude-opus-4-20250514",
            _ => model,
        }
    }

    /// Split chat messages into the Messages API system/messages shape
    fn convert_messages(messages: &[ChatMessage]) -> (Option<String>, Vec<ApiMessage>) {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == "system")
            .map(|m| m.content.as_str())
            .collect();

        let rest = messages
            .iter()
            .filter(|m| m.role != "system")
            .map(|m| ApiMessage {
                role: m.role.clone(),
                content: m.content.clone(),
            })
            .collect();

        let system = if system.is_empty() {
            None
        } else {
            Some(system.join("\n\n"))
        };

        (system, rest)
    }

    fn build_request(request: &CompletionRequest, stream: bool) -> MessagesRequest {
        let (system, messages) = Self::convert_messages(&request.messages);
        MessagesRequest {
            model: Self::model_id(&request.model).to_string(),
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system,
            messages,
            temperature: request.temperature,
            stream,
        }
    }

    async fn send(
        &self,
        body: &MessagesRequest,
    ) -> Result<reqwest::Response, ProviderError> {
        let api_key = self.api_key.as_ref().ok_or(ProviderError::MissingApiKey)?;
        let url = format!("{}/v1/messages", self.base_url);

        debug!("Calling Anthropic API: model={}", body.model);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), &text));
        }

        Ok(response)
    }

    /// Pull the text delta out of one SSE event, or detect end of stream
    fn parse_event(payload: &str) -> StreamEvent {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(payload) else {
            return StreamEvent::Skip;
        };

        match value["type"].as_str() {
            Some("content_block_delta") => value["delta"]["text"]
                .as_str()
                .map(|t| StreamEvent::Delta(t.to_string()))
                .unwrap_or(StreamEvent::Skip),
            Some("message_stop") => StreamEvent::Done,
            Some("error") => StreamEvent::Failed(ProviderError::Api {
                status: 0,
                message: value["error"]["message"]
                    .as_str()
                    .unwrap_or("stream error")
                    .to_string(),
            }),
            _ => StreamEvent::Skip,
        }
    }
}

enum StreamEvent {
    Delta(String),
    Done,
    Failed(ProviderError),
    Skip,
}

#[async_trait]
impl CompletionProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError> {
        let body = Self::build_request(&request, false);
        let response = self.send(&body).await?;

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        let content = parsed
            .content
            .into_iter()
            .filter_map(|b| if b.r#type == "text" { b.text } else { None })
            .collect::<Vec<_>>()
            .join("\n");

        Ok(content)
    }

    async fn stream(&self, request: CompletionRequest) -> Result<ChunkStream, ProviderError> {
        let body = Self::build_request(&request, true);
        let response = self.send(&body).await?;

        let (tx, rx) = mpsc::channel::<Result<String, ProviderError>>(32);

        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut lines = SseLineBuffer::new();

            'outer: while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx.send(Err(ProviderError::Network(e.to_string()))).await;
                        return;
                    }
                };

                for line in lines.push(&chunk) {
                    let Some(payload) = sse_data(&line) else { continue };
                    match Self::parse_event(payload) {
                        StreamEvent::Delta(text) => {
                            if tx.send(Ok(text)).await.is_err() {
                                // Consumer dropped; stop reading upstream
                                return;
                            }
                        }
                        StreamEvent::Done => break 'outer,
                        StreamEvent::Failed(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                        StreamEvent::Skip => {}
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_hint_resolution() {
        assert!(AnthropicProvider::model_id("haiku").contains("haiku"));
        assert!(AnthropicProvider::model_id("sonnet").contains("sonnet"));
        // Concrete ids pass through untouched
        assert_eq!(
            AnthropicProvider::model_id("claude-3-opus-20240229"),
            "claude-3-opus-20240229"
        );
    }

    #[test]
    fn test_system_messages_lifted() {
        let messages = vec![
            ChatMessage::system("Be terse."),
            ChatMessage::user("Hi"),
            ChatMessage::assistant("Hello"),
        ];

        let (system, rest) = AnthropicProvider::convert_messages(&messages);
        assert_eq!(system.as_deref(), Some("Be terse."));
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].role, "user");
    }

    #[test]
    fn test_parse_delta_event() {
        let payload = r#"{"type":"content_block_delta","delta":{"type":"text_delta","text":"hi"}}"#;
        assert!(matches!(
            AnthropicProvider::parse_event(payload),
            StreamEvent::Delta(t) if t == "hi"
        ));

        assert!(matches!(
            AnthropicProvider::parse_event(r#"{"type":"message_stop"}"#),
            StreamEvent::Done
        ));
    }
}
