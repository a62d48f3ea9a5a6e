//! Shared test fixtures: a scripted completion provider plus small
//! catalog/registry setups mirroring the builtin wiring.
#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::stream;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use agenthub::{
    AgentCatalog, AgentCategory, AgentProfile, ChunkStream, CompletionProvider, CompletionRequest,
    ComplexityTier, FormatRegistry, Orchestrator, ProviderError, ResponseFormat, SectionSpec,
};

/// Scripted reaction to a matched completion request
pub enum MockBehavior {
    Reply(String),
    Fail(ProviderError),
    /// First call fails, the retry succeeds
    FailOnceThenReply(ProviderError, String),
    /// Streamed chunk script; an Err terminates the stream early
    Chunks(Vec<Result<String, ProviderError>>),
    /// Chunk script with a delay before each chunk
    SlowChunks(Duration, Vec<Result<String, ProviderError>>),
}

/// Completion provider driven by (marker, behavior) rules. A rule fires
/// when its marker appears in any message of the request.
pub struct MockProvider {
    rules: Vec<(String, MockBehavior)>,
    counts: Mutex<HashMap<String, usize>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn on(mut self, marker: &str, behavior: MockBehavior) -> Self {
        self.rules.push((marker.to_string(), behavior));
        self
    }

    /// How many times a rule has fired
    pub fn calls(&self, marker: &str) -> usize {
        *self.counts.lock().unwrap().get(marker).unwrap_or(&0)
    }

    fn rule_for(&self, request: &CompletionRequest) -> Option<&(String, MockBehavior)> {
        self.rules.iter().find(|(marker, _)| {
            request
                .messages
                .iter()
                .any(|m| m.content.contains(marker.as_str()))
        })
    }

    /// Record a call; returns the count before this call
    fn bump(&self, marker: &str) -> usize {
        let mut counts = self.counts.lock().unwrap();
        let count = counts.entry(marker.to_string()).or_insert(0);
        let previous = *count;
        *count += 1;
        previous
    }
}

#[async_trait]
impl CompletionProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError> {
        let Some((marker, behavior)) = self.rule_for(&request) else {
            return Err(ProviderError::Api {
                status: 0,
                message: "no mock rule matched".to_string(),
            });
        };
        let previous = self.bump(marker);

        match behavior {
            MockBehavior::Reply(text) => Ok(text.clone()),
            MockBehavior::Fail(e) => Err(e.clone()),
            MockBehavior::FailOnceThenReply(e, text) => {
                if previous == 0 {
                    Err(e.clone())
                } else {
                    Ok(text.clone())
                }
            }
            MockBehavior::Chunks(items) | MockBehavior::SlowChunks(_, items) => {
                let mut out = String::new();
                for item in items {
                    match item {
                        Ok(text) => out.push_str(text),
                        Err(e) => return Err(e.clone()),
                    }
                }
                Ok(out)
            }
        }
    }

    async fn stream(&self, request: CompletionRequest) -> Result<ChunkStream, ProviderError> {
        let Some((marker, behavior)) = self.rule_for(&request) else {
            return Err(ProviderError::Api {
                status: 0,
                message: "no mock rule matched".to_string(),
            });
        };
        let previous = self.bump(marker);

        match behavior {
            MockBehavior::Reply(text) => Ok(Box::pin(stream::iter(vec![Ok(text.clone())]))),
            MockBehavior::Fail(e) => Err(e.clone()),
            MockBehavior::FailOnceThenReply(e, text) => {
                if previous == 0 {
                    Err(e.clone())
                } else {
                    Ok(Box::pin(stream::iter(vec![Ok(text.clone())])))
                }
            }
            MockBehavior::Chunks(items) => Ok(Box::pin(stream::iter(items.clone()))),
            MockBehavior::SlowChunks(delay, items) => {
                let (tx, rx) = mpsc::channel(4);
                let items = items.clone();
                let delay = *delay;
                tokio::spawn(async move {
                    for item in items {
                        tokio::time::sleep(delay).await;
                        if tx.send(item).await.is_err() {
                            return;
                        }
                    }
                });
                Ok(Box::pin(ReceiverStream::new(rx)))
            }
        }
    }
}

/// `n` distinct whitespace-separated words
pub fn words(n: usize) -> String {
    (0..n)
        .map(|i| format!("w{}", i))
        .collect::<Vec<_>>()
        .join(" ")
}

/// The marker the mock should key on for a `test_profile` agent
pub fn marker(id: &str) -> String {
    format!("You are the {} agent.", id)
}

pub fn test_profile(id: &str, category: AgentCategory) -> AgentProfile {
    AgentProfile {
        id: id.to_string(),
        name: format!("{} agent", id),
        category,
        description: String::new(),
        default_model: "sonnet".to_string(),
        system_prompt: marker(id),
        capabilities: Vec::new(),
        tier: ComplexityTier::Intermediate,
    }
}

fn format_with(category: AgentCategory, min_total_words: usize) -> ResponseFormat {
    ResponseFormat {
        category,
        sections: vec![
            SectionSpec {
                id: "summary".to_string(),
                title: "Summary".to_string(),
                required: true,
                min_words: 10,
            },
            SectionSpec {
                id: "findings".to_string(),
                title: "Findings".to_string(),
                required: false,
                min_words: 10,
            },
        ],
        min_total_words,
        supports_code_blocks: false,
        supports_tables: false,
    }
}

/// Registry matching the canonical scenario: analysis floor 100 words,
/// creative floor 50 words
pub fn scenario_registry() -> FormatRegistry {
    FormatRegistry::new(vec![
        format_with(AgentCategory::Analysis, 100),
        format_with(AgentCategory::Creative, 50),
    ])
}

/// Orchestrator over "reasoning" (analysis) and "writer" (creative)
pub fn scenario_orchestrator(provider: Arc<dyn CompletionProvider>) -> Orchestrator {
    let formats = Arc::new(scenario_registry());
    let catalog = Arc::new(
        AgentCatalog::new(
            vec![
                test_profile("reasoning", AgentCategory::Analysis),
                test_profile("writer", AgentCategory::Creative),
            ],
            &formats,
        )
        .unwrap(),
    );
    Orchestrator::new(catalog, formats, provider)
}

/// Same agents with a floor of 1 word, so short streams count as success
pub fn low_floor_orchestrator(provider: Arc<dyn CompletionProvider>) -> Orchestrator {
    let formats = Arc::new(FormatRegistry::new(vec![
        format_with(AgentCategory::Analysis, 1),
        format_with(AgentCategory::Creative, 1),
    ]));
    let catalog = Arc::new(
        AgentCatalog::new(
            vec![
                test_profile("reasoning", AgentCategory::Analysis),
                test_profile("writer", AgentCategory::Creative),
            ],
            &formats,
        )
        .unwrap(),
    );
    Orchestrator::new(catalog, formats, provider)
}
