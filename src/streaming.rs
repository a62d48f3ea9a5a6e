//! Streaming Pipeline
//!
//! Incremental delivery of orchestrator output: one logical channel of
//! `StreamUnit`s across all agents. Units from different agents interleave
//! in arrival order; within one agent, sequence numbers are strictly
//! increasing and end with exactly one terminal unit carrying the final
//! status and section breakdown.
//!
//! Deltas always stream under the "raw" section sentinel; section
//! classification happens once, from the accumulated text, on the terminal
//! unit. Cancellation is cooperative: a shared handle flag plus the
//! consumer dropping the receiver both stop upstream consumption.

use futures_util::StreamExt;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::catalog::AgentProfile;
use crate::formats::{word_count, FormatRegistry, SectionContent, RAW_SECTION};
use crate::orchestrator::{
    build_completion_request, split_by_format, AgentStatus, OrchestrateError, Orchestrator,
    TaskRequest,
};
use crate::provider::{ChunkStream, CompletionProvider, CompletionRequest, ProviderError};

/// Channel capacity between agent workers and the consumer
const STREAM_BUFFER: usize = 64;

/// One unit of streamed output
#[derive(Debug, Clone, Serialize)]
pub struct StreamUnit {
    pub agent_id: String,
    /// Section id; "raw" until boundaries are known
    pub section: String,
    /// Text delta (empty on terminal units)
    pub delta: String,
    /// Per-agent sequence number, strictly increasing from 0
    pub seq: u64,
    /// Last unit this agent will emit
    pub terminal: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AgentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sections: Option<Vec<SectionContent>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StreamUnit {
    fn delta(agent_id: &str, seq: u64, text: String) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            section: RAW_SECTION.to_string(),
            delta: text,
            seq,
            terminal: false,
            status: None,
            sections: None,
            error: None,
        }
    }

    fn terminal(
        agent_id: &str,
        seq: u64,
        status: AgentStatus,
        sections: Vec<SectionContent>,
        error: Option<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            section: RAW_SECTION.to_string(),
            delta: String::new(),
            seq,
            terminal: true,
            status: Some(status),
            sections: Some(sections),
            error,
        }
    }
}

/// Handle for cancelling an in-flight streaming request as a unit
#[derive(Clone)]
pub struct StreamHandle {
    cancelled: Arc<AtomicBool>,
}

impl StreamHandle {
    fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Signal every agent worker to stop consuming upstream
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Orchestrator {
    /// Stream the task's output incrementally across all selected agents.
    ///
    /// The channel closes once every agent has emitted its terminal unit.
    /// Dropping the receiver, or calling `handle.cancel()`, stops all
    /// in-flight provider streams.
    pub fn stream(
        &self,
        request: &TaskRequest,
    ) -> Result<(StreamHandle, mpsc::Receiver<StreamUnit>), OrchestrateError> {
        if request.agent_ids.is_empty() {
            return Err(OrchestrateError::EmptyAgentList);
        }

        let provider = self.provider_for(request);
        let handle = StreamHandle::new();
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);

        for agent_id in &request.agent_ids {
            let tx = tx.clone();

            match self.catalog().profile(agent_id) {
                None => {
                    let agent_id = agent_id.clone();
                    tokio::spawn(async move {
                        let unit = StreamUnit::terminal(
                            &agent_id,
                            0,
                            AgentStatus::Failed,
                            Vec::new(),
                            Some(format!("unknown agent: {}", agent_id)),
                        );
                        let _ = tx.send(unit).await;
                    });
                }
                Some(profile) => {
                    let profile = profile.clone();
                    let model = request
                        .model
                        .clone()
                        .unwrap_or_else(|| profile.default_model.clone());
                    let completion =
                        build_completion_request(&profile, request, self.formats(), &model);

                    tokio::spawn(run_agent_stream(
                        profile,
                        completion,
                        self.formats_arc(),
                        provider.clone(),
                        tx,
                        handle.clone(),
                    ));
                }
            }
        }

        // Workers own the remaining senders; the channel closes when the
        // last of them finishes
        Ok((handle, rx))
    }
}

/// Open the provider stream, retrying once on a transient failure
async fn open_stream_with_retry(
    provider: &dyn CompletionProvider,
    request: CompletionRequest,
) -> Result<ChunkStream, ProviderError> {
    match provider.stream(request.clone()).await {
        Err(e) if e.is_transient() => {
            warn!(error = %e, "Transient error opening stream, retrying once");
            provider.stream(request).await
        }
        other => other,
    }
}

/// Drive one agent's provider stream to its terminal unit
async fn run_agent_stream(
    profile: AgentProfile,
    completion: CompletionRequest,
    formats: Arc<FormatRegistry>,
    provider: Arc<dyn CompletionProvider>,
    tx: mpsc::Sender<StreamUnit>,
    handle: StreamHandle,
) {
    let agent_id = profile.id.clone();
    let mut seq: u64 = 0;

    let mut chunks = match open_stream_with_retry(provider.as_ref(), completion).await {
        Ok(chunks) => chunks,
        Err(e) => {
            warn!(agent = %agent_id, error = %e, "Agent stream failed to open");
            let unit =
                StreamUnit::terminal(&agent_id, seq, AgentStatus::Failed, Vec::new(), Some(e.to_string()));
            let _ = tx.send(unit).await;
            return;
        }
    };

    let mut buffer = String::new();
    let mut stream_error: Option<ProviderError> = None;

    while let Some(item) = chunks.next().await {
        if handle.is_cancelled() {
            // Request abandoned as a unit; dropping `chunks` closes the
            // upstream connection
            debug!(agent = %agent_id, "Stream cancelled");
            return;
        }

        match item {
            Ok(text) => {
                buffer.push_str(&text);
                let unit = StreamUnit::delta(&agent_id, seq, text);
                seq += 1;
                if tx.send(unit).await.is_err() {
                    // Consumer dropped the receiver
                    return;
                }
            }
            Err(e) => {
                stream_error = Some(e);
                break;
            }
        }
    }

    // Terminal unit: final status plus the section breakdown recovered
    // from the accumulated text. A mid-stream failure keeps the partial
    // content instead of discarding progress.
    let sections = split_by_format(&formats, &profile, &buffer);
    let floor = formats.min_words_for(&profile);

    let status = match &stream_error {
        Some(_) if buffer.is_empty() => AgentStatus::Failed,
        Some(_) => AgentStatus::Partial,
        None if word_count(&buffer) < floor => AgentStatus::Partial,
        None => AgentStatus::Success,
    };

    let unit = StreamUnit::terminal(
        &agent_id,
        seq,
        status,
        sections,
        stream_error.map(|e| e.to_string()),
    );
    let _ = tx.send(unit).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_cancel_flag() {
        let handle = StreamHandle::new();
        assert!(!handle.is_cancelled());

        let clone = handle.clone();
        clone.cancel();
        assert!(handle.is_cancelled());
    }

    #[test]
    fn test_terminal_unit_shape() {
        let unit = StreamUnit::terminal("writer", 3, AgentStatus::Success, Vec::new(), None);

        assert!(unit.terminal);
        assert_eq!(unit.seq, 3);
        assert_eq!(unit.status, Some(AgentStatus::Success));
        assert!(unit.delta.is_empty());
    }

    #[test]
    fn test_delta_unit_uses_raw_section() {
        let unit = StreamUnit::delta("writer", 0, "hello".to_string());

        assert_eq!(unit.section, RAW_SECTION);
        assert!(!unit.terminal);
        assert!(unit.status.is_none());
    }
}
