//! AgentHub
//!
//! Multi-agent chat backend: authenticated users pick agents from a
//! catalog, submit a task, and get per-agent results shaped by
//! category-specific format contracts, aggregated or streamed.
//!
//! # Architecture
//!
//! ```text
//! Client ──► Gateway (axum) ──► Orchestrator ──► Completion Provider
//!              (HTTP/WS)           │                (Anthropic/OpenAI)
//!                                  ├── Agent Catalog (immutable profiles)
//!                                  ├── Format Registry (section contracts)
//!                                  ├── Streaming Pipeline (StreamUnits)
//!                                  └── Stores (users + conversations, SQLite)
//! ```
//!
//! The orchestrator fans one task out to N agents concurrently and fans
//! the results back in request order; per-agent failures fill their slot
//! instead of aborting the batch.

pub mod catalog;
pub mod config;
pub mod conversation;
pub mod formats;
pub mod orchestrator;
pub mod provider;
pub mod server;
pub mod streaming;
pub mod users;

pub use catalog::{AgentCatalog, AgentCategory, AgentProfile, ComplexityTier};
pub use config::Config;
pub use conversation::{Conversation, ConversationStore, ConversationSummary};
pub use formats::{FormatRegistry, ResponseFormat, SectionContent, SectionSpec, RAW_SECTION};
pub use orchestrator::{AgentResult, AgentStatus, OrchestrateError, Orchestrator, TaskRequest};
pub use provider::{
    build_provider, BackendKind, ChatMessage, ChunkStream, CompletionProvider, CompletionRequest,
    ProviderConfig, ProviderError,
};
pub use streaming::{StreamHandle, StreamUnit};
pub use users::{AuthService, Claims, User};
