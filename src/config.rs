//! Configuration management

use anyhow::Result;
use std::path::PathBuf;

use crate::provider::{BackendKind, ProviderConfig};

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Default completion backend (per-request configs can override)
    pub provider: ProviderConfig,

    /// Default model hint when request and profile give none
    pub default_model: String,

    /// HTTP bind address
    pub bind_addr: String,

    /// SQLite database path (users + conversations)
    pub db_path: PathBuf,

    /// JWT signing secret
    pub jwt_secret: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let kind = std::env::var("AGENTHUB_BACKEND")
            .ok()
            .and_then(|s| BackendKind::parse(&s))
            .unwrap_or(BackendKind::Anthropic);

        // Backend-specific key envs first, generic override second
        let api_key = std::env::var("AGENTHUB_API_KEY").ok().or_else(|| match kind {
            BackendKind::Anthropic => std::env::var("ANTHROPIC_API_KEY").ok(),
            BackendKind::OpenAi => std::env::var("OPENAI_API_KEY").ok(),
        });

        let base_url = std::env::var("AGENTHUB_BASE_URL").ok();

        let default_model =
            std::env::var("AGENTHUB_DEFAULT_MODEL").unwrap_or_else(|_| "sonnet".to_string());

        let bind_addr =
            std::env::var("AGENTHUB_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let db_path = std::env::var("AGENTHUB_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("agenthub.db"));

        let jwt_secret = std::env::var("AGENTHUB_JWT_SECRET").unwrap_or_else(|_| {
            let secret: String = (0..64)
                .map(|_| {
                    let idx = rand::random::<usize>() % 62;
                    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789"[idx] as char
                })
                .collect();
            tracing::warn!("No JWT secret configured - using random secret (development only)");
            secret
        });

        Ok(Self {
            provider: ProviderConfig {
                kind,
                api_key,
                base_url,
                default_model: Some(default_model.clone()),
            },
            default_model,
            bind_addr,
            db_path,
            jwt_secret,
        })
    }
}
