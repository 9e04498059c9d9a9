use std::sync::RwLock;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

/// Process-wide configuration (§6 "Configuration options").
///
/// Mirrors the teacher's `vizier_core::config` pattern of a single
/// `RwLock`-guarded global, generalized so tests can build a `Config`
/// explicitly instead of going through the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Absent when no embeddings/chat API key is configured. Those surfaces
    /// then degrade to `ServiceUnavailable`; everything else keeps working.
    pub open_ai_api_key: Option<String>,
    pub embedding_model: String,
    pub embedding_dims: usize,
    pub chat_model: String,
    pub max_context_tokens: usize,
    pub max_auto_reindex_files: usize,
    pub max_embedding_batch: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            open_ai_api_key: std::env::var("OPENAI_API_KEY").ok(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dims: 1536,
            chat_model: std::env::var("COLONY_CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            max_context_tokens: 8_000,
            max_auto_reindex_files: 500,
            max_embedding_batch: 2048,
        }
    }
}

impl Config {
    pub fn has_embedding_provider(&self) -> bool {
        self.open_ai_api_key.is_some()
    }
}

static CONFIG: OnceCell<RwLock<Config>> = OnceCell::new();

fn cell() -> &'static RwLock<Config> {
    CONFIG.get_or_init(|| RwLock::new(Config::default()))
}

pub fn set_config(new_config: Config) {
    *cell().write().unwrap() = new_config;
}

pub fn get_config() -> Config {
    cell().read().unwrap().clone()
}
