// crates/waypoint-server/src/llm/mod.rs
// Coupling to the local inference service (Ollama)

mod http_client;
pub mod logging;
mod ollama;
mod prompt;
mod service;

pub use http_client::HttpClient;
pub use ollama::OllamaClient;
pub use prompt::compose_prompt;
pub use service::{GenerateRequest, LlmService};

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One locally available model, as reported by the inference service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<String>,
}

/// Narrow interface to the inference service.
///
/// [`LlmService`] adds model switching, prompt composition, caching and the
/// resilience pipeline on top; tests substitute a scripted backend.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// List the models the service has available.
    async fn list_models(&self) -> Result<Vec<ModelInfo>>;

    /// Run one non-streaming completion and return the full text.
    async fn generate(&self, model: &str, prompt: &str) -> Result<String>;
}
