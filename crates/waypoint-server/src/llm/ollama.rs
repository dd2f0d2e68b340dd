// crates/waypoint-server/src/llm/ollama.rs
// Ollama API client (native /api endpoints, local inference)

use crate::error::{GatewayError, Result};
use crate::llm::http_client::HttpClient;
use crate::llm::{LlmBackend, ModelInfo, logging};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// Strip trailing slashes and a stray `/v1` suffix (people paste the
/// OpenAI-compat URL; the native API lives at the root).
fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim_end_matches('/').to_string();
    if url.ends_with("/v1") {
        url.truncate(url.len() - 3);
    }
    url
}

/// Check if a URL points to a local address (localhost, 127.0.0.1, [::1])
fn is_local_url(url: &str) -> bool {
    match url::Url::parse(url) {
        Ok(parsed) => match parsed.host() {
            Some(url::Host::Domain(d)) => d == "localhost",
            Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
            Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
            None => true,
        },
        Err(_) => true, // Can't parse — don't warn on malformed URLs
    }
}

#[derive(Debug, Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_ctx: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateReply {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct TagsReply {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

/// Ollama client over the native HTTP API: `GET /api/tags` for the model
/// list, `POST /api/generate` for non-streaming completions.
pub struct OllamaClient {
    base_url: String,
    http: HttpClient,
    temperature: f32,
    num_ctx: u32,
}

impl OllamaClient {
    pub fn new(base_url: &str) -> Self {
        let normalized = normalize_base_url(base_url);
        if !is_local_url(&normalized) {
            tracing::warn!(
                "Inference URL '{}' is not local. The trust boundary is the local host.",
                normalized
            );
        }
        Self {
            base_url: normalized,
            http: HttpClient::default(),
            temperature: 0.7,
            num_ctx: 8192,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl LlmBackend for OllamaClient {
    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = format!("{}/api/tags", self.base_url);
        let body = self.http.get(&url).await?;
        let reply: TagsReply = serde_json::from_str(&body)
            .map_err(|e| GatewayError::LlmUnavailable(format!("bad /api/tags reply: {e}")))?;
        Ok(reply.models)
    }

    async fn generate(&self, model: &str, prompt: &str) -> Result<String> {
        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        logging::log_generate_start(&request_id, model, prompt.len());

        let body = serde_json::to_string(&GenerateBody {
            model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: self.temperature,
                num_ctx: self.num_ctx,
            },
        })?;
        debug!(request_id = %request_id, bytes = body.len(), "Ollama generate request");

        let url = format!("{}/api/generate", self.base_url);
        let response_body = self.http.post_json(&url, body).await?;

        let reply: GenerateReply = serde_json::from_str(&response_body)
            .map_err(|e| GatewayError::LlmUnavailable(format!("bad /api/generate reply: {e}")))?;
        if !reply.done {
            return Err(GatewayError::LlmUnavailable(
                "generation ended before done=true".into(),
            ));
        }

        logging::log_completion(
            &request_id,
            model,
            started.elapsed().as_millis() as u64,
            reply.response.len(),
        );
        Ok(reply.response)
    }
}
