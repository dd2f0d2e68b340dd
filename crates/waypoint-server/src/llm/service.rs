// crates/waypoint-server/src/llm/service.rs
// Model management + guarded generation over any LlmBackend

use crate::error::{GatewayError, Result};
use crate::llm::{LlmBackend, ModelInfo, compose_prompt};
use crate::middleware::{CacheName, CallPolicy, Middleware, cache_key};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::info;

/// Model-list cache TTL.
const TAGS_TTL: Duration = Duration::from_secs(60);
/// Deadline for the model-list endpoint.
const TAGS_TIMEOUT: Duration = Duration::from_secs(10);
/// Deadline for one generation.
const GENERATE_TIMEOUT: Duration = Duration::from_secs(300);

/// One generation request as the agent sees it.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub prompt: String,
    pub system: Option<String>,
    /// Retrieved context, rendered into a fenced block.
    pub context: Option<String>,
    /// Overrides the process-wide default model for this call.
    pub model: Option<String>,
}

/// The gateway's face of the inference service: tracks the process-wide
/// default model and routes every call through the resilience middleware
/// (endpoints `llm.tags` and `llm.generate`).
pub struct LlmService {
    backend: Arc<dyn LlmBackend>,
    current_model: RwLock<String>,
}

impl LlmService {
    pub fn new(backend: Arc<dyn LlmBackend>, default_model: String) -> Self {
        Self {
            backend,
            current_model: RwLock::new(default_model),
        }
    }

    pub fn current_model(&self) -> String {
        self.current_model
            .read()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// List available models. Cached for [`TAGS_TTL`] in the `ollama` cache.
    pub async fn list_models(&self, middleware: &Middleware) -> Result<Vec<ModelInfo>> {
        let policy = CallPolicy::llm("llm.tags", TAGS_TIMEOUT).with_cache(
            CacheName::Ollama,
            cache_key(&["tags"]),
            Some(TAGS_TTL),
        );
        let backend = Arc::clone(&self.backend);
        middleware
            .guarded(&policy, || {
                let backend = Arc::clone(&backend);
                async move { backend.list_models().await }
            })
            .await
    }

    /// Switch the process-wide default model, validating it exists first.
    pub async fn switch_model(&self, middleware: &Middleware, name: &str) -> Result<()> {
        let models = self.list_models(middleware).await?;
        if !models.iter().any(|m| m.name == name) {
            return Err(GatewayError::InvalidInput(format!(
                "model '{name}' is not available (have: {})",
                models
                    .iter()
                    .map(|m| m.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }
        if let Ok(mut current) = self.current_model.write() {
            info!(from = %current, to = %name, "Switching default model");
            *current = name.to_string();
        }
        Ok(())
    }

    /// Compose the full prompt and generate, guarded by the `llm.generate`
    /// circuit and bulkhead. Results are cached per (model, prompt) in the
    /// `ollama` cache.
    pub async fn generate(&self, middleware: &Middleware, req: GenerateRequest) -> Result<String> {
        let model = req.model.unwrap_or_else(|| self.current_model());
        let full_prompt = compose_prompt(
            req.system.as_deref(),
            req.context.as_deref(),
            &req.prompt,
        );

        let policy = CallPolicy::llm("llm.generate", GENERATE_TIMEOUT).with_cache(
            CacheName::Ollama,
            cache_key(&["generate", &model, &full_prompt]),
            None,
        );

        let backend = Arc::clone(&self.backend);
        middleware
            .guarded(&policy, || {
                let backend = Arc::clone(&backend);
                let model = model.clone();
                let prompt = full_prompt.clone();
                async move { backend.generate(&model, &prompt).await }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheEnv, GatewayEnv, LlmEnv, RateLimitEnv};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Scripted backend: pops canned replies, records prompts it saw.
    struct FakeBackend {
        models: Vec<ModelInfo>,
        replies: Mutex<Vec<Result<String>>>,
        seen_prompts: Mutex<Vec<String>>,
        tags_calls: Mutex<u32>,
    }

    impl FakeBackend {
        fn new(models: &[&str], replies: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                models: models
                    .iter()
                    .map(|n| ModelInfo {
                        name: n.to_string(),
                        size: None,
                        modified_at: None,
                    })
                    .collect(),
                replies: Mutex::new(replies),
                seen_prompts: Mutex::new(Vec::new()),
                tags_calls: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl LlmBackend for FakeBackend {
        async fn list_models(&self) -> Result<Vec<ModelInfo>> {
            *self.tags_calls.lock().unwrap() += 1;
            Ok(self.models.clone())
        }

        async fn generate(&self, _model: &str, prompt: &str) -> Result<String> {
            self.seen_prompts.lock().unwrap().push(prompt.to_string());
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                Ok("default reply".into())
            } else {
                replies.remove(0)
            }
        }
    }

    fn middleware() -> Middleware {
        Middleware::new(&GatewayEnv {
            llm: LlmEnv {
                base_url: "http://localhost:11434".into(),
                default_model: "llama3.2".into(),
            },
            rate_limit: RateLimitEnv {
                enabled: true,
                per_minute: 6000,
                burst: 100,
            },
            cache: CacheEnv { enabled: true },
            workspace_root: PathBuf::from("/tmp"),
            auth_required: false,
            log_dir: PathBuf::from("/tmp"),
            handshake_timeout: Duration::from_secs(10),
            call_timeout: Duration::from_secs(5),
        })
    }

    #[tokio::test]
    async fn test_generate_composes_prompt() {
        let backend = FakeBackend::new(&["llama3.2"], vec![Ok("answer".into())]);
        let service = LlmService::new(backend.clone(), "llama3.2".into());
        let mw = middleware();

        let out = service
            .generate(
                &mw,
                GenerateRequest {
                    prompt: "what is up?".into(),
                    system: Some("Be brief.".into()),
                    context: Some("the sky".into()),
                    model: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(out, "answer");

        let seen = backend.seen_prompts.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].starts_with("Be brief."));
        assert!(seen[0].contains("Relevant context:"));
        assert!(seen[0].ends_with("what is up?"));
    }

    #[tokio::test]
    async fn test_switch_model_validates_against_tags() {
        let backend = FakeBackend::new(&["llama3.2", "mistral"], vec![]);
        let service = LlmService::new(backend, "llama3.2".into());
        let mw = middleware();

        service.switch_model(&mw, "mistral").await.unwrap();
        assert_eq!(service.current_model(), "mistral");

        let err = service.switch_model(&mw, "gpt-42").await.unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
        assert_eq!(service.current_model(), "mistral");
    }

    #[tokio::test]
    async fn test_model_list_is_cached() {
        let backend = FakeBackend::new(&["llama3.2"], vec![]);
        let service = LlmService::new(backend.clone(), "llama3.2".into());
        let mw = middleware();

        for _ in 0..3 {
            service.list_models(&mw).await.unwrap();
        }
        assert_eq!(*backend.tags_calls.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generate_unavailable_surfaces_kind() {
        let backend = FakeBackend::new(
            &["llama3.2"],
            vec![
                Err(GatewayError::LlmUnavailable("refused".into())),
                Err(GatewayError::LlmUnavailable("refused".into())),
                Err(GatewayError::LlmUnavailable("refused".into())),
            ],
        );
        let service = LlmService::new(backend, "llama3.2".into());
        let mw = middleware();

        let err = service
            .generate(
                &mw,
                GenerateRequest {
                    prompt: "hi".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "llm_unavailable");
    }

    #[tokio::test]
    async fn test_per_call_model_override() {
        let backend = FakeBackend::new(&["llama3.2"], vec![]);
        let service = LlmService::new(backend, "llama3.2".into());
        let mw = middleware();

        // Override does not touch the default
        let _ = service
            .generate(
                &mw,
                GenerateRequest {
                    prompt: "hi".into(),
                    model: Some("mistral".into()),
                    ..Default::default()
                },
            )
            .await;
        assert_eq!(service.current_model(), "llama3.2");
    }
}
