// crates/waypoint-server/src/gateway.rs
// Process-wide context: registry + middleware + LLM service + shutdown chain

use crate::agent::Agent;
use crate::config::{ClientConfig, GatewayEnv};
use crate::llm::{LlmBackend, LlmService, OllamaClient};
use crate::middleware::Middleware;
use crate::registry::Registry;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Deadline for each named cleanup task during shutdown.
const CLEANUP_TASK_DEADLINE: Duration = Duration::from_secs(10);
/// Cache sweep interval.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Everything process-wide lives here and is passed by reference: middleware
/// state, the tool-server registry, and the inference service. Tests build a
/// fresh `Gateway` per case so no state leaks between them.
pub struct Gateway {
    pub env: GatewayEnv,
    pub registry: Registry,
    pub middleware: Middleware,
    pub llm: LlmService,
    shutdown_tx: watch::Sender<bool>,
}

impl Gateway {
    /// Production wiring: Ollama backend from the environment.
    pub fn new(env: GatewayEnv, config: ClientConfig) -> Self {
        let backend = Arc::new(OllamaClient::new(&env.llm.base_url));
        Self::with_backend(env, config, backend)
    }

    /// Wiring with an explicit inference backend (tests, alternates).
    pub fn with_backend(
        env: GatewayEnv,
        config: ClientConfig,
        backend: Arc<dyn LlmBackend>,
    ) -> Self {
        let middleware = Middleware::new(&env);
        let llm = LlmService::new(backend, env.llm.default_model.clone());
        let registry = Registry::new(config, env.handshake_timeout);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Lazily-expiring caches still need the periodic sweep
        middleware.caches.spawn_sweeper(SWEEP_INTERVAL, shutdown_rx);

        Self {
            env,
            registry,
            middleware,
            llm,
            shutdown_tx,
        }
    }

    /// Connect all configured tool servers; partial connectivity is normal.
    pub async fn start(&self) -> usize {
        self.registry.connect_all().await
    }

    /// Observe the shutdown flag (background tasks select on this).
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Graceful teardown: flip the shutdown flag (no new work), then run the
    /// cleanup chain — flush metrics, save the session report, clear caches,
    /// disconnect tool servers — each under its own deadline. A task that
    /// overruns is abandoned and the chain continues.
    pub async fn shutdown(&self, agent: Option<&Agent>) {
        if self.shutdown_tx.send(true).is_err() {
            debug!("No shutdown listeners");
        }
        info!("Shutting down gateway");

        run_cleanup("flush metrics", async {
            self.middleware.metrics.flush();
        })
        .await;

        if let Some(agent) = agent
            && !agent.log().is_empty()
        {
            run_cleanup("save session report", async {
                if let Err(e) = agent.log().save(&self.env.log_dir) {
                    warn!(error = %e, "Failed to save session report");
                }
            })
            .await;
        }

        run_cleanup("clear caches", async {
            self.middleware.caches.clear_all();
        })
        .await;

        run_cleanup("disconnect tool servers", self.registry.shutdown()).await;

        info!("Gateway shutdown complete");
    }
}

/// Run one named cleanup task under [`CLEANUP_TASK_DEADLINE`]; log and move
/// on if it overruns.
async fn run_cleanup<F: Future<Output = ()>>(name: &str, task: F) {
    match tokio::time::timeout(CLEANUP_TASK_DEADLINE, task).await {
        Ok(()) => debug!(task = name, "Cleanup task done"),
        Err(_) => warn!(task = name, "Cleanup task exceeded its deadline, continuing"),
    }
}

/// Resolve when the process receives SIGINT or SIGTERM.
pub async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "Cannot install SIGTERM handler; relying on ctrl-c only");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
            _ = sigterm.recv() => info!("SIGTERM received"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheEnv, LlmEnv, RateLimitEnv};
    use crate::error::Result;
    use crate::llm::ModelInfo;
    use async_trait::async_trait;
    use std::path::PathBuf;

    struct NullBackend;

    #[async_trait]
    impl LlmBackend for NullBackend {
        async fn list_models(&self) -> Result<Vec<ModelInfo>> {
            Ok(vec![])
        }
        async fn generate(&self, _model: &str, _prompt: &str) -> Result<String> {
            Ok("ok".into())
        }
    }

    fn env(log_dir: PathBuf) -> GatewayEnv {
        GatewayEnv {
            llm: LlmEnv {
                base_url: "http://localhost:11434".into(),
                default_model: "llama3.2".into(),
            },
            rate_limit: RateLimitEnv {
                enabled: false,
                per_minute: 60,
                burst: 10,
            },
            cache: CacheEnv { enabled: true },
            workspace_root: PathBuf::from("/tmp"),
            auth_required: false,
            log_dir,
            handshake_timeout: Duration::from_secs(2),
            call_timeout: Duration::from_secs(2),
        }
    }

    #[tokio::test]
    async fn test_shutdown_flips_signal_and_completes() {
        let gateway = Gateway::with_backend(
            env(PathBuf::from("/tmp")),
            ClientConfig::default(),
            Arc::new(NullBackend),
        );
        let mut signal = gateway.shutdown_signal();
        assert!(!gateway.is_shutting_down());

        gateway.shutdown(None).await;
        assert!(gateway.is_shutting_down());
        assert!(signal.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_shutdown_persists_agent_log() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Gateway::with_backend(
            env(dir.path().to_path_buf()),
            ClientConfig::default(),
            Arc::new(NullBackend),
        );

        let agent = Agent::new();
        let deps = crate::agent::AgentDeps {
            registry: &gateway.registry,
            middleware: &gateway.middleware,
            llm: &gateway.llm,
            call_timeout: Duration::from_secs(2),
        };
        let _ = agent.turn(&deps, "hello", None).await;

        gateway.shutdown(Some(&agent)).await;

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert!(entries.iter().any(|n| n.starts_with("session_")));
        assert!(entries.iter().any(|n| n.starts_with("report_session_")));
    }

    #[tokio::test]
    async fn test_shutdown_without_actions_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Gateway::with_backend(
            env(dir.path().to_path_buf()),
            ClientConfig::default(),
            Arc::new(NullBackend),
        );
        let agent = Agent::new();
        gateway.shutdown(Some(&agent)).await;
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
