// crates/waypoint-server/src/middleware/mod.rs
// Resilience pipeline wrapping every outbound call:
// cache probe → rate limit → bulkhead → circuit breaker → retry → timeout → call

pub mod bulkhead;
pub mod cache;
pub mod circuit;
pub mod metrics;
pub mod rate_limit;
pub mod retry;

pub use bulkhead::{BulkheadClass, Bulkheads, DEFAULT_LLM_SLOTS, DEFAULT_TOOL_SLOTS};
pub use cache::{CacheName, CacheSet, cache_key};
pub use circuit::{CircuitBreaker, CircuitConfig, CircuitSnapshot};
pub use metrics::{CallSample, EndpointStats, MetricsHub};
pub use rate_limit::RateLimiter;
pub use retry::RetryConfig;

use crate::config::GatewayEnv;
use crate::error::{GatewayError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Where a successful result is cached, and under what key.
#[derive(Debug, Clone)]
pub struct CacheSlot {
    pub name: CacheName,
    pub key: String,
    /// `None` uses the cache's default TTL.
    pub ttl: Option<Duration>,
}

/// Per-call wrapping policy: the endpoint key middleware state hangs off,
/// the bulkhead class, the deadline, the retry policy, and optional caching.
#[derive(Debug, Clone)]
pub struct CallPolicy {
    pub endpoint: String,
    pub class: BulkheadClass,
    pub timeout: Duration,
    pub retry: RetryConfig,
    pub cache: Option<CacheSlot>,
    pub client_id: String,
}

impl CallPolicy {
    /// Policy for a tool-server call. Tools are not retried by default —
    /// re-sending a possibly side-effecting call is the endpoint override
    /// config would have to opt into.
    pub fn tool(server: &str, tool: &str, timeout: Duration) -> Self {
        Self {
            endpoint: format!("tool:{server}.{tool}"),
            class: BulkheadClass::Tool,
            timeout,
            retry: RetryConfig::none(),
            cache: None,
            client_id: "local".into(),
        }
    }

    /// Policy for an inference-service call.
    pub fn llm(endpoint: &str, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            class: BulkheadClass::Llm,
            timeout,
            retry: RetryConfig::default(),
            cache: None,
            client_id: "local".into(),
        }
    }

    pub fn with_cache(mut self, name: CacheName, key: String, ttl: Option<Duration>) -> Self {
        self.cache = Some(CacheSlot { name, key, ttl });
        self
    }

    pub fn with_client(mut self, client_id: &str) -> Self {
        self.client_id = client_id.to_string();
        self
    }
}

/// Process-wide middleware state, one instance per [`crate::gateway::Gateway`].
///
/// Built over a narrow callable interface: callees are plain async closures
/// returning `Result<T>`, with no knowledge of the wrapping.
pub struct Middleware {
    pub circuit: CircuitBreaker,
    pub bulkheads: Bulkheads,
    pub rate: RateLimiter,
    pub caches: Arc<CacheSet>,
    pub metrics: MetricsHub,
}

impl Middleware {
    pub fn new(env: &GatewayEnv) -> Self {
        Self {
            circuit: CircuitBreaker::default(),
            bulkheads: Bulkheads::default(),
            rate: RateLimiter::new(&env.rate_limit),
            caches: Arc::new(CacheSet::new(env.cache.enabled)),
            metrics: MetricsHub::new(),
        }
    }

    /// Run `call` under `policy`.
    ///
    /// A cache hit returns immediately and bypasses every other layer. On a
    /// miss the full pipeline runs; one metric sample is recorded either way.
    pub async fn guarded<T, F, Fut>(&self, policy: &CallPolicy, mut call: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();

        if let Some(slot) = &policy.cache
            && let Some(hit) = self.caches.get(slot.name, &slot.key)
            && let Ok(value) = serde_json::from_value::<T>(hit)
        {
            self.metrics.record(CallSample {
                endpoint: policy.endpoint.clone(),
                duration_ms: started.elapsed().as_millis() as u64,
                success: true,
                error_kind: None,
                cache_hit: true,
                retries: 0,
            });
            return Ok(value);
        }

        let (result, attempts) = self.run_pipeline(policy, &mut call).await;

        self.metrics.record(CallSample {
            endpoint: policy.endpoint.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
            success: result.is_ok(),
            error_kind: result.as_ref().err().map(|e| e.kind().to_string()),
            cache_hit: false,
            retries: attempts.saturating_sub(1),
        });

        if let (Ok(value), Some(slot)) = (&result, &policy.cache)
            && let Ok(json) = serde_json::to_value(value)
        {
            self.caches.insert(slot.name, slot.key.clone(), json, slot.ttl);
        }

        result
    }

    async fn run_pipeline<T, F, Fut>(&self, policy: &CallPolicy, call: &mut F) -> (Result<T>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Err(e) = self.rate.try_acquire(&policy.endpoint, &policy.client_id) {
            return (Err(e), 0);
        }

        // Slot is held for the whole call (including retries) and released
        // on every exit path when the permit drops.
        let _permit = match self.bulkheads.acquire(policy.class, policy.timeout).await {
            Ok(permit) => permit,
            Err(e) => return (Err(e), 0),
        };

        if let Err(e) = self.circuit.check(&policy.endpoint) {
            return (Err(e), 0);
        }

        let deadline = policy.timeout;
        let outcome = retry::run(&policy.retry, || {
            let fut = call();
            async move {
                match tokio::time::timeout(deadline, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(GatewayError::Timeout(deadline)),
                }
            }
        })
        .await;

        match &outcome.result {
            Ok(_) => self.circuit.record_success(&policy.endpoint),
            // Cancellation during shutdown is not endpoint health signal
            Err(GatewayError::Cancelled) => {}
            Err(_) => self.circuit.record_failure(&policy.endpoint),
        }

        (outcome.result, outcome.attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheEnv, LlmEnv, RateLimitEnv};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn test_env() -> GatewayEnv {
        GatewayEnv {
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
        }
    }

    fn fast_policy(endpoint: &str) -> CallPolicy {
        CallPolicy {
            endpoint: endpoint.to_string(),
            class: BulkheadClass::Tool,
            timeout: Duration::from_millis(200),
            retry: RetryConfig::none(),
            cache: None,
            client_id: "local".into(),
        }
    }

    #[tokio::test]
    async fn test_happy_path_records_metric() {
        let mw = Middleware::new(&test_env());
        let result: String = mw
            .guarded(&fast_policy("tool:fs.read"), || async { Ok("data".to_string()) })
            .await
            .unwrap();
        assert_eq!(result, "data");

        let samples = mw.metrics.samples_for("tool:fs.read");
        assert_eq!(samples.len(), 1);
        assert!(samples[0].success);
        assert!(!samples[0].cache_hit);
    }

    #[tokio::test]
    async fn test_cache_hit_bypasses_pipeline() {
        let mw = Middleware::new(&test_env());
        let policy = fast_policy("tool:fs.read").with_cache(
            CacheName::General,
            cache_key(&["fs.read", "/tmp/x"]),
            None,
        );

        let calls = AtomicU32::new(0);
        for _ in 0..3 {
            let out: String = mw
                .guarded(&policy, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok("cached".to_string()) }
                })
                .await
                .unwrap();
            assert_eq!(out, "cached");
        }
        // Underlying call ran once; the two hits short-circuited
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let samples = mw.metrics.samples_for("tool:fs.read");
        assert_eq!(samples.iter().filter(|s| s.cache_hit).count(), 2);
    }

    #[tokio::test]
    async fn test_timeout_maps_to_timeout_kind() {
        let mw = Middleware::new(&test_env());
        let err = mw
            .guarded::<String, _, _>(&fast_policy("tool:slow.op"), || async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok("never".to_string())
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "timeout");
    }

    #[tokio::test]
    async fn test_five_failures_trip_circuit_sixth_fails_fast() {
        let mw = Middleware::new(&test_env());
        let policy = fast_policy("tool:memory.store");

        for _ in 0..5 {
            let _ = mw
                .guarded::<String, _, _>(&policy, || async {
                    Err(GatewayError::Rpc {
                        code: -32000,
                        message: "flaky".into(),
                    })
                })
                .await;
        }

        let started = Instant::now();
        let calls = AtomicU32::new(0);
        let err = mw
            .guarded::<String, _, _>(&policy, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok("unreachable".to_string()) }
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "circuit_open");
        assert!(started.elapsed() < Duration::from_millis(10));
        // The underlying function was never invoked
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            mw.circuit.snapshot("tool:memory.store"),
            CircuitSnapshot::Open
        );
    }

    #[tokio::test]
    async fn test_rate_limit_failure_has_stable_kind() {
        let mut env = test_env();
        env.rate_limit = RateLimitEnv {
            enabled: true,
            per_minute: 60,
            burst: 2,
        };
        let mw = Middleware::new(&env);
        let policy = fast_policy("llm.generate");
        for _ in 0..2 {
            mw.guarded::<u32, _, _>(&policy, || async { Ok(1) }).await.unwrap();
        }
        let err = mw
            .guarded::<u32, _, _>(&policy, || async { Ok(1) })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "rate_limit");
    }

    #[tokio::test]
    async fn test_retry_counted_in_sample() {
        let mw = Middleware::new(&test_env());
        let mut policy = fast_policy("llm.generate");
        policy.retry = RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            multiplier: 2.0,
            jitter_factor: 0.0,
        };

        let calls = AtomicU32::new(0);
        let out: String = mw
            .guarded(&policy, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(GatewayError::LlmUnavailable("refused".into()))
                    } else {
                        Ok("recovered".to_string())
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(out, "recovered");

        let samples = mw.metrics.samples_for("llm.generate");
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].retries, 1);
    }
}
