// crates/waypoint-server/src/middleware/rate_limit.rs
// Token buckets per (endpoint, client) pair

use crate::config::RateLimitEnv;
use crate::error::{GatewayError, Result};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;
use tracing::debug;

/// Continuous-refill token bucket.
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Rate limiter keyed by (endpoint, client-id).
///
/// Burst capacity is separate from the steady-state rate: a fresh bucket
/// holds `burst` tokens and refills continuously at `rate_per_second` up to
/// that cap.
pub struct RateLimiter {
    enabled: bool,
    rate_per_second: f64,
    burst: f64,
    buckets: Mutex<HashMap<(String, String), Bucket>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitEnv) -> Self {
        Self {
            enabled: config.enabled,
            rate_per_second: config.rate_per_second(),
            burst: config.burst.max(1) as f64,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Take one token or fail with `RateLimitExceeded`. No state changes on
    /// failure beyond the refill bookkeeping.
    pub fn try_acquire(&self, endpoint: &str, client_id: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let Ok(mut buckets) = self.buckets.lock() else {
            return Ok(());
        };
        let now = Instant::now();
        let bucket = buckets
            .entry((endpoint.to_string(), client_id.to_string()))
            .or_insert(Bucket {
                tokens: self.burst,
                last_refill: now,
            });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate_per_second).min(self.burst);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            debug!(endpoint, client_id, "Rate limit exceeded");
            Err(GatewayError::RateLimitExceeded(endpoint.to_string()))
        }
    }
}
