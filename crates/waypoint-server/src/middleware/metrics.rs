// crates/waypoint-server/src/middleware/metrics.rs
// Call instrumentation: bounded sample buffer + percentile reducer

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::info;

/// Raw samples buffered before reduction. Oldest samples fall off the ring.
const RING_CAPACITY: usize = 4096;
/// Channel slack between recording call sites and the reducer.
const CHANNEL_CAPACITY: usize = 1024;

/// One instrumented call, emitted by the middleware for every guarded call.
#[derive(Debug, Clone, Serialize)]
pub struct CallSample {
    pub endpoint: String,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub cache_hit: bool,
    /// Attempts beyond the first.
    pub retries: u32,
}

/// Aggregated view of one endpoint's recent samples.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointStats {
    pub endpoint: String,
    pub calls: u64,
    pub failures: u64,
    pub cache_hits: u64,
    pub retries: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

struct MetricsInner {
    rx: mpsc::Receiver<CallSample>,
    ring: VecDeque<CallSample>,
}

/// Process-wide metrics sink.
///
/// `record` never blocks a call path: samples go through a bounded channel
/// and are dropped (counted) when the reducer falls behind. Reduction happens
/// on demand in `snapshot`, keeping the hot path free of aggregation work.
pub struct MetricsHub {
    tx: mpsc::Sender<CallSample>,
    inner: Mutex<MetricsInner>,
    dropped: AtomicU64,
}

impl MetricsHub {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            inner: Mutex::new(MetricsInner {
                rx,
                ring: VecDeque::with_capacity(RING_CAPACITY),
            }),
            dropped: AtomicU64::new(0),
        }
    }

    /// Record one sample. Non-blocking; drops when the buffer is saturated.
    pub fn record(&self, sample: CallSample) {
        if self.tx.try_send(sample).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Samples dropped due to buffer saturation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Drain pending samples into the ring and aggregate per endpoint,
    /// sorted by endpoint name.
    pub fn snapshot(&self) -> Vec<EndpointStats> {
        let Ok(mut inner) = self.inner.lock() else {
            return Vec::new();
        };
        while let Ok(sample) = inner.rx.try_recv() {
            if inner.ring.len() == RING_CAPACITY {
                inner.ring.pop_front();
            }
            inner.ring.push_back(sample);
        }

        let mut grouped: HashMap<&str, Vec<&CallSample>> = HashMap::new();
        for sample in &inner.ring {
            grouped.entry(&sample.endpoint).or_default().push(sample);
        }

        let mut stats: Vec<EndpointStats> = grouped
            .into_iter()
            .map(|(endpoint, samples)| {
                let mut durations: Vec<u64> = samples.iter().map(|s| s.duration_ms).collect();
                durations.sort_unstable();
                EndpointStats {
                    endpoint: endpoint.to_string(),
                    calls: samples.len() as u64,
                    failures: samples.iter().filter(|s| !s.success).count() as u64,
                    cache_hits: samples.iter().filter(|s| s.cache_hit).count() as u64,
                    retries: samples.iter().map(|s| s.retries as u64).sum(),
                    p50_ms: percentile(&durations, 50),
                    p95_ms: percentile(&durations, 95),
                    p99_ms: percentile(&durations, 99),
                }
            })
            .collect();
        stats.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        stats
    }

    /// Count of samples currently held for a given endpoint (tests, audits).
    pub fn samples_for(&self, endpoint: &str) -> Vec<CallSample> {
        let _ = self.snapshot(); // fold channel into the ring first
        let Ok(inner) = self.inner.lock() else {
            return Vec::new();
        };
        inner
            .ring
            .iter()
            .filter(|s| s.endpoint == endpoint)
            .cloned()
            .collect()
    }

    /// Log the aggregate at shutdown.
    pub fn flush(&self) {
        for s in self.snapshot() {
            info!(
                endpoint = %s.endpoint,
                calls = s.calls,
                failures = s.failures,
                cache_hits = s.cache_hits,
                retries = s.retries,
                p50_ms = s.p50_ms,
                p95_ms = s.p95_ms,
                p99_ms = s.p99_ms,
                "Endpoint metrics"
            );
        }
        let dropped = self.dropped();
        if dropped > 0 {
            info!(dropped, "Metric samples dropped under load");
        }
    }
}

impl Default for MetricsHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Nearest-rank percentile over an ascending-sorted slice.
fn percentile(sorted: &[u64], p: u32) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (p as f64 / 100.0 * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
