// crates/waypoint-server/src/middleware/bulkhead.rs
// Bounded-concurrency gates isolating endpoint classes

use crate::error::{GatewayError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Which concurrency gate a call goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkheadClass {
    /// Inference-service calls (generations, model listings).
    Llm,
    /// Tool-server calls.
    Tool,
}

impl BulkheadClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            BulkheadClass::Llm => "llm",
            BulkheadClass::Tool => "tool",
        }
    }
}

/// One semaphore per endpoint class. A slot is held for the duration of the
/// guarded call and released on every exit path (permit drop).
pub struct Bulkheads {
    llm: Arc<Semaphore>,
    tool: Arc<Semaphore>,
}

/// Default cap on concurrent LLM generations.
pub const DEFAULT_LLM_SLOTS: usize = 10;
/// Default cap on concurrent tool calls.
pub const DEFAULT_TOOL_SLOTS: usize = 5;

impl Bulkheads {
    pub fn new(llm_slots: usize, tool_slots: usize) -> Self {
        Self {
            llm: Arc::new(Semaphore::new(llm_slots.max(1))),
            tool: Arc::new(Semaphore::new(tool_slots.max(1))),
        }
    }

    /// Acquire a slot, waiting at most `deadline`. Failure to acquire within
    /// the deadline is `ResourceExhausted`.
    pub async fn acquire(
        &self,
        class: BulkheadClass,
        deadline: Duration,
    ) -> Result<OwnedSemaphorePermit> {
        let sem = match class {
            BulkheadClass::Llm => Arc::clone(&self.llm),
            BulkheadClass::Tool => Arc::clone(&self.tool),
        };
        match tokio::time::timeout(deadline, sem.acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            // Closed semaphore or timeout both mean the class is unavailable
            Ok(Err(_)) | Err(_) => Err(GatewayError::ResourceExhausted(
                class.as_str().to_string(),
            )),
        }
    }

    pub fn available(&self, class: BulkheadClass) -> usize {
        match class {
            BulkheadClass::Llm => self.llm.available_permits(),
            BulkheadClass::Tool => self.tool.available_permits(),
        }
    }
}

impl Default for Bulkheads {
    fn default() -> Self {
        Self::new(DEFAULT_LLM_SLOTS, DEFAULT_TOOL_SLOTS)
    }
}
