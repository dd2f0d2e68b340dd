// crates/waypoint-server/src/llm/logging.rs
// Request-scoped logging for inference calls

use tracing::info;

pub fn log_generate_start(request_id: &str, model: &str, prompt_chars: usize) {
    info!(
        request_id = %request_id,
        model = %model,
        prompt_chars,
        "Starting generation"
    );
}

pub fn log_completion(request_id: &str, model: &str, duration_ms: u64, response_chars: usize) {
    info!(
        request_id = %request_id,
        model = %model,
        duration_ms,
        response_chars,
        "Generation complete"
    );
}
