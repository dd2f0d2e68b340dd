// crates/waypoint-server/tests/common/mod.rs
// Shared fixtures: sh-scripted stub tool servers and a scripted LLM backend
#![allow(dead_code)] // each test binary uses a different subset

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use waypoint::Result;
use waypoint::llm::{LlmBackend, ModelInfo};
use waypoint_types::ServerSpec;

/// A stub tool server as a `sh` one-liner. Requests arrive in lockstep
/// (the client awaits each response before sending the next request), so the
/// script can reply to the deterministic id sequence: 1 = initialize,
/// 2 = tools/list (after the initialized notification), 3+ = calls.
pub fn stub_spec(name: &str, script: &str) -> ServerSpec {
    ServerSpec {
        name: name.to_string(),
        command: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
        env: HashMap::new(),
        description: Some(format!("stub server {name}")),
    }
}

/// Handshake portion of every stub: answers `initialize`, consumes the
/// `notifications/initialized` notification, then answers `tools/list` with
/// a single `echo` tool (read-only, requires `text`).
pub fn handshake_script() -> String {
    [
        r#"read line || exit 0"#,
        r#"printf '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"stub","version":"0.0.1"}}}\n'"#,
        r#"read line || exit 0"#,
        r#"read line || exit 0"#,
        r#"printf '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"echo","description":"Echo text back","inputSchema":{"type":"object","properties":{"text":{"type":"string"}},"required":["text"]},"annotations":{"readOnlyHint":true}}]}}\n'"#,
    ]
    .join("\n")
}

/// Stub that answers one `tools/call` (id 3) with a fixed text payload,
/// then keeps serving ids 4 and 5 with the same payload.
pub fn echo_script(payload: &str) -> String {
    let mut script = handshake_script();
    for id in 3..=5 {
        script.push_str(&format!(
            "\nread line || exit 0\nprintf '{{\"jsonrpc\":\"2.0\",\"id\":{id},\"result\":{{\"content\":[{{\"type\":\"text\",\"text\":\"{payload}\"}}]}}}}\\n'"
        ));
    }
    script.push_str("\nread line || exit 0");
    script
}

/// Stub whose `tools/call` replies are JSON-RPC errors (a flaky server).
pub fn flaky_script(calls: u32) -> String {
    let mut script = handshake_script();
    for id in 3..(3 + calls) {
        script.push_str(&format!(
            "\nread line || exit 0\nprintf '{{\"jsonrpc\":\"2.0\",\"id\":{id},\"error\":{{\"code\":-32000,\"message\":\"store unavailable\"}}}}\\n'"
        ));
    }
    script.push_str("\nread line || exit 0");
    script
}

/// Stub that completes the handshake, then goes silent on the first call
/// (reads the request, never answers) until killed.
pub fn silent_script() -> String {
    let mut script = handshake_script();
    script.push_str("\nread line || exit 0\nsleep 30");
    script
}

/// Scripted inference backend for agent-level scenarios.
pub struct ScriptedLlm {
    replies: Mutex<Vec<Result<String>>>,
    pub seen_prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new(replies: Vec<Result<String>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies),
            seen_prompts: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl LlmBackend for ScriptedLlm {
    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Ok(vec![ModelInfo {
            name: "llama3.2".into(),
            size: None,
            modified_at: None,
        }])
    }

    async fn generate(&self, _model: &str, prompt: &str) -> Result<String> {
        self.seen_prompts.lock().unwrap().push(prompt.to_string());
        let mut replies = self.replies.lock().unwrap();
        if replies.is_empty() {
            Ok("(scripted fallback)".into())
        } else {
            replies.remove(0)
        }
    }
}
