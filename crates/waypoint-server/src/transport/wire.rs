// crates/waypoint-server/src/transport/wire.rs
// NDJSON framing for JSON-RPC 2.0 messages

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Hard cap on a single inbound frame. Larger frames are discarded without
/// buffering (the reader switches to skip-until-newline).
pub const MAX_FRAME_BYTES: usize = 10 * 1024 * 1024;

pub(crate) const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC error object mirrored from a server response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Outbound request frame. One UTF-8 JSON object, one trailing newline.
#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: &'a str,
    params: &'a Value,
}

/// Encode a request frame (with id) ready to write, newline included.
pub fn encode_request(id: u64, method: &str, params: &Value) -> String {
    frame(RpcRequest {
        jsonrpc: JSONRPC_VERSION,
        id: Some(id),
        method,
        params,
    })
}

/// Encode a notification frame (no id), newline included.
pub fn encode_notification(method: &str, params: &Value) -> String {
    frame(RpcRequest {
        jsonrpc: JSONRPC_VERSION,
        id: None,
        method,
        params,
    })
}

fn frame(req: RpcRequest<'_>) -> String {
    // Serialization of Value/str cannot fail
    let mut line = serde_json::to_string(&req).unwrap_or_default();
    line.push('\n');
    line
}

/// One inbound frame, classified.
#[derive(Debug)]
pub enum Incoming {
    /// Response to a request we sent: the id plus result-or-error.
    Response {
        id: u64,
        result: std::result::Result<Value, RpcError>,
    },
    /// Server-originated notification (no id).
    Notification { method: String, params: Value },
    /// Request from the server, or a frame we cannot classify. Logged and
    /// answered with nothing; unknown methods must not crash the session.
    Unknown(Value),
}

/// Classify a parsed JSON frame.
pub fn classify(frame: Value) -> Incoming {
    let id = frame.get("id").and_then(|v| v.as_u64());

    match id {
        Some(id) => {
            if let Some(err) = frame.get("error") {
                let rpc: RpcError = serde_json::from_value(err.clone()).unwrap_or(RpcError {
                    code: -32603,
                    message: "malformed error object".into(),
                    data: None,
                });
                Incoming::Response {
                    id,
                    result: Err(rpc),
                }
            } else if let Some(result) = frame.get("result") {
                Incoming::Response {
                    id,
                    result: Ok(result.clone()),
                }
            } else {
                // Has an id but neither result nor error: a server-side
                // request, which this client does not service.
                Incoming::Unknown(frame)
            }
        }
        None => match frame.get("method").and_then(|v| v.as_str()) {
            Some(method) => Incoming::Notification {
                method: method.to_string(),
                params: frame.get("params").cloned().unwrap_or(Value::Null),
            },
            None => Incoming::Unknown(frame),
        },
    }
}
