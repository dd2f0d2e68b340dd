// crates/waypoint-server/src/transport/mod.rs
// JSON-RPC 2.0 over child-process stdio: framing + session lifecycle

mod session;
mod wire;

pub use session::{DEFAULT_WRITE_QUEUE, ServerSession, SessionState};
pub use wire::{Incoming, MAX_FRAME_BYTES, RpcError, encode_notification, encode_request};
