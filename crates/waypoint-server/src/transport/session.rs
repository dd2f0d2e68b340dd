// crates/waypoint-server/src/transport/session.rs
// One live tool-server binding: child process, reader/writer tasks, pending table

use crate::error::{GatewayError, Result};
use crate::transport::wire::{
    self, Incoming, MAX_FRAME_BYTES, RpcError, encode_notification, encode_request,
};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex as TokioMutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use waypoint_types::{ServerSpec, ToolDescriptor};

/// Writer queue capacity. A full queue fails the call immediately rather than
/// blocking the caller behind a wedged child.
pub const DEFAULT_WRITE_QUEUE: usize = 256;

/// How long a signalled child gets before it is force-killed.
const FORCED_EXIT_WINDOW: Duration = Duration::from_secs(5);

/// Inner deadline for individual handshake calls; the caller wraps the whole
/// handshake in its own (shorter) timeout.
const HANDSHAKE_CALL_TIMEOUT: Duration = Duration::from_secs(60);

const PROTOCOL_VERSION: &str = "2024-11-05";

/// Session lifecycle. Requests are only accepted while `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Spawned; JSON-RPC `initialize` handshake not yet complete.
    Initializing,
    /// Handshake done, tool catalog cached, accepting calls.
    Ready,
    /// Shutdown requested; in-flight calls draining, no new calls.
    Draining,
    /// Child exited or was killed; all pending calls failed.
    Closed,
}

type PendingTable = Arc<StdMutex<HashMap<u64, oneshot::Sender<std::result::Result<Value, RpcError>>>>>;

/// Runtime binding to one live tool server.
///
/// Owns the child process and its stdio. All writes funnel through a single
/// writer task (FIFO order per session); a single reader task matches
/// responses to requests by id through the pending table.
#[derive(Debug)]
pub struct ServerSession {
    spec: ServerSpec,
    state: StdMutex<SessionState>,
    next_id: AtomicU64,
    pending: PendingTable,
    writer_tx: StdMutex<Option<mpsc::Sender<String>>>,
    child: TokioMutex<Option<Child>>,
    tools: StdMutex<Vec<ToolDescriptor>>,
    last_heartbeat: StdMutex<Instant>,
    notifications_seen: AtomicU64,
    reader_task: StdMutex<Option<JoinHandle<()>>>,
    writer_task: StdMutex<Option<JoinHandle<()>>>,
}

impl ServerSession {
    /// Spawn the configured child and complete the MCP handshake:
    /// `initialize` → `notifications/initialized` → `tools/list`.
    ///
    /// On success the session is `Ready` with a cached tool catalog. Fails
    /// with `Spawn`, `Handshake`, or `Timeout` (whole-handshake deadline).
    pub async fn connect(spec: ServerSpec, handshake_timeout: Duration) -> Result<Arc<Self>> {
        // Audit log: the config file decides what gets executed
        let env_keys: Vec<&str> = spec.env.keys().map(|k| k.as_str()).collect();
        info!(
            server = %spec.name,
            command = %spec.command,
            args = ?spec.args,
            env_vars = ?env_keys,
            "Spawning tool server child process"
        );

        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args);
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| GatewayError::Spawn {
            server: spec.name.clone(),
            reason: e.to_string(),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| GatewayError::Spawn {
            server: spec.name.clone(),
            reason: "child stdin not captured".into(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| GatewayError::Spawn {
            server: spec.name.clone(),
            reason: "child stdout not captured".into(),
        })?;

        let (writer_tx, writer_rx) = mpsc::channel::<String>(DEFAULT_WRITE_QUEUE);

        let session = Arc::new(Self {
            spec,
            state: StdMutex::new(SessionState::Initializing),
            next_id: AtomicU64::new(0),
            pending: Arc::new(StdMutex::new(HashMap::new())),
            writer_tx: StdMutex::new(Some(writer_tx)),
            child: TokioMutex::new(Some(child)),
            tools: StdMutex::new(Vec::new()),
            last_heartbeat: StdMutex::new(Instant::now()),
            notifications_seen: AtomicU64::new(0),
            reader_task: StdMutex::new(None),
            writer_task: StdMutex::new(None),
        });

        session.spawn_writer(stdin, writer_rx);
        session.spawn_reader(stdout);

        match tokio::time::timeout(handshake_timeout, session.handshake()).await {
            Ok(Ok(())) => {
                session.set_state(SessionState::Ready);
                info!(
                    server = %session.spec.name,
                    tools = session.tools.lock().map(|t| t.len()).unwrap_or(0),
                    "Tool server ready"
                );
                Ok(session)
            }
            Ok(Err(e)) => {
                session.disconnect(Duration::ZERO).await;
                Err(GatewayError::Handshake {
                    server: session.spec.name.clone(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                warn!(server = %session.spec.name, "Handshake timed out");
                session.disconnect(Duration::ZERO).await;
                Err(GatewayError::Timeout(handshake_timeout))
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &ServerSpec {
        &self.spec
    }

    pub fn state(&self) -> SessionState {
        self.state.lock().map(|s| *s).unwrap_or(SessionState::Closed)
    }

    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    /// Cached tool catalog (populated during the handshake).
    pub fn tools(&self) -> Vec<ToolDescriptor> {
        self.tools.lock().map(|t| t.clone()).unwrap_or_default()
    }

    /// Number of in-flight requests. Empty after every resolved call.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Instant of the last frame received from the server.
    pub fn last_heartbeat(&self) -> Instant {
        self.last_heartbeat
            .lock()
            .map(|t| *t)
            .unwrap_or_else(|_| Instant::now())
    }

    /// Count of server-originated notifications seen on this session.
    pub fn notifications_seen(&self) -> u64 {
        self.notifications_seen.load(Ordering::Relaxed)
    }

    /// Issue a request and await its response.
    ///
    /// Fails fast with `ConnectionLost` when the session is not `Ready` (no
    /// blocking on a dead server) and with `Backpressure` when the writer
    /// queue is full. On timeout the pending entry is removed; a late reply
    /// is logged by the reader and dropped.
    pub async fn call(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        if !self.is_ready() {
            return Err(GatewayError::ConnectionLost(self.spec.name.clone()));
        }
        self.raw_call(method, params, timeout).await
    }

    /// `tools/call` convenience: extracts the text content blocks.
    pub async fn call_tool(&self, tool: &str, args: Value, timeout: Duration) -> Result<String> {
        let params = json!({"name": tool, "arguments": args});
        let result = self.call("tools/call", params, timeout).await?;

        // MCP shape: {content: [{type: "text", text: ...}, ...], isError?}
        if result.get("isError").and_then(|v| v.as_bool()).unwrap_or(false) {
            let msg = extract_text_content(&result);
            return Err(GatewayError::Rpc {
                code: -32000,
                message: if msg.is_empty() { "tool reported an error".into() } else { msg },
            });
        }
        Ok(extract_text_content(&result))
    }

    /// Request ids are monotonic and never reused within a session.
    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    async fn raw_call(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        let id = self.allocate_id();
        let (tx, rx) = oneshot::channel();

        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(id, tx);
        }
        // Removes the entry on every exit path, including this future being
        // dropped by an outer deadline (cancellation propagation).
        let _guard = PendingGuard {
            pending: Arc::clone(&self.pending),
            id,
        };

        self.submit(encode_request(id, method, &params))?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome.map_err(|rpc| GatewayError::Rpc {
                code: rpc.code,
                message: rpc.message,
            }),
            // Sender dropped: the session died and the table was cleared
            Ok(Err(_)) => Err(GatewayError::ConnectionLost(self.spec.name.clone())),
            Err(_) => {
                debug!(server = %self.spec.name, id, method, "Call timed out, pending entry removed");
                // Best-effort: tell the server to stop working on it
                let _ = self.send_notification(
                    "notifications/cancelled",
                    json!({"requestId": id, "reason": "timeout"}),
                );
                Err(GatewayError::Timeout(timeout))
            }
        }
    }

    /// Queue a notification frame (no response expected).
    fn send_notification(&self, method: &str, params: Value) -> Result<()> {
        self.submit(encode_notification(method, &params))
    }

    /// Submit a frame to the writer task. FIFO per session, bounded queue.
    fn submit(&self, line: String) -> Result<()> {
        let guard = self
            .writer_tx
            .lock()
            .map_err(|_| GatewayError::Transport("writer lock poisoned".into()))?;
        let Some(tx) = guard.as_ref() else {
            return Err(GatewayError::ConnectionLost(self.spec.name.clone()));
        };
        match tx.try_send(line) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                Err(GatewayError::Backpressure(self.spec.name.clone()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(GatewayError::ConnectionLost(self.spec.name.clone()))
            }
        }
    }


    async fn handshake(&self) -> Result<()> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "waypoint",
                "version": env!("CARGO_PKG_VERSION"),
            }
        });
        let init = self
            .raw_call("initialize", params, HANDSHAKE_CALL_TIMEOUT)
            .await?;
        debug!(
            server = %self.spec.name,
            server_info = ?init.get("serverInfo"),
            "Initialize reply received"
        );

        self.send_notification("notifications/initialized", json!({}))?;

        let listed = self
            .raw_call("tools/list", json!({}), HANDSHAKE_CALL_TIMEOUT)
            .await?;
        let descriptors = parse_tool_list(&self.spec.name, &listed);
        if let Ok(mut tools) = self.tools.lock() {
            *tools = descriptors;
        }
        Ok(())
    }

    /// Re-run `tools/list` and replace the cached catalog (explicit refresh
    /// only — the catalog is otherwise monotone).
    pub async fn refresh_tools(&self, timeout: Duration) -> Result<usize> {
        let listed = self.call("tools/list", json!({}), timeout).await?;
        let descriptors = parse_tool_list(&self.spec.name, &listed);
        let count = descriptors.len();
        if let Ok(mut tools) = self.tools.lock() {
            *tools = descriptors;
        }
        Ok(count)
    }

    /// Graceful teardown: stop accepting calls, drain in-flight up to
    /// `grace`, signal the child, force-kill after the forced-exit window,
    /// then fail whatever is still pending.
    pub async fn disconnect(&self, grace: Duration) {
        // A session that already failed still needs its child reaped, but
        // there is nothing left to drain.
        let already_closed = {
            let Ok(mut state) = self.state.lock() else { return };
            let closed = *state == SessionState::Closed;
            if !closed {
                *state = SessionState::Draining;
            }
            closed
        };

        if !already_closed {
            // Bounded drain of in-flight calls
            let deadline = Instant::now() + grace;
            while self.pending_len() > 0 && Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }

        // Closing the writer channel drops the child's stdin (EOF),
        // which is the polite shutdown request for stdio servers.
        if let Ok(mut guard) = self.writer_tx.lock() {
            guard.take();
        }

        let mut child_guard = self.child.lock().await;
        if let Some(child) = child_guard.as_mut() {
            terminate(child, &self.spec.name).await;
        }
        *child_guard = None;
        drop(child_guard);

        self.fail_all_pending();
        self.set_state(SessionState::Closed);

        // Reader exits on EOF, writer on channel close; reap both.
        let reader = self.reader_task.lock().ok().and_then(|mut t| t.take());
        let writer = self.writer_task.lock().ok().and_then(|mut t| t.take());
        for task in [reader, writer].into_iter().flatten() {
            // A task wedged past child death gets dropped, not awaited forever
            let _ = tokio::time::timeout(Duration::from_secs(1), task).await;
        }
        info!(server = %self.spec.name, "Session closed");
    }

    fn set_state(&self, next: SessionState) {
        if let Ok(mut state) = self.state.lock() {
            *state = next;
        }
    }

    /// Transport failure: mark closed and fail every in-flight call.
    fn mark_failed(&self, reason: &str) {
        let prev = {
            let Ok(mut state) = self.state.lock() else { return };
            let prev = *state;
            *state = SessionState::Closed;
            prev
        };
        // EOF during Draining is the expected end of a graceful teardown
        if matches!(prev, SessionState::Ready | SessionState::Initializing) {
            warn!(server = %self.spec.name, reason, "Session lost");
        }
        if let Ok(mut guard) = self.writer_tx.lock() {
            guard.take();
        }
        self.fail_all_pending();
    }

    /// Dropping the oneshot senders resolves every waiter with
    /// `ConnectionLost` (receiver error path in `raw_call`).
    fn fail_all_pending(&self) {
        if let Ok(mut pending) = self.pending.lock() {
            let n = pending.len();
            pending.clear();
            if n > 0 {
                debug!(server = %self.spec.name, count = n, "Failed pending requests");
            }
        }
    }

    fn spawn_writer(self: &Arc<Self>, mut stdin: ChildStdin, mut rx: mpsc::Receiver<String>) {
        let session = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                if let Err(e) = stdin.write_all(line.as_bytes()).await {
                    session.mark_failed(&format!("write failed: {e}"));
                    return;
                }
                if let Err(e) = stdin.flush().await {
                    session.mark_failed(&format!("flush failed: {e}"));
                    return;
                }
            }
            // Channel closed during disconnect: stdin drops here → child EOF
        });
        if let Ok(mut task) = self.writer_task.lock() {
            *task = Some(handle);
        }
    }

    fn spawn_reader(self: &Arc<Self>, stdout: ChildStdout) {
        let session = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut buf = Vec::new();
            loop {
                match read_frame(&mut reader, &mut buf, MAX_FRAME_BYTES).await {
                    Err(e) => {
                        session.mark_failed(&format!("read error: {e}"));
                        return;
                    }
                    Ok(FrameEvent::Eof) => {
                        session.mark_failed("server closed stdout");
                        return;
                    }
                    Ok(FrameEvent::Oversized) => {
                        warn!(
                            server = %session.spec.name,
                            cap = MAX_FRAME_BYTES,
                            "Dropped oversized frame"
                        );
                        continue;
                    }
                    Ok(FrameEvent::Frame) => session.dispatch_frame(&buf),
                }
            }
        });
        if let Ok(mut task) = self.reader_task.lock() {
            *task = Some(handle);
        }
    }

    fn dispatch_frame(&self, raw: &[u8]) {
        if let Ok(mut hb) = self.last_heartbeat.lock() {
            *hb = Instant::now();
        }
        let value: Value = match serde_json::from_slice(raw) {
            Ok(v) => v,
            Err(e) => {
                warn!(server = %self.spec.name, error = %e, "Unparseable frame, skipping");
                return;
            }
        };
        match wire::classify(value) {
            Incoming::Response { id, result } => {
                let tx = self.pending.lock().ok().and_then(|mut p| p.remove(&id));
                match tx {
                    Some(tx) => {
                        let _ = tx.send(result);
                    }
                    None => {
                        debug!(server = %self.spec.name, id, "Late reply for unknown id, dropped");
                    }
                }
            }
            Incoming::Notification { method, .. } => {
                self.notifications_seen.fetch_add(1, Ordering::Relaxed);
                debug!(server = %self.spec.name, method = %method, "Server notification");
            }
            Incoming::Unknown(v) => {
                debug!(server = %self.spec.name, frame = %v, "Unhandled frame");
            }
        }
    }
}

/// Drop guard keeping the pending-table invariant: once the call resolves
/// (result, error, timeout, or cancellation), no entry remains for its id.
struct PendingGuard {
    pending: PendingTable,
    id: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&self.id);
        }
    }
}

/// Signal the child, then force-kill after [`FORCED_EXIT_WINDOW`].
async fn terminate(child: &mut Child, server: &str) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SIGTERM first so well-behaved servers can flush state
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
    }

    match tokio::time::timeout(FORCED_EXIT_WINDOW, child.wait()).await {
        Ok(Ok(status)) => {
            debug!(server, ?status, "Child exited");
        }
        Ok(Err(e)) => {
            warn!(server, error = %e, "Failed waiting for child");
        }
        Err(_) => {
            warn!(server, "Child ignored termination signal, killing");
            let _ = child.kill().await;
        }
    }
}

enum FrameEvent {
    /// A complete frame is in the buffer.
    Frame,
    /// The line exceeded the cap; its bytes were discarded up to the newline.
    Oversized,
    Eof,
}

/// Read one newline-delimited frame without ever buffering more than `max`
/// bytes. Overlong lines are consumed and discarded chunk by chunk.
async fn read_frame<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max: usize,
) -> std::io::Result<FrameEvent> {
    buf.clear();
    let mut skipping = false;
    loop {
        let chunk = reader.fill_buf().await?;
        if chunk.is_empty() {
            return Ok(FrameEvent::Eof);
        }
        match chunk.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                if !skipping {
                    buf.extend_from_slice(&chunk[..pos]);
                }
                reader.consume(pos + 1);
                if skipping || buf.len() > max {
                    return Ok(FrameEvent::Oversized);
                }
                return Ok(FrameEvent::Frame);
            }
            None => {
                let len = chunk.len();
                if !skipping {
                    buf.extend_from_slice(chunk);
                    if buf.len() > max {
                        buf.clear();
                        skipping = true;
                    }
                }
                reader.consume(len);
            }
        }
    }
}

/// Parse a `tools/list` result into descriptors tagged with the server name.
fn parse_tool_list(server_name: &str, result: &Value) -> Vec<ToolDescriptor> {
    let Some(tools) = result.get("tools").and_then(|v| v.as_array()) else {
        warn!(server = %server_name, "tools/list reply missing 'tools' array");
        return Vec::new();
    };
    tools
        .iter()
        .filter_map(|t| {
            let name = t.get("name").and_then(|v| v.as_str())?;
            Some(ToolDescriptor {
                server_name: server_name.to_string(),
                tool_name: name.to_string(),
                description: t
                    .get("description")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                input_schema: t.get("inputSchema").cloned().unwrap_or(Value::Null),
                read_only: t
                    .pointer("/annotations/readOnlyHint")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false),
            })
        })
        .collect()
}

/// Text blocks of an MCP `tools/call` result, joined with newlines.
fn extract_text_content(result: &Value) -> String {
    result
        .get("content")
        .and_then(|v| v.as_array())
        .map(|blocks| {
            blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}
