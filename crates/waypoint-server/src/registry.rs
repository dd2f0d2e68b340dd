// crates/waypoint-server/src/registry.rs
// The set of configured tool servers: connect, discover, route, tear down

use crate::config::ClientConfig;
use crate::error::{GatewayError, Result};
use crate::middleware::{CacheName, CallPolicy, Middleware, cache_key};
use crate::transport::ServerSession;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};
use waypoint_types::{ServerStatus, ToolDescriptor, ToolResult};

/// Grace given to each session during registry shutdown. Kept under the
/// gateway's per-cleanup-task deadline so a stuck drain still leaves time to
/// signal and kill the children.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Owns every live [`ServerSession`] and aggregates their tool catalogs.
///
/// Partial connectivity is a normal state: servers that fail to spawn or
/// handshake are logged and skipped, the rest keep serving. The aggregated
/// catalog only changes on disconnect or explicit reconnect/refresh.
pub struct Registry {
    config: ClientConfig,
    handshake_timeout: Duration,
    sessions: RwLock<HashMap<String, Arc<ServerSession>>>,
}

impl Registry {
    pub fn new(config: ClientConfig, handshake_timeout: Duration) -> Self {
        Self {
            config,
            handshake_timeout,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connect every enabled server concurrently. Returns how many came up.
    pub async fn connect_all(&self) -> usize {
        let attempts = self.config.servers.iter().map(|spec| {
            let spec = spec.clone();
            let timeout = self.handshake_timeout;
            async move {
                let name = spec.name.clone();
                (name, ServerSession::connect(spec, timeout).await)
            }
        });

        let results = futures::future::join_all(attempts).await;
        let mut sessions = self.sessions.write().await;
        let mut connected = 0;
        for (name, result) in results {
            match result {
                Ok(session) => {
                    sessions.insert(name, session);
                    connected += 1;
                }
                Err(e) => {
                    warn!(server = %name, error = %e, "Tool server failed to connect");
                }
            }
        }
        info!(
            connected,
            configured = self.config.servers.len(),
            "Registry connected"
        );
        connected
    }

    /// Tear down and re-establish one server (the only path that revives a
    /// lost session — there is no automatic reconnect).
    pub async fn reconnect(&self, name: &str) -> Result<()> {
        let spec = self
            .config
            .server(name)
            .cloned()
            .ok_or_else(|| GatewayError::Config(format!("unknown server '{name}'")))?;

        if let Some(old) = self.sessions.write().await.remove(name) {
            old.disconnect(Duration::from_secs(2)).await;
        }

        let session = ServerSession::connect(spec, self.handshake_timeout).await?;
        self.sessions.write().await.insert(name.to_string(), session);
        Ok(())
    }

    pub async fn session(&self, name: &str) -> Option<Arc<ServerSession>> {
        self.sessions.read().await.get(name).cloned()
    }

    /// Status rows for every configured server, enabled and staged alike.
    pub async fn list_servers(&self) -> Vec<ServerStatus> {
        let sessions = self.sessions.read().await;
        let mut rows: Vec<ServerStatus> = self
            .config
            .servers
            .iter()
            .map(|spec| {
                let session = sessions.get(&spec.name);
                let ready = session.map(|s| s.is_ready()).unwrap_or(false);
                ServerStatus {
                    name: spec.name.clone(),
                    ready,
                    tool_count: if ready {
                        session.map(|s| s.tools().len()).unwrap_or(0)
                    } else {
                        0
                    },
                    description: spec.description.clone(),
                }
            })
            .collect();

        for spec in &self.config.disabled {
            rows.push(ServerStatus {
                name: spec.name.clone(),
                ready: false,
                tool_count: 0,
                description: Some(match &spec.description {
                    Some(d) => format!("{d} (disabled)"),
                    None => "(disabled)".to_string(),
                }),
            });
        }
        rows
    }

    /// The tool catalog: one server's tools, or the union across every ready
    /// session when `server` is `None`.
    pub async fn list_tools(&self, server: Option<&str>) -> Vec<ToolDescriptor> {
        let sessions = self.sessions.read().await;
        let mut tools = Vec::new();
        match server {
            Some(name) => {
                if let Some(session) = sessions.get(name)
                    && session.is_ready()
                {
                    tools.extend(session.tools());
                }
            }
            None => {
                // Stable order for prompts and listings
                let mut names: Vec<&String> = sessions.keys().collect();
                names.sort();
                for name in names {
                    let session = &sessions[name];
                    if session.is_ready() {
                        tools.extend(session.tools());
                    }
                }
            }
        }
        tools
    }

    /// Look up one tool in the aggregated catalog.
    pub async fn find_tool(&self, server: &str, tool: &str) -> Option<ToolDescriptor> {
        let session = self.session(server).await?;
        if !session.is_ready() {
            return None;
        }
        session.tools().into_iter().find(|t| t.tool_name == tool)
    }

    /// Invoke one tool through the resilience middleware.
    ///
    /// Calls to unknown or disconnected servers fail fast with a clear kind.
    /// Results of tools the server marked read-only are cached in the
    /// `general` cache keyed by (server, tool, args).
    pub async fn call_tool(
        &self,
        middleware: &Middleware,
        server: &str,
        tool: &str,
        args: Value,
        timeout: Duration,
    ) -> ToolResult {
        let started = Instant::now();
        let outcome = self.call_tool_inner(middleware, server, tool, &args, timeout).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(content) => ToolResult {
                success: true,
                content,
                error: None,
                duration_ms,
                server_name: server.to_string(),
                tool_name: tool.to_string(),
            },
            Err(e) => ToolResult {
                success: false,
                content: String::new(),
                error: Some(e.to_user_string()),
                duration_ms,
                server_name: server.to_string(),
                tool_name: tool.to_string(),
            },
        }
    }

    async fn call_tool_inner(
        &self,
        middleware: &Middleware,
        server: &str,
        tool: &str,
        args: &Value,
        timeout: Duration,
    ) -> Result<String> {
        let session = self
            .session(server)
            .await
            .ok_or_else(|| GatewayError::ConnectionLost(server.to_string()))?;
        if !session.is_ready() {
            return Err(GatewayError::ConnectionLost(server.to_string()));
        }

        let cacheable = session
            .tools()
            .iter()
            .any(|t| t.tool_name == tool && t.read_only);

        let mut policy = CallPolicy::tool(server, tool, timeout);
        if cacheable {
            let args_canonical = serde_json::to_string(args).unwrap_or_default();
            policy = policy.with_cache(
                CacheName::General,
                cache_key(&[server, tool, &args_canonical]),
                None,
            );
        }

        middleware
            .guarded(&policy, || {
                let session = Arc::clone(&session);
                let args = args.clone();
                let tool = tool.to_string();
                async move { session.call_tool(&tool, args, timeout).await }
            })
            .await
    }

    /// Disconnect every session in parallel with a bounded grace window.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<ServerSession>> = {
            let mut guard = self.sessions.write().await;
            guard.drain().map(|(_, s)| s).collect()
        };
        if sessions.is_empty() {
            return;
        }
        info!(count = sessions.len(), "Disconnecting tool servers");
        futures::future::join_all(
            sessions
                .iter()
                .map(|session| session.disconnect(SHUTDOWN_GRACE)),
        )
        .await;
    }
}
