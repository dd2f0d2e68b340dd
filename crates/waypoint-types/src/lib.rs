// crates/waypoint-types/src/lib.rs

//! Shared data contracts between the Waypoint gateway core and its clients.
//!
//! This crate carries the domain model the gateway exposes to external
//! collaborators (terminal UI, web UI, API server):
//! - **Server descriptors**: static launch specs and live status rows
//! - **Tool catalog**: descriptors aggregated across connected servers
//! - **Tool invocations**: planned calls and their results
//! - **Activity log**: the append-only per-session record of agent decisions
//!
//! No gateway-internal dependencies are allowed here; everything is plain
//! serde-serializable data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ===================================================
// SERVER DESCRIPTORS
// ===================================================

/// Static descriptor of one tool server: how to launch it and what it is for.
///
/// Created at config load and immutable thereafter. The `name` is unique
/// within a registry and becomes part of every endpoint key
/// (`tool:<name>.<tool>`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSpec {
    /// Symbolic name, unique within a registry (config map key).
    #[serde(default)]
    pub name: String,
    /// Executable to launch.
    pub command: String,
    /// Argument list passed verbatim.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment overlay applied on top of the inherited environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Optional human description shown in server listings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One row of `list_servers()`: live status of a configured server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStatus {
    pub name: String,
    /// Whether the session completed its handshake and is accepting calls.
    pub ready: bool,
    /// Number of tools in the cached catalog (0 when not ready).
    pub tool_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// ===================================================
// TOOL CATALOG
// ===================================================

/// One entry of the aggregated tool catalog.
///
/// `input_schema` is the JSON-schema-shaped object the server advertised;
/// tool argument shapes arrive at runtime, so it stays a generic value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub server_name: String,
    pub tool_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_schema: serde_json::Value,
    /// Whether the server advertised the tool as read-only
    /// (`annotations.readOnlyHint`). Read-only tools are cacheable.
    #[serde(default)]
    pub read_only: bool,
}

impl ToolDescriptor {
    /// Endpoint key used by the resilience middleware for this tool.
    pub fn endpoint(&self) -> String {
        format!("tool:{}.{}", self.server_name, self.tool_name)
    }

    /// Names listed as required by the advertised input schema.
    pub fn required_params(&self) -> Vec<&str> {
        self.input_schema
            .get("required")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default()
    }
}

// ===================================================
// TOOL INVOCATIONS
// ===================================================

/// A planned tool invocation produced by the agent's analysis step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub server_name: String,
    pub tool_name: String,
    /// JSON-shaped argument tree, validated against the tool's input schema.
    #[serde(default)]
    pub arguments: serde_json::Value,
    /// Short rationale recorded in the activity log.
    #[serde(default)]
    pub purpose: String,
}

impl ToolCall {
    pub fn endpoint(&self) -> String {
        format!("tool:{}.{}", self.server_name, self.tool_name)
    }
}

/// Outcome of one executed tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    /// Text content extracted from the server's response (empty on failure).
    #[serde(default)]
    pub content: String,
    /// Short failure reason (stable kind tag + message) when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub server_name: String,
    pub tool_name: String,
}

// ===================================================
// ACTIVITY LOG
// ===================================================

/// What kind of agent decision an [`AgentAction`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// LLM tool-selection call at the start of a turn.
    Analysis,
    /// One executed tool invocation.
    ToolCall,
    /// Final prompt assembly + generation.
    Synthesis,
    /// A step that failed outside the tool-call path.
    Error,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Analysis => "analysis",
            ActionKind::ToolCall => "tool_call",
            ActionKind::Synthesis => "synthesis",
            ActionKind::Error => "error",
        }
    }
}

/// Immutable record of one agent decision or outcome.
///
/// Appended per session; persisted on shutdown or explicit save. Result
/// content is truncated at log time to bound memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentAction {
    pub timestamp: DateTime<Utc>,
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
    /// Truncated excerpt of the step's result or error.
    #[serde(default)]
    pub result_excerpt: String,
    pub success: bool,
    pub duration_ms: u64,
}
