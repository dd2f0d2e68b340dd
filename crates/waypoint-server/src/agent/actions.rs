// crates/waypoint-server/src/agent/actions.rs
// Append-only activity log + session report persistence

use crate::error::{GatewayError, Result};
use crate::utils::excerpt;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;
use uuid::Uuid;
use waypoint_types::{ActionKind, AgentAction, ToolResult};

/// Result excerpts in the log are bounded to this many characters.
pub const EXCERPT_CHARS: usize = 500;

/// Per-session activity log. Append-only while the session runs; flushed to
/// disk on graceful shutdown or an explicit save command.
pub struct ActionLog {
    session_id: String,
    started_at: DateTime<Utc>,
    actions: Mutex<Vec<AgentAction>>,
}

impl ActionLog {
    pub fn new() -> Self {
        let full = Uuid::new_v4().to_string();
        Self {
            session_id: full[..8].to_string(),
            started_at: Utc::now(),
            actions: Mutex::new(Vec::new()),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn record_analysis(&self, reasoning: &str, success: bool, duration_ms: u64) {
        self.push(AgentAction {
            timestamp: Utc::now(),
            kind: ActionKind::Analysis,
            server: None,
            tool: None,
            purpose: "decide whether tools are needed".into(),
            parameters: Value::Null,
            result_excerpt: excerpt(reasoning, EXCERPT_CHARS),
            success,
            duration_ms,
        });
    }

    pub fn record_tool_call(&self, result: &ToolResult, purpose: &str, parameters: Value) {
        let raw = if result.success {
            result.content.as_str()
        } else {
            result.error.as_deref().unwrap_or("unknown failure")
        };
        self.push(AgentAction {
            timestamp: Utc::now(),
            kind: ActionKind::ToolCall,
            server: Some(result.server_name.clone()),
            tool: Some(result.tool_name.clone()),
            purpose: purpose.to_string(),
            parameters,
            result_excerpt: excerpt(raw, EXCERPT_CHARS),
            success: result.success,
            duration_ms: result.duration_ms,
        });
    }

    pub fn record_synthesis(&self, response: &str, success: bool, duration_ms: u64) {
        self.push(AgentAction {
            timestamp: Utc::now(),
            kind: ActionKind::Synthesis,
            server: None,
            tool: None,
            purpose: "assemble final answer".into(),
            parameters: Value::Null,
            result_excerpt: excerpt(response, EXCERPT_CHARS),
            success,
            duration_ms,
        });
    }

    pub fn record_error(&self, context: &str, detail: &str) {
        self.push(AgentAction {
            timestamp: Utc::now(),
            kind: ActionKind::Error,
            server: None,
            tool: None,
            purpose: context.to_string(),
            parameters: Value::Null,
            result_excerpt: excerpt(detail, EXCERPT_CHARS),
            success: false,
            duration_ms: 0,
        });
    }

    fn push(&self, action: AgentAction) {
        if let Ok(mut actions) = self.actions.lock() {
            actions.push(action);
        }
    }

    /// Snapshot of every action recorded so far.
    pub fn actions(&self) -> Vec<AgentAction> {
        self.actions.lock().map(|a| a.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.actions.lock().map(|a| a.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Render the report for the actions recorded so far (the `/report`
    /// command shows this without persisting anything).
    pub fn report_text(&self) -> String {
        self.render_report(&self.actions())
    }

    /// Persist the structured log and the human-readable report as sibling
    /// files in `dir`. Both are written atomically (temp file + rename).
    /// Returns the two paths.
    pub fn save(&self, dir: &Path) -> Result<(PathBuf, PathBuf)> {
        std::fs::create_dir_all(dir)?;
        let stamp = self.started_at.format("%Y%m%d_%H%M%S");

        let json_path = dir.join(format!("session_{}_{}.json", self.session_id, stamp));
        let report_path = dir.join(format!("report_session_{}_{}.txt", self.session_id, stamp));

        let actions = self.actions();
        let json = serde_json::to_string_pretty(&actions)?;
        write_atomic(&json_path, &json)?;
        write_atomic(&report_path, &self.render_report(&actions))?;

        info!(
            session = %self.session_id,
            actions = actions.len(),
            path = %json_path.display(),
            "Session activity saved"
        );
        Ok((json_path, report_path))
    }

    fn render_report(&self, actions: &[AgentAction]) -> String {
        let mut out = String::new();
        out.push_str("============================================================\n");
        out.push_str(" WAYPOINT SESSION REPORT\n");
        out.push_str("============================================================\n");
        out.push_str(&format!("Session:  {}\n", self.session_id));
        out.push_str(&format!(
            "Started:  {}\n",
            self.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        out.push_str(&format!(
            "Saved:    {}\n\n",
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
        ));

        for (i, action) in actions.iter().enumerate() {
            out.push_str(&format!(
                "[{}] {} at {}\n",
                i + 1,
                action.kind.as_str(),
                action.timestamp.format("%H:%M:%S")
            ));
            if let (Some(server), Some(tool)) = (&action.server, &action.tool) {
                out.push_str(&format!("    target:   {server}.{tool}\n"));
            }
            if !action.purpose.is_empty() {
                out.push_str(&format!("    purpose:  {}\n", action.purpose));
            }
            out.push_str(&format!(
                "    outcome:  {} ({} ms)\n",
                if action.success { "ok" } else { "FAILED" },
                action.duration_ms
            ));
            if !action.result_excerpt.is_empty() {
                out.push_str(&format!(
                    "    result:   {}\n",
                    action.result_excerpt.replace('\n', " ")
                ));
            }
            out.push('\n');
        }

        let tool_calls = actions.iter().filter(|a| a.kind == ActionKind::ToolCall);
        let (ok, failed): (Vec<_>, Vec<_>) = tool_calls.partition(|a| a.success);
        let total_ms: u64 = actions.iter().map(|a| a.duration_ms).sum();
        out.push_str("------------------------------------------------------------\n");
        out.push_str(&format!(
            "Totals: {} actions, {} tool calls ok, {} failed, {} ms\n",
            actions.len(),
            ok.len(),
            failed.len(),
            total_ms
        ));
        out
    }
}

impl Default for ActionLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Write-to-temp then rename, so readers never observe a partial file.
fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        GatewayError::Io(e)
    })
}
