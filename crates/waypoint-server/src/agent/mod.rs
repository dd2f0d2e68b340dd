// crates/waypoint-server/src/agent/mod.rs
// Single-turn orchestration: analyze → validate → execute → log → synthesize

pub mod actions;
pub mod plan;

pub use actions::{ActionLog, EXCERPT_CHARS};
pub use plan::{PlanOutcome, ToolPlan, parse_plan, selection_prompt, validate_plan};

use crate::llm::{GenerateRequest, LlmService};
use crate::middleware::Middleware;
use crate::registry::Registry;
use crate::utils::excerpt;
use std::time::{Duration, Instant};
use tracing::warn;
use waypoint_types::{AgentAction, ToolCall, ToolDescriptor, ToolResult};

/// Tool output injected into the synthesis prompt is bounded per tool.
const SYNTHESIS_TOOL_CHARS: usize = 4096;

const SYNTHESIS_SYSTEM: &str = "You are a helpful local assistant. Answer the user's request. \
     When tool results are provided, ground your answer in them and do not invent \
     results that are not there. Mention briefly when a tool failed.";

/// Everything a turn needs from the surrounding gateway, passed by reference
/// so tests can assemble the pieces without a full process context.
pub struct AgentDeps<'a> {
    pub registry: &'a Registry,
    pub middleware: &'a Middleware,
    pub llm: &'a LlmService,
    pub call_timeout: Duration,
}

/// What one turn produced: the answer, the actions it appended to the
/// activity log, and the failures surfaced in the answer's footer.
pub struct TurnOutput {
    pub response: String,
    pub actions: Vec<AgentAction>,
    /// (server.tool or validation stage, short reason)
    pub failures: Vec<(String, String)>,
}

/// The decision loop for one chat session. Holds the session's activity log;
/// turns are processed one at a time per session.
pub struct Agent {
    log: ActionLog,
}

impl Agent {
    pub fn new() -> Self {
        Self {
            log: ActionLog::new(),
        }
    }

    pub fn log(&self) -> &ActionLog {
        &self.log
    }

    /// Run one user turn to completion. Never fails outright: analysis or
    /// synthesis trouble degrades to the best answer available.
    pub async fn turn(
        &self,
        deps: &AgentDeps<'_>,
        user_message: &str,
        retrieved_context: Option<String>,
    ) -> TurnOutput {
        let turn_start = self.log.len();
        let catalog = deps.registry.list_tools(None).await;

        // 1. Analyze
        let plan = self.analyze(deps, &catalog, user_message).await;

        // 2. Validate
        let (calls, mut failures) = match &plan {
            Some(plan) if plan.needs_tools => {
                let (calls, warnings) = validate_plan(plan, &catalog);
                let failures = warnings
                    .into_iter()
                    .map(|w| ("plan".to_string(), w))
                    .collect();
                (calls, failures)
            }
            _ => (Vec::new(), Vec::new()),
        };

        // 3. Execute (independent calls run concurrently)
        let results = self.execute(deps, &calls).await;
        for (call, result) in calls.iter().zip(&results) {
            self.log
                .record_tool_call(result, &call.purpose, call.arguments.clone());
            if !result.success {
                failures.push((
                    format!("{}.{}", result.server_name, result.tool_name),
                    result.error.clone().unwrap_or_else(|| "failed".into()),
                ));
            }
        }

        // 4. Synthesize
        let mut response = self
            .synthesize(deps, user_message, retrieved_context, &calls, &results)
            .await;
        if !failures.is_empty() {
            response.push_str(&render_failure_footer(&failures));
        }

        TurnOutput {
            response,
            actions: self.log.actions().split_off(turn_start),
            failures,
        }
    }

    /// Ask the model which tools (if any) this turn needs. `None` means
    /// proceed without tools — empty catalog, unreachable model, or
    /// unparseable plan all degrade the same way.
    async fn analyze(
        &self,
        deps: &AgentDeps<'_>,
        catalog: &[ToolDescriptor],
        user_message: &str,
    ) -> Option<ToolPlan> {
        if catalog.is_empty() {
            self.log
                .record_analysis("no tool servers connected; generation-only turn", true, 0);
            return None;
        }

        let started = Instant::now();
        let request = GenerateRequest {
            prompt: user_message.to_string(),
            system: Some(selection_prompt(catalog)),
            context: None,
            model: None,
        };
        let reply = match deps.llm.generate(deps.middleware, request).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Analysis call failed; degrading to generation-only");
                self.log.record_analysis(
                    &format!("analysis unavailable: {}", e.to_user_string()),
                    false,
                    started.elapsed().as_millis() as u64,
                );
                return None;
            }
        };

        match parse_plan(&reply) {
            PlanOutcome::Plan(plan) => {
                let summary = if plan.reasoning.is_empty() {
                    excerpt(&reply, EXCERPT_CHARS)
                } else {
                    plan.reasoning.clone()
                };
                self.log
                    .record_analysis(&summary, true, started.elapsed().as_millis() as u64);
                Some(plan)
            }
            PlanOutcome::Unparseable(diag) => {
                warn!(diag = %diag, "Tool-selection output unparseable; no tools will run");
                self.log
                    .record_analysis(&diag, false, started.elapsed().as_millis() as u64);
                None
            }
        }
    }

    async fn execute(&self, deps: &AgentDeps<'_>, calls: &[ToolCall]) -> Vec<ToolResult> {
        futures::future::join_all(calls.iter().map(|call| {
            deps.registry.call_tool(
                deps.middleware,
                &call.server_name,
                &call.tool_name,
                call.arguments.clone(),
                deps.call_timeout,
            )
        }))
        .await
    }

    async fn synthesize(
        &self,
        deps: &AgentDeps<'_>,
        user_message: &str,
        retrieved_context: Option<String>,
        calls: &[ToolCall],
        results: &[ToolResult],
    ) -> String {
        let started = Instant::now();
        let tool_block = render_tool_results(calls, results);
        let prompt = if tool_block.is_empty() {
            user_message.to_string()
        } else {
            format!("{tool_block}\nUser request: {user_message}")
        };

        let request = GenerateRequest {
            prompt,
            system: Some(SYNTHESIS_SYSTEM.to_string()),
            context: retrieved_context,
            model: None,
        };
        match deps.llm.generate(deps.middleware, request).await {
            Ok(text) => {
                self.log
                    .record_synthesis(&text, true, started.elapsed().as_millis() as u64);
                text
            }
            Err(e) => {
                self.log.record_synthesis(
                    &e.to_user_string(),
                    false,
                    started.elapsed().as_millis() as u64,
                );
                // No generation available: fall back to raw tool output or an
                // honest error message
                if results.iter().any(|r| r.success) {
                    format!(
                        "The inference service is unavailable ({}); raw tool output follows.\n\n{tool_block}",
                        e.kind()
                    )
                } else {
                    format!(
                        "Unable to answer right now: the inference service is unavailable ({}).",
                        e.kind()
                    )
                }
            }
        }
    }
}

impl Default for Agent {
    fn default() -> Self {
        Self::new()
    }
}

/// Render executed tool calls for the synthesis prompt. Successful output is
/// bounded per tool; failures become one-line notes.
fn render_tool_results(calls: &[ToolCall], results: &[ToolResult]) -> String {
    let mut out = String::new();
    for (call, result) in calls.iter().zip(results) {
        if result.success {
            out.push_str(&format!(
                "### Result of {}.{}{}\n{}\n\n",
                result.server_name,
                result.tool_name,
                if call.purpose.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", call.purpose)
                },
                excerpt(&result.content, SYNTHESIS_TOOL_CHARS),
            ));
        } else {
            out.push_str(&format!(
                "### {}.{} failed: {}\n\n",
                result.server_name,
                result.tool_name,
                result.error.as_deref().unwrap_or("unknown reason"),
            ));
        }
    }
    out
}

/// The structured footer appended to answers when tool calls failed.
fn render_failure_footer(failures: &[(String, String)]) -> String {
    let mut out = String::from("\n\n---\nTool call issues:\n");
    for (target, reason) in failures {
        out.push_str(&format!("- {target}: {reason}\n"));
    }
    out
}
