// crates/waypoint-server/src/agent/plan.rs
// Tool-selection planning: the analysis prompt, plan parsing, validation

use crate::utils::extract_llm_json;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;
use waypoint_types::{ToolCall, ToolDescriptor};

/// The JSON object the analysis step asks the model to produce.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolPlan {
    #[serde(default)]
    pub needs_tools: bool,
    #[serde(default)]
    pub tool_calls: Vec<PlannedCall>,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlannedCall {
    pub server: String,
    pub tool: String,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default)]
    pub purpose: String,
}

/// Parsing the model's plan is best-effort by nature, so "unparseable" is a
/// first-class outcome, not an error.
#[derive(Debug)]
pub enum PlanOutcome {
    Plan(ToolPlan),
    /// Diagnostic of why no strategy produced JSON.
    Unparseable(String),
}

/// Extract a [`ToolPlan`] from whatever the model returned (bare JSON,
/// fenced JSON, or JSON buried in prose).
pub fn parse_plan(content: &str) -> PlanOutcome {
    match extract_llm_json::<ToolPlan>(content) {
        Ok(plan) => PlanOutcome::Plan(plan),
        Err(diag) => PlanOutcome::Unparseable(diag),
    }
}

/// Render the analysis system prompt enumerating the live tool catalog.
pub fn selection_prompt(catalog: &[ToolDescriptor]) -> String {
    let mut out = String::from(
        "You are a tool-selection planner for a local AI gateway. \
         Decide whether the user's request needs any of the tools below.\n\n\
         Available tools:\n",
    );
    for tool in catalog {
        out.push_str(&format!(
            "- server \"{}\", tool \"{}\": {}\n  input: {}\n",
            tool.server_name,
            tool.tool_name,
            if tool.description.is_empty() {
                "(no description)"
            } else {
                &tool.description
            },
            summarize_schema(&tool.input_schema),
        ));
    }
    out.push_str(
        "\nRespond with ONLY a JSON object of this exact shape:\n\
         {\"needs_tools\": true|false, \"tool_calls\": [{\"server\": \"...\", \
         \"tool\": \"...\", \"parameters\": {...}, \"purpose\": \"...\"}], \
         \"reasoning\": \"...\"}\n\
         Use an empty tool_calls array when no tools are needed.",
    );
    out
}

/// One-line rendering of a JSON-schema-shaped input description.
fn summarize_schema(schema: &Value) -> String {
    let Some(props) = schema.get("properties").and_then(|v| v.as_object()) else {
        return "(no parameters)".to_string();
    };
    let required: Vec<&str> = schema
        .get("required")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    let fields: Vec<String> = props
        .iter()
        .map(|(name, prop)| {
            let ty = prop.get("type").and_then(|v| v.as_str()).unwrap_or("any");
            if required.contains(&name.as_str()) {
                format!("{name}: {ty} (required)")
            } else {
                format!("{name}: {ty}")
            }
        })
        .collect();
    if fields.is_empty() {
        "(no parameters)".to_string()
    } else {
        fields.join(", ")
    }
}

/// Check each planned call against the catalog: the (server, tool) pair must
/// exist and every schema-required parameter must be present. Invalid entries
/// are dropped with a warning; execution proceeds with the remainder.
pub fn validate_plan(plan: &ToolPlan, catalog: &[ToolDescriptor]) -> (Vec<ToolCall>, Vec<String>) {
    let mut valid = Vec::new();
    let mut warnings = Vec::new();

    for call in &plan.tool_calls {
        let Some(descriptor) = catalog
            .iter()
            .find(|t| t.server_name == call.server && t.tool_name == call.tool)
        else {
            let msg = format!("unknown tool {}.{}", call.server, call.tool);
            warn!(server = %call.server, tool = %call.tool, "Dropping planned call: unknown tool");
            warnings.push(msg);
            continue;
        };

        let args = match &call.parameters {
            Value::Object(_) => call.parameters.clone(),
            Value::Null => Value::Object(serde_json::Map::new()),
            other => {
                let msg = format!(
                    "{}.{}: parameters must be an object, got {other}",
                    call.server, call.tool
                );
                warn!(server = %call.server, tool = %call.tool, "Dropping planned call: non-object parameters");
                warnings.push(msg);
                continue;
            }
        };

        let missing: Vec<&str> = descriptor
            .required_params()
            .into_iter()
            .filter(|p| args.get(p).is_none())
            .collect();
        if !missing.is_empty() {
            let msg = format!(
                "{}.{}: missing required parameters {:?}",
                call.server, call.tool, missing
            );
            warn!(server = %call.server, tool = %call.tool, ?missing, "Dropping planned call: missing parameters");
            warnings.push(msg);
            continue;
        }

        valid.push(ToolCall {
            server_name: call.server.clone(),
            tool_name: call.tool.clone(),
            arguments: args,
            purpose: call.purpose.clone(),
        });
    }

    (valid, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn catalog() -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor {
                server_name: "filesystem".into(),
                tool_name: "read_file".into(),
                description: "Read a file from disk".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {"path": {"type": "string"}},
                    "required": ["path"]
                }),
                read_only: true,
            },
            ToolDescriptor {
                server_name: "memory".into(),
                tool_name: "store".into(),
                description: String::new(),
                input_schema: json!({"type": "object", "properties": {}}),
                read_only: false,
            },
        ]
    }

    #[test]
    fn test_parse_plan_direct() {
        let content = r#"{"needs_tools": true, "tool_calls": [{"server": "filesystem", "tool": "read_file", "parameters": {"path": "/tmp/x"}, "purpose": "read it"}], "reasoning": "user asked"}"#;
        match parse_plan(content) {
            PlanOutcome::Plan(plan) => {
                assert!(plan.needs_tools);
                assert_eq!(plan.tool_calls.len(), 1);
                assert_eq!(plan.tool_calls[0].server, "filesystem");
            }
            PlanOutcome::Unparseable(d) => panic!("unexpected: {d}"),
        }
    }

    #[test]
    fn test_parse_plan_fenced_with_prose() {
        let content = "Looking at the request, here's my plan:\n```json\n{\"needs_tools\": false, \"tool_calls\": [], \"reasoning\": \"chit-chat\"}\n```";
        assert!(matches!(parse_plan(content), PlanOutcome::Plan(p) if !p.needs_tools));
    }

    #[test]
    fn test_parse_plan_unparseable() {
        assert!(matches!(
            parse_plan("I think maybe use tools?"),
            PlanOutcome::Unparseable(_)
        ));
    }

    #[test]
    fn test_validate_keeps_good_drops_unknown() {
        let plan = ToolPlan {
            needs_tools: true,
            tool_calls: vec![
                PlannedCall {
                    server: "filesystem".into(),
                    tool: "read_file".into(),
                    parameters: json!({"path": "/tmp/hello.txt"}),
                    purpose: "read the file".into(),
                },
                PlannedCall {
                    server: "websearch".into(),
                    tool: "query".into(),
                    parameters: json!({}),
                    purpose: "hallucinated".into(),
                },
            ],
            reasoning: String::new(),
        };
        let (valid, warnings) = validate_plan(&plan, &catalog());
        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].tool_name, "read_file");
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("websearch.query"));
    }

    #[test]
    fn test_validate_drops_missing_required_param() {
        let plan = ToolPlan {
            needs_tools: true,
            tool_calls: vec![PlannedCall {
                server: "filesystem".into(),
                tool: "read_file".into(),
                parameters: json!({"file": "/oops/wrong-key"}),
                purpose: String::new(),
            }],
            reasoning: String::new(),
        };
        let (valid, warnings) = validate_plan(&plan, &catalog());
        assert!(valid.is_empty());
        assert!(warnings[0].contains("missing required"));
    }

    #[test]
    fn test_validate_rejects_non_object_parameters() {
        let plan = ToolPlan {
            needs_tools: true,
            tool_calls: vec![PlannedCall {
                server: "memory".into(),
                tool: "store".into(),
                parameters: json!("a string"),
                purpose: String::new(),
            }],
            reasoning: String::new(),
        };
        let (valid, warnings) = validate_plan(&plan, &catalog());
        assert!(valid.is_empty());
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_validate_null_parameters_become_empty_object() {
        let plan = ToolPlan {
            needs_tools: true,
            tool_calls: vec![PlannedCall {
                server: "memory".into(),
                tool: "store".into(),
                parameters: Value::Null,
                purpose: String::new(),
            }],
            reasoning: String::new(),
        };
        let (valid, _) = validate_plan(&plan, &catalog());
        assert_eq!(valid.len(), 1);
        assert!(valid[0].arguments.is_object());
    }

    #[test]
    fn test_selection_prompt_lists_tools_and_shape() {
        let prompt = selection_prompt(&catalog());
        assert!(prompt.contains("\"filesystem\""));
        assert!(prompt.contains("read_file"));
        assert!(prompt.contains("path: string (required)"));
        assert!(prompt.contains("needs_tools"));
    }

    #[test]
    fn test_summarize_schema_no_properties() {
        assert_eq!(summarize_schema(&json!({})), "(no parameters)");
        assert_eq!(summarize_schema(&Value::Null), "(no parameters)");
    }
}
