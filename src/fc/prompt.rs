use std::fmt::Write as _;

use serde_json::Value;

use crate::fc::grammar::MARKER_GRAMMAR;
use crate::protocol::canonical::ToolDefinition;

// ---------------------------------------------------------------------------
// Tool list formatting
// ---------------------------------------------------------------------------

const CONSTRAINT_KEYS: [&str; 8] = [
    "minimum",
    "maximum",
    "minLength",
    "maxLength",
    "pattern",
    "format",
    "minItems",
    "maxItems",
];

fn push_param_detail(out: &mut String, name: &str, info: &Value, required: &[&str]) {
    let p_type = info.get("type").and_then(Value::as_str).unwrap_or("any");
    let is_required = if required.contains(&name) { "yes" } else { "no" };
    let _ = writeln!(out, "  - {name} ({p_type}, required: {is_required})");

    if let Some(desc) = info.get("description").and_then(Value::as_str) {
        let desc = desc.lines().next().unwrap_or_default().trim();
        if !desc.is_empty() {
            let _ = writeln!(out, "    {desc}");
        }
    }
    if let Some(values) = info.get("enum") {
        let _ = writeln!(out, "    one of: {values}");
    }

    let mut constraints = serde_json::Map::new();
    for key in CONSTRAINT_KEYS {
        if let Some(val) = info.get(key) {
            constraints.insert(key.to_string(), val.clone());
        }
    }
    if p_type == "array" {
        if let Some(item_type) = info.pointer("/items/type") {
            constraints.insert("items.type".to_string(), item_type.clone());
        }
    }
    if !constraints.is_empty() {
        let _ = writeln!(out, "    constraints: {}", Value::Object(constraints));
    }
}

fn push_tool(out: &mut String, index: usize, tool: &ToolDefinition) {
    let _ = writeln!(out, "{}. {}", index + 1, tool.name);
    let desc = tool.description.trim();
    if !desc.is_empty() {
        // Client tool descriptions run to pages; the first paragraph is enough.
        let first = desc.split("\n\n").next().unwrap_or(desc);
        let _ = writeln!(out, "  {}", first.replace('\n', " "));
    }

    let required: Vec<&str> = tool
        .input_schema
        .get("required")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    match tool
        .input_schema
        .get("properties")
        .and_then(Value::as_object)
    {
        Some(props) if !props.is_empty() => {
            let _ = writeln!(out, "  parameters:");
            for (name, info) in props {
                push_param_detail(out, name, info, &required);
            }
        }
        _ => {
            let _ = writeln!(out, "  parameters: none");
        }
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Instruction block telling the backend how to request tool execution.
///
/// Returns an empty string when no tools are declared. The marker syntax
/// shown to the backend comes from [`MARKER_GRAMMAR`], the same grammar the
/// parser scans for.
#[must_use]
pub fn render_tool_instructions(tools: &[ToolDefinition]) -> String {
    if tools.is_empty() {
        return String::new();
    }

    let g = &MARKER_GRAMMAR;
    let mut out = String::with_capacity(1024 + tools.len() * 256);
    out.push_str("## Tool use\n\n");
    out.push_str(
        "You can act on the user's machine through the tools listed below. \
         You cannot run anything yourself; to use a tool, write a call in exactly this form:\n\n",
    );
    out.push_str(&g.render_call("ToolName", r#"{"param": "value"}"#));
    out.push_str("\n\nRules:\n");
    let _ = writeln!(
        out,
        "- The payload between {} and {} must be a single valid JSON object.",
        g.begin_marker("ToolName"),
        g.call_close
    );
    out.push_str("- Only call tools from the list below, using their exact names.\n");
    out.push_str("- Put complete file contents in the payload; never use placeholders.\n");
    out.push_str(
        "- Use POSIX shell commands only (ls, cat, rm, cp, mv), never Windows commands.\n",
    );
    let _ = writeln!(
        out,
        "- Stop after your calls and wait. Results arrive as {} blocks; never write those yourself.",
        g.result_open
    );
    out.push_str("- Never claim that something was created, installed or run before its result arrives.\n");

    out.push_str("\nAvailable tools:\n\n");
    for (index, tool) in tools.iter().enumerate() {
        push_tool(&mut out, index, tool);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write_tool() -> ToolDefinition {
        ToolDefinition {
            name: "Write".to_string(),
            description: "Writes a file to the local filesystem.\n\nUsage notes follow.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "file_path": {"type": "string", "description": "Absolute path"},
                    "content": {"type": "string"}
                },
                "required": ["file_path", "content"]
            }),
        }
    }

    #[test]
    fn no_tools_renders_nothing() {
        assert!(render_tool_instructions(&[]).is_empty());
    }

    #[test]
    fn instructions_use_marker_grammar_and_list_params() {
        let text = render_tool_instructions(&[write_tool()]);
        assert!(text.contains("[Tool Call: ToolName]"));
        assert!(text.contains("[/Tool Call]"));
        assert!(text.contains("1. Write"));
        assert!(text.contains("  Writes a file to the local filesystem."));
        assert!(!text.contains("Usage notes follow"));
        assert!(text.contains("  - file_path (string, required: yes)"));
        assert!(text.contains("    Absolute path"));
    }

    #[test]
    fn tool_without_properties_says_none() {
        let tool = ToolDefinition {
            name: "Ping".to_string(),
            description: String::new(),
            input_schema: json!({"type": "object"}),
        };
        let text = render_tool_instructions(&[tool]);
        assert!(text.contains("1. Ping\n  parameters: none"));
    }
}
