// crates/recall-server/src/mcp/prompts.rs
// Named prompt templates rendered from stored memories

use serde_json::{Value, json};

use crate::db::memory::ranking::QueryContext;
use crate::error::{RecallError, Result};

use super::ServerState;
use super::protocol::{McpPrompt, McpPromptArgument};

pub const PROMPT_SESSION_CONTEXT: &str = "session-context";
pub const PROMPT_REMEMBER_PREFERENCES: &str = "remember-preferences";

/// All named prompt templates.
pub fn prompt_registry() -> Vec<McpPrompt> {
    vec![
        McpPrompt {
            name: PROMPT_SESSION_CONTEXT.to_string(),
            description: Some(
                "Context preamble built from the top-ranked memories for a project".to_string(),
            ),
            arguments: vec![McpPromptArgument {
                name: "project_id".to_string(),
                description: Some("Project to scope the context to".to_string()),
                required: false,
            }],
        },
        McpPrompt {
            name: PROMPT_REMEMBER_PREFERENCES.to_string(),
            description: Some("Stored preferences rendered as instructions".to_string()),
            arguments: vec![],
        },
    ]
}

/// Render one prompt with the given arguments.
pub async fn get_prompt(state: &ServerState, name: &str, arguments: &Value) -> Result<Value> {
    let text = match name {
        PROMPT_SESSION_CONTEXT => {
            let project_id = arguments
                .get("project_id")
                .and_then(|p| p.as_str())
                .map(String::from);
            render_session_context(state, project_id).await?
        }
        PROMPT_REMEMBER_PREFERENCES => render_preferences(state).await?,
        other => return Err(RecallError::NotFound(format!("prompt {other}"))),
    };

    Ok(json!({
        "messages": [{
            "role": "user",
            "content": { "type": "text", "text": text }
        }]
    }))
}

async fn render_session_context(state: &ServerState, project_id: Option<String>) -> Result<String> {
    let hits = state
        .service
        .find_relevant(
            QueryContext {
                project_id,
                ..Default::default()
            },
            Some(10),
        )
        .await?;

    if hits.is_empty() {
        return Ok("No stored context for this session yet.".to_string());
    }

    let mut lines = vec!["Relevant context from previous sessions:".to_string()];
    for hit in hits {
        lines.push(format!(
            "- [{}] {}",
            hit.memory.memory_type,
            value_summary(&hit.memory.value)
        ));
    }
    Ok(lines.join("\n"))
}

async fn render_preferences(state: &ServerState) -> Result<String> {
    let prefs = super::tools::all_preferences(state).await?;
    let Some(entries) = prefs.as_array().filter(|e| !e.is_empty()) else {
        return Ok("No stored preferences.".to_string());
    };

    let mut lines = vec!["Follow these stored user preferences:".to_string()];
    for entry in entries {
        if let Some(value) = entry.get("value") {
            lines.push(format!("- {}", value_summary(value)));
        }
    }
    Ok(lines.join("\n"))
}

/// Single-line rendering of a memory value for prompt text.
fn value_summary(value: &Value) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.len() > 200 {
        let mut end = 200;
        while !collapsed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &collapsed[..end])
    } else {
        collapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_shapes() {
        let prompts = prompt_registry();
        assert_eq!(prompts.len(), 2);
        let ctx = prompts
            .iter()
            .find(|p| p.name == PROMPT_SESSION_CONTEXT)
            .unwrap();
        assert_eq!(ctx.arguments.len(), 1);
        assert!(!ctx.arguments[0].required);
    }

    #[test]
    fn test_value_summary_collapses_and_truncates() {
        assert_eq!(value_summary(&json!("a   b\n c")), "a b c");
        let long = "x".repeat(300);
        let summary = value_summary(&json!(long));
        assert!(summary.len() <= 203);
        assert!(summary.ends_with("..."));
    }
}
