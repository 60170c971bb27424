// crates/recall-server/src/mcp/tools.rs
// Tool registry: declared input schemas, validation, handlers

use recall_types::{MemoryType, Scope};
use serde_json::{Value, json};

use crate::db::ContextFilter;
use crate::error::{RecallError, Result};
use crate::service::{MemoryInput, PreferenceInput, SearchFilters};

use super::ServerState;
use super::protocol::McpTool;

/// All registered tools with their JSON-Schema input specs.
pub fn tool_registry() -> Vec<McpTool> {
    vec![
        McpTool {
            name: "store_memory".to_string(),
            description: "Store a memory (preference, correction, knowledge, event). \
                          Identical content under a different key is deduplicated."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "content": { "type": "string" },
                    "type": { "type": "string" },
                    "metadata": { "type": "object" }
                },
                "required": ["content"]
            }),
        },
        McpTool {
            name: "retrieve_memory".to_string(),
            description: "Fetch a memory by id, or run a ranked query. At least one of \
                          id/query is required."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string" },
                    "query": { "type": "string" },
                    "limit": { "type": "integer", "minimum": 1, "maximum": 10 }
                }
            }),
        },
        McpTool {
            name: "search".to_string(),
            description: "Relevance-ranked hybrid search over stored memories.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "filters": {
                        "type": "object",
                        "properties": {
                            "project_id": { "type": "string" },
                            "file_path": { "type": "string" },
                            "type": { "type": "string" }
                        }
                    },
                    "limit": { "type": "integer", "minimum": 1, "maximum": 10 }
                },
                "required": ["query"]
            }),
        },
        McpTool {
            name: "store_preferences".to_string(),
            description: "Store a batch of confirmed user preferences.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "preferences": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "key": { "type": "string" },
                                "value": {},
                                "confidence": { "type": "number", "minimum": 0.0, "maximum": 1.0 },
                                "reasoning": { "type": "string" }
                            },
                            "required": ["key", "value", "confidence"]
                        }
                    }
                },
                "required": ["preferences"]
            }),
        },
        McpTool {
            name: "get_stats".to_string(),
            description: "Store statistics: totals, per-type counts, size.".to_string(),
            input_schema: json!({ "type": "object", "properties": {} }),
        },
        McpTool {
            name: "clear_context".to_string(),
            description: "Clear context-typed memories. Requires confirm: true.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "confirm": { "type": "boolean", "const": true }
                },
                "required": ["confirm"]
            }),
        },
        McpTool {
            name: "delete_memory".to_string(),
            description: "Hard-delete one memory by key.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "key": { "type": "string" }
                },
                "required": ["key"]
            }),
        },
        McpTool {
            name: "compact_memory".to_string(),
            description: "Compact the store: drop soft-deleted rows, collapse duplicates, \
                          vacuum. dry_run reports without mutating."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "dry_run": { "type": "boolean" }
                }
            }),
        },
        McpTool {
            name: "queue_stats".to_string(),
            description: "Work-queue message counts by status.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "queue_name": { "type": "string" }
                }
            }),
        },
    ]
}

/// Look up one tool by name.
pub fn find_tool(name: &str) -> Option<McpTool> {
    tool_registry().into_iter().find(|t| t.name == name)
}

/// Validation failure: message plus the offending path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    pub message: String,
    pub path: String,
}

/// Validate a value against the subset of JSON Schema the registry uses:
/// type, properties, required, items, enum, const, minimum, maximum.
pub fn validate_input(schema: &Value, value: &Value) -> std::result::Result<(), SchemaViolation> {
    validate_at(schema, value, "")
}

fn violation(message: impl Into<String>, path: &str) -> SchemaViolation {
    SchemaViolation {
        message: message.into(),
        path: if path.is_empty() { "/".to_string() } else { path.to_string() },
    }
}

fn validate_at(
    schema: &Value,
    value: &Value,
    path: &str,
) -> std::result::Result<(), SchemaViolation> {
    if let Some(expected) = schema.get("const")
        && value != expected
    {
        return Err(violation(format!("expected constant {expected}"), path));
    }

    if let Some(options) = schema.get("enum").and_then(|e| e.as_array())
        && !options.contains(value)
    {
        return Err(violation("value not in enum", path));
    }

    let Some(expected_type) = schema.get("type").and_then(|t| t.as_str()) else {
        return Ok(());
    };

    let matches = match expected_type {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
    };
    if !matches {
        return Err(violation(format!("expected {expected_type}"), path));
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = schema.get("minimum").and_then(|m| m.as_f64())
            && n < min
        {
            return Err(violation(format!("below minimum {min}"), path));
        }
        if let Some(max) = schema.get("maximum").and_then(|m| m.as_f64())
            && n > max
        {
            return Err(violation(format!("above maximum {max}"), path));
        }
    }

    if let Value::Object(map) = value {
        if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
            for field in required.iter().filter_map(|f| f.as_str()) {
                if !map.contains_key(field) {
                    return Err(violation(
                        format!("missing required field {field}"),
                        &format!("{path}/{field}"),
                    ));
                }
            }
        }
        if let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) {
            for (field, field_schema) in properties {
                if let Some(field_value) = map.get(field) {
                    validate_at(field_schema, field_value, &format!("{path}/{field}"))?;
                }
            }
        }
    }

    if let (Value::Array(items), Some(item_schema)) = (value, schema.get("items")) {
        for (i, item) in items.iter().enumerate() {
            validate_at(item_schema, item, &format!("{path}/{i}"))?;
        }
    }

    Ok(())
}

/// Execute a validated tool call.
pub async fn dispatch_tool(state: &ServerState, name: &str, args: &Value) -> Result<Value> {
    match name {
        "store_memory" => store_memory(state, args).await,
        "retrieve_memory" => retrieve_memory(state, args).await,
        "search" => search(state, args).await,
        "store_preferences" => store_preferences(state, args).await,
        "get_stats" => get_stats(state).await,
        "clear_context" => clear_context(state).await,
        "delete_memory" => delete_memory(state, args).await,
        "compact_memory" => compact_memory(state, args).await,
        "queue_stats" => queue_stats(state, args).await,
        other => Err(RecallError::Validation(format!("unknown tool {other}"))),
    }
}

fn str_arg(args: &Value, field: &str) -> Option<String> {
    args.get(field).and_then(|v| v.as_str()).map(String::from)
}

fn usize_arg(args: &Value, field: &str) -> Option<usize> {
    args.get(field).and_then(|v| v.as_u64()).map(|n| n as usize)
}

async fn store_memory(state: &ServerState, args: &Value) -> Result<Value> {
    let content = str_arg(args, "content")
        .ok_or_else(|| RecallError::Validation("content is required".into()))?;
    let memory_type = str_arg(args, "type").map(|t| MemoryType::from(t.as_str()));
    let metadata = args.get("metadata").cloned();

    let result = state
        .service
        .store(MemoryInput {
            memory_type,
            value: Value::String(content),
            metadata,
            ..Default::default()
        })
        .await?;

    state
        .sessions
        .note_memory_reference(&state.session_id, &result.key);

    Ok(json!({
        "id": result.key,
        "stored": true,
        "deduplicated": result.deduplicated,
    }))
}

async fn retrieve_memory(state: &ServerState, args: &Value) -> Result<Value> {
    let id = str_arg(args, "id");
    let query = str_arg(args, "query");
    let limit = usize_arg(args, "limit");

    match (id, query) {
        (Some(id), _) => {
            let memory = state.service.retrieve(&id).await?;
            state.sessions.note_memory_reference(&state.session_id, &memory.key);
            Ok(serde_json::to_value(memory)?)
        }
        (None, Some(query)) => {
            let hits = state
                .service
                .search(&query, &SearchFilters::default(), limit)
                .await?;
            for hit in &hits {
                state
                    .sessions
                    .note_memory_reference(&state.session_id, &hit.memory.key);
            }
            Ok(serde_json::to_value(hits)?)
        }
        (None, None) => Err(RecallError::Validation(
            "at least one of id/query is required".into(),
        )),
    }
}

async fn search(state: &ServerState, args: &Value) -> Result<Value> {
    let query = str_arg(args, "query")
        .ok_or_else(|| RecallError::Validation("query is required".into()))?;
    let limit = usize_arg(args, "limit");

    let filters = args
        .get("filters")
        .map(|f| SearchFilters {
            project_id: str_arg(f, "project_id"),
            file_path: str_arg(f, "file_path"),
            memory_type: str_arg(f, "type"),
        })
        .unwrap_or_default();

    let hits = state.service.search(&query, &filters, limit).await?;
    for hit in &hits {
        state
            .sessions
            .note_memory_reference(&state.session_id, &hit.memory.key);
    }
    Ok(serde_json::to_value(hits)?)
}

async fn store_preferences(state: &ServerState, args: &Value) -> Result<Value> {
    let entries = args
        .get("preferences")
        .and_then(|p| p.as_array())
        .ok_or_else(|| RecallError::Validation("preferences is required".into()))?;

    let mut preferences = Vec::with_capacity(entries.len());
    for entry in entries {
        preferences.push(PreferenceInput {
            key: str_arg(entry, "key")
                .ok_or_else(|| RecallError::Validation("preference key is required".into()))?,
            value: entry.get("value").cloned().unwrap_or(Value::Null),
            confidence: entry
                .get("confidence")
                .and_then(|c| c.as_f64())
                .ok_or_else(|| RecallError::Validation("confidence is required".into()))?,
            reasoning: str_arg(entry, "reasoning"),
        });
    }

    let stored = state.service.store_preferences(preferences).await?;
    Ok(json!({ "stored": stored }))
}

async fn get_stats(state: &ServerState) -> Result<Value> {
    let stats = state.service.get_stats().await?;
    Ok(serde_json::to_value(stats)?)
}

async fn clear_context(state: &ServerState) -> Result<Value> {
    let cleared = state.service.clear_context().await?;
    Ok(json!({ "cleared": true, "removed": cleared }))
}

async fn delete_memory(state: &ServerState, args: &Value) -> Result<Value> {
    let key =
        str_arg(args, "key").ok_or_else(|| RecallError::Validation("key is required".into()))?;
    let deleted = state.service.delete(&key).await?;
    Ok(json!({ "deleted": deleted }))
}

async fn compact_memory(state: &ServerState, args: &Value) -> Result<Value> {
    let dry_run = args
        .get("dry_run")
        .and_then(|d| d.as_bool())
        .unwrap_or(false);
    let report = state.service.compact(dry_run).await?;
    Ok(serde_json::to_value(report)?)
}

async fn queue_stats(state: &ServerState, args: &Value) -> Result<Value> {
    let queue_name = str_arg(args, "queue_name");
    let stats = state.queue.stats(queue_name.as_deref()).await?;
    Ok(serde_json::to_value(stats)?)
}

/// Memories for the active context resource view.
pub(super) async fn active_context(state: &ServerState) -> Result<Value> {
    let memories = state
        .service
        .search_by_context(
            ContextFilter {
                memory_type: Some(MemoryType::Context.as_str().to_string()),
                ..Default::default()
            },
            50,
        )
        .await?;
    Ok(serde_json::to_value(memories)?)
}

/// All stored preferences for the resource view, universal scope first.
pub(super) async fn all_preferences(state: &ServerState) -> Result<Value> {
    let mut memories = state
        .service
        .search_by_context(
            ContextFilter {
                memory_type: Some(MemoryType::Preference.as_str().to_string()),
                ..Default::default()
            },
            200,
        )
        .await?;
    memories.sort_by_key(|m| matches!(m.scope, Scope::Project));
    Ok(serde_json::to_value(memories)?)
}
