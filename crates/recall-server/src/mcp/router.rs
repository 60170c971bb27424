// crates/recall-server/src/mcp/router.rs
// Method dispatch for the JSON-RPC surface

use std::sync::Arc;

use serde_json::{Value, json};

use crate::error::RecallError;

use super::ServerState;
use super::protocol::{
    INTERNAL_ERROR, JsonRpcError, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION,
};
use super::session::SessionTracker;
use super::{prompts, resources, tools};

/// Dispatch one request. Notifications produce no response.
pub async fn dispatch(state: &Arc<ServerState>, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
    if request.jsonrpc != "2.0" {
        let error = JsonRpcError::invalid_request("jsonrpc must be \"2.0\"");
        return Some(JsonRpcResponse::failure(request.id, error));
    }

    if request.is_notification() {
        // Only lifecycle notifications are expected; all are ignored
        tracing::debug!(method = %request.method, "Ignoring notification");
        return None;
    }

    let id = request.id.clone();
    let params = request.params.unwrap_or_else(|| json!({}));

    // initialize and ping are exempt from rate limiting
    let exempt = matches!(request.method.as_str(), "initialize" | "ping");
    if !exempt && let Err(retry_after_ms) = state.limiter.check(&state.session_id) {
        return Some(JsonRpcResponse::failure(
            id,
            JsonRpcError::rate_limited(retry_after_ms),
        ));
    }

    let result = match request.method.as_str() {
        "initialize" => Ok(initialize_result()),
        "ping" => Ok(json!({})),
        "tools/list" => Ok(json!({ "tools": tools::tool_registry() })),
        "tools/call" => return Some(handle_tool_call(state, id, &params).await),
        "resources/list" => Ok(json!({ "resources": resources::resource_registry() })),
        "resources/read" => match params.get("uri").and_then(|u| u.as_str()) {
            Some(uri) => resources::read_resource(state, uri)
                .await
                .map_err(|e| error_for(&e)),
            None => Err(JsonRpcError::invalid_params("uri is required", "/uri")),
        },
        "prompts/list" => Ok(json!({ "prompts": prompts::prompt_registry() })),
        "prompts/get" => match params.get("name").and_then(|n| n.as_str()) {
            Some(name) => {
                let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
                prompts::get_prompt(state, name, &arguments)
                    .await
                    .map_err(|e| error_for(&e))
            }
            None => Err(JsonRpcError::invalid_params("name is required", "/name")),
        },
        other => Err(JsonRpcError::method_not_found(other)),
    };

    Some(match result {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(error) => JsonRpcResponse::failure(id, error),
    })
}

fn initialize_result() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "serverInfo": {
            "name": "recall",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "capabilities": {
            "tools": {},
            "resources": {},
            "prompts": {},
        }
    })
}

/// tools/call: registry lookup, schema validation, duplicate short-circuit,
/// timed execution, action recording.
async fn handle_tool_call(
    state: &Arc<ServerState>,
    id: Option<Value>,
    params: &Value,
) -> JsonRpcResponse {
    let Some(name) = params.get("name").and_then(|n| n.as_str()) else {
        return JsonRpcResponse::failure(
            id,
            JsonRpcError::invalid_params("name is required", "/name"),
        );
    };
    let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

    let Some(tool) = tools::find_tool(name) else {
        return JsonRpcResponse::failure(id, JsonRpcError::tool_not_found(name));
    };

    if let Err(violation) = tools::validate_input(&tool.input_schema, &arguments) {
        return JsonRpcResponse::failure(
            id,
            JsonRpcError::invalid_params(violation.message, &violation.path),
        );
    }

    // Duplicate-action short-circuit: same normalized input within the last
    // three actions returns the recorded result without re-executing
    let action_key = SessionTracker::normalize_action_key(name, &arguments);
    if let Some(previous) = state.sessions.check_duplicate(&state.session_id, &action_key) {
        state.sessions.touch(&state.session_id);
        return JsonRpcResponse::success(
            id,
            json!({
                "duplicate": true,
                "previous_result": previous,
                "suggestion": format!(
                    "This {name} call repeats one of the last {} actions with identical \
                     input; returning the previous result without re-executing.",
                    super::session::DUPLICATE_WINDOW
                ),
            }),
        );
    }

    let execution = tokio::time::timeout(
        state.tool_timeout,
        tools::dispatch_tool(state, name, &arguments),
    )
    .await;

    match execution {
        Ok(Ok(result)) => {
            state
                .sessions
                .record_action(&state.session_id, &action_key, result.clone());
            JsonRpcResponse::success(id, result)
        }
        Ok(Err(error)) => JsonRpcResponse::failure(id, error_for(&error)),
        Err(_) => {
            tracing::warn!(tool = name, "Tool call timed out");
            JsonRpcResponse::failure(id, JsonRpcError::timeout())
        }
    }
}

/// Map an engine error onto the wire contract.
fn error_for(error: &RecallError) -> JsonRpcError {
    let code = error.jsonrpc_code();
    match error {
        RecallError::RateLimited { retry_after_ms } => JsonRpcError::rate_limited(*retry_after_ms),
        _ if code == INTERNAL_ERROR => {
            // Unknown kinds get a correlation id that also appears in the log
            let correlation_id = uuid::Uuid::new_v4().to_string();
            tracing::error!(correlation_id = %correlation_id, "Internal error: {}", error);
            JsonRpcError::internal(&correlation_id)
        }
        _ => JsonRpcError::new(code, error.to_string()),
    }
}
