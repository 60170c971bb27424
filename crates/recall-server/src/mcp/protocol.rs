// crates/recall-server/src/mcp/protocol.rs
// JSON-RPC 2.0 protocol types for the tool surface

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version advertised by initialize.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

// Error codes (JSON-RPC reserved range plus server-defined codes)
pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;
pub const RATE_LIMITED: i32 = -32000;
pub const TIMEOUT: i32 = -32001;
pub const TOOL_NOT_FOUND: i32 = -32002;

/// JSON-RPC 2.0 Request
///
/// The id is echoed verbatim (string or number); a request without an id is
/// a notification and gets no response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// JSON-RPC 2.0 Error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(code: i32, message: impl Into<String>, data: Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn parse_error(detail: impl Into<String>) -> Self {
        Self::new(PARSE_ERROR, format!("Parse error: {}", detail.into()))
    }

    pub fn invalid_request(detail: impl Into<String>) -> Self {
        Self::new(INVALID_REQUEST, format!("Invalid request: {}", detail.into()))
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    /// Invalid params with the offending path in data.
    pub fn invalid_params(message: impl Into<String>, path: &str) -> Self {
        Self::with_data(
            INVALID_PARAMS,
            format!("Invalid params: {}", message.into()),
            serde_json::json!({ "path": path }),
        )
    }

    pub fn tool_not_found(name: &str) -> Self {
        Self::new(TOOL_NOT_FOUND, format!("Tool not found: {name}"))
    }

    pub fn rate_limited(retry_after_ms: i64) -> Self {
        Self::with_data(
            RATE_LIMITED,
            "rate limit exceeded",
            serde_json::json!({ "retry_after_ms": retry_after_ms }),
        )
    }

    pub fn timeout() -> Self {
        Self::new(TIMEOUT, "timeout")
    }

    /// Internal error carrying a correlation id that also appears in the log.
    pub fn internal(correlation_id: &str) -> Self {
        Self::with_data(
            INTERNAL_ERROR,
            "internal error",
            serde_json::json!({ "correlation_id": correlation_id }),
        )
    }
}

/// JSON-RPC 2.0 Response
///
/// The id is always serialized: null identifies responses to unparsable
/// requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<Value>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// Tool definition surfaced by tools/list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpTool {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Resource definition surfaced by resources/list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpResource {
    pub uri: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Prompt definition surfaced by prompts/list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpPrompt {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub arguments: Vec<McpPromptArgument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpPromptArgument {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_with_string_id() {
        let json = r#"{"jsonrpc":"2.0","id":"abc","method":"ping"}"#;
        let req: JsonRpcRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.id, Some(Value::String("abc".to_string())));
        assert!(!req.is_notification());
    }

    #[test]
    fn test_parse_request_with_numeric_id() {
        let json = r#"{"jsonrpc":"2.0","id":7,"method":"tools/list","params":{}}"#;
        let req: JsonRpcRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.id, Some(serde_json::json!(7)));
    }

    #[test]
    fn test_notification_has_no_id() {
        let json = r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
        let req: JsonRpcRequest = serde_json::from_str(json).unwrap();
        assert!(req.is_notification());
    }

    #[test]
    fn test_response_serializes_null_id() {
        let resp = JsonRpcResponse::failure(None, JsonRpcError::parse_error("bad json"));
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json["id"].is_null());
        assert_eq!(json["error"]["code"], PARSE_ERROR);
    }

    #[test]
    fn test_success_response_roundtrip() {
        let resp = JsonRpcResponse::success(Some(serde_json::json!(1)), serde_json::json!({"ok": true}));
        let text = serde_json::to_string(&resp).unwrap();
        let back: JsonRpcResponse = serde_json::from_str(&text).unwrap();
        assert!(back.error.is_none());
        assert_eq!(back.result.unwrap()["ok"], true);
    }

    #[test]
    fn test_rate_limited_error_shape() {
        let err = JsonRpcError::rate_limited(1500);
        assert_eq!(err.code, RATE_LIMITED);
        assert_eq!(err.message, "rate limit exceeded");
        assert_eq!(err.data.unwrap()["retry_after_ms"], 1500);
    }

    #[test]
    fn test_invalid_params_carries_path() {
        let err = JsonRpcError::invalid_params("expected string", "/content");
        assert_eq!(err.code, INVALID_PARAMS);
        assert_eq!(err.data.unwrap()["path"], "/content");
    }
}
