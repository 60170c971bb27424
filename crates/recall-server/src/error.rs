// crates/recall-server/src/error.rs
// Standardized error types for Recall

use thiserror::Error;

/// Main error type for the Recall library
#[derive(Error, Debug)]
pub enum RecallError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("payload too large: {size} bytes (limit {limit})")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("rate limit exceeded")]
    RateLimited { retry_after_ms: i64 },

    #[error("timeout")]
    Timeout,

    #[error("queue error: {0}")]
    Queue(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("task cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown error: {0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Convenience type alias for Result using RecallError
pub type Result<T> = std::result::Result<T, RecallError>;

impl RecallError {
    /// JSON-RPC error code for this error at the tool surface.
    ///
    /// Codes follow the wire contract: -32602 invalid params, -32000 rate
    /// limit, -32001 timeout, -32003 storage, -32004 queue, -32603 internal.
    pub fn jsonrpc_code(&self) -> i32 {
        match self {
            RecallError::Validation(_) | RecallError::PayloadTooLarge { .. } => -32602,
            RecallError::RateLimited { .. } => -32000,
            RecallError::Timeout | RecallError::Cancelled => -32001,
            RecallError::NotFound(_)
            | RecallError::Db(_)
            | RecallError::Storage(_)
            | RecallError::Io(_) => -32003,
            RecallError::Queue(_) => -32004,
            RecallError::Json(_)
            | RecallError::Http(_)
            | RecallError::Embedding(_)
            | RecallError::Config(_)
            | RecallError::Other(_)
            | RecallError::Anyhow(_) => -32603,
        }
    }

    /// Convert to a user-facing string for tool boundaries
    pub fn to_user_string(&self) -> String {
        self.to_string()
    }
}

impl From<String> for RecallError {
    fn from(s: String) -> Self {
        RecallError::Other(s)
    }
}

impl From<tokio::task::JoinError> for RecallError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            RecallError::Cancelled
        } else {
            RecallError::Other(err.to_string())
        }
    }
}

impl From<RecallError> for String {
    fn from(err: RecallError) -> Self {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jsonrpc_code_mapping() {
        assert_eq!(RecallError::Validation("x".into()).jsonrpc_code(), -32602);
        assert_eq!(
            RecallError::PayloadTooLarge { size: 2, limit: 1 }.jsonrpc_code(),
            -32602
        );
        assert_eq!(
            RecallError::RateLimited { retry_after_ms: 10 }.jsonrpc_code(),
            -32000
        );
        assert_eq!(RecallError::Timeout.jsonrpc_code(), -32001);
        assert_eq!(RecallError::Storage("disk".into()).jsonrpc_code(), -32003);
        assert_eq!(RecallError::NotFound("k".into()).jsonrpc_code(), -32003);
        assert_eq!(RecallError::Queue("full".into()).jsonrpc_code(), -32004);
        assert_eq!(RecallError::Other("?".into()).jsonrpc_code(), -32603);
    }

    #[test]
    fn test_join_error_maps_to_cancelled() {
        // Cancelled task join errors should surface as Cancelled
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(async {
            let handle = tokio::spawn(async {
                tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            });
            handle.abort();
            let err = handle.await.unwrap_err();
            assert!(matches!(RecallError::from(err), RecallError::Cancelled));
        });
    }
}
