// crates/recall-server/src/mcp/resources.rs
// URI-addressed read-only views over the store

use serde_json::{Value, json};

use crate::error::{RecallError, Result};

use super::ServerState;
use super::protocol::McpResource;
use super::tools;

pub const URI_PREFERENCES: &str = "memory://preferences/all";
pub const URI_ACTIVE_CONTEXT: &str = "memory://context/active";
pub const URI_STATS: &str = "memory://stats";

/// All readable resources.
pub fn resource_registry() -> Vec<McpResource> {
    vec![
        McpResource {
            uri: URI_PREFERENCES.to_string(),
            name: "All preferences".to_string(),
            description: Some("Stored user preferences, universal scope first".to_string()),
            mime_type: Some("application/json".to_string()),
        },
        McpResource {
            uri: URI_ACTIVE_CONTEXT.to_string(),
            name: "Active context".to_string(),
            description: Some("Active context-typed memories".to_string()),
            mime_type: Some("application/json".to_string()),
        },
        McpResource {
            uri: URI_STATS.to_string(),
            name: "Store statistics".to_string(),
            description: Some("Totals, per-type counts, database size".to_string()),
            mime_type: Some("application/json".to_string()),
        },
    ]
}

/// Read one resource by URI.
pub async fn read_resource(state: &ServerState, uri: &str) -> Result<Value> {
    let body = match uri {
        URI_PREFERENCES => tools::all_preferences(state).await?,
        URI_ACTIVE_CONTEXT => tools::active_context(state).await?,
        URI_STATS => serde_json::to_value(state.service.get_stats().await?)?,
        other => return Err(RecallError::NotFound(format!("resource {other}"))),
    };

    Ok(json!({
        "contents": [{
            "uri": uri,
            "mimeType": "application/json",
            "text": body.to_string(),
        }]
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lists_three_views() {
        let uris: Vec<String> = resource_registry().into_iter().map(|r| r.uri).collect();
        assert!(uris.contains(&URI_PREFERENCES.to_string()));
        assert!(uris.contains(&URI_ACTIVE_CONTEXT.to_string()));
        assert!(uris.contains(&URI_STATS.to_string()));
    }
}
