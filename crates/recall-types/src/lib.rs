// crates/recall-types/src/lib.rs

//! Shared data contracts between the Recall server and its clients.
//!
//! This crate provides the core domain model:
//! - **Memory**: one persistent fact/preference/correction/event
//! - **Queue**: durable work-queue messages and dead letters
//! - **Reports**: statistics and compaction summaries
//!
//! Kept dependency-light so clients can embed these types directly.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ===================================================
// MEMORY
// ===================================================

/// Kind of a memory. Well-known kinds get variants; anything else is
/// preserved verbatim as `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemoryType {
    Preference,
    Correction,
    ProjectKnowledge,
    ToolUse,
    Context,
    Pattern,
    Failure,
    AnalysisSuggestion,
    Custom(String),
}

impl MemoryType {
    pub fn as_str(&self) -> &str {
        match self {
            MemoryType::Preference => "preference",
            MemoryType::Correction => "correction",
            MemoryType::ProjectKnowledge => "project-knowledge",
            MemoryType::ToolUse => "tool-use",
            MemoryType::Context => "context",
            MemoryType::Pattern => "pattern",
            MemoryType::Failure => "failure",
            MemoryType::AnalysisSuggestion => "analysis-suggestion",
            MemoryType::Custom(s) => s.as_str(),
        }
    }
}

impl From<&str> for MemoryType {
    fn from(s: &str) -> Self {
        match s {
            "preference" => MemoryType::Preference,
            "correction" => MemoryType::Correction,
            "project-knowledge" => MemoryType::ProjectKnowledge,
            "tool-use" => MemoryType::ToolUse,
            "context" => MemoryType::Context,
            "pattern" => MemoryType::Pattern,
            "failure" => MemoryType::Failure,
            "analysis-suggestion" => MemoryType::AnalysisSuggestion,
            other => MemoryType::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MemoryType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MemoryType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(MemoryType::from(s.as_str()))
    }
}

/// Applicability of a memory: everywhere, or one project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Universal,
    Project,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Universal => "universal",
            Scope::Project => "project",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "project" => Scope::Project,
            _ => Scope::Universal,
        }
    }
}

/// One persistent memory record.
///
/// Identity is the `key`; access statistics (`access_count`,
/// `last_accessed`, `timestamp` on dedup touch) are mutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub key: String,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub value: Value,
    /// Hex SHA-256 over `type || 0x1F || canonical-JSON(value)`.
    /// `None` only for legacy rows awaiting backfill.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub scope: Scope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// Creation time, milliseconds since the epoch. Bumped on dedup touch.
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_accessed: Option<i64>,
    pub access_count: i64,
    /// Caller-assigned base weight in [0, 1].
    pub relevance_score: f64,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Fixed-dimension vector; length equals the embedder's declared dimension.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// A memory paired with its retrieval score.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredMemory {
    pub score: f64,
    #[serde(flatten)]
    pub memory: Memory,
}

// ===================================================
// QUEUE
// ===================================================

/// Queue message lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Retrying,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
            QueueStatus::Retrying => "retrying",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "processing" => QueueStatus::Processing,
            "completed" => QueueStatus::Completed,
            "failed" => QueueStatus::Failed,
            "retrying" => QueueStatus::Retrying,
            _ => QueueStatus::Pending,
        }
    }
}

/// One durable unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    pub id: i64,
    pub queue_name: String,
    pub message_type: String,
    pub payload: Value,
    /// [0, 100]; higher is claimed earlier.
    pub priority: i64,
    pub status: QueueStatus,
    pub retry_count: i64,
    pub max_retries: i64,
    /// Earliest eligible claim time, milliseconds since the epoch.
    pub scheduled_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<i64>,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Append-only copy of a message that exhausted its retry budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub id: i64,
    /// Id of the original queue message.
    pub message_id: i64,
    pub queue_name: String,
    pub message_type: String,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub retry_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub failed_at: i64,
}

// ===================================================
// REPORTS
// ===================================================

/// Store-wide statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total: i64,
    pub by_type: BTreeMap<String, i64>,
    pub size_bytes: i64,
}

/// Result (or dry-run projection) of a compaction pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompactReport {
    pub removed: i64,
    pub deduplicated: i64,
    pub before_size: i64,
    pub after_size: i64,
    pub dry_run: bool,
}

/// Per-queue message counts by status.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub retrying: i64,
}

impl QueueStats {
    pub fn total(&self) -> i64 {
        self.pending + self.processing + self.completed + self.failed + self.retrying
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_type_roundtrip() {
        for s in [
            "preference",
            "correction",
            "project-knowledge",
            "tool-use",
            "context",
            "pattern",
            "failure",
            "analysis-suggestion",
        ] {
            let t = MemoryType::from(s);
            assert_eq!(t.as_str(), s);
            assert!(!matches!(t, MemoryType::Custom(_)));
        }
    }

    #[test]
    fn test_memory_type_custom_preserved() {
        let t = MemoryType::from("build-flags");
        assert_eq!(t, MemoryType::Custom("build-flags".to_string()));
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(json, "\"build-flags\"");
        let back: MemoryType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn test_memory_serialize_type_field_name() {
        let m = Memory {
            key: "k".to_string(),
            memory_type: MemoryType::Preference,
            value: serde_json::json!({"pref": "tabs"}),
            content_hash: None,
            project_id: None,
            scope: Scope::Universal,
            file_path: None,
            timestamp: 1,
            last_accessed: None,
            access_count: 0,
            relevance_score: 1.0,
            is_active: true,
            metadata: None,
            embedding: None,
        };
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["type"], "preference");
        assert_eq!(json["scope"], "universal");
        assert!(json.get("embedding").is_none());
    }

    #[test]
    fn test_queue_status_roundtrip() {
        for s in ["pending", "processing", "completed", "failed", "retrying"] {
            assert_eq!(QueueStatus::parse(s).as_str(), s);
        }
        // Unknown strings fall back to pending
        assert_eq!(QueueStatus::parse("bogus"), QueueStatus::Pending);
    }

    #[test]
    fn test_scope_parse_defaults_to_universal() {
        assert_eq!(Scope::parse("project"), Scope::Project);
        assert_eq!(Scope::parse("anything-else"), Scope::Universal);
    }

    #[test]
    fn test_queue_stats_total() {
        let s = QueueStats {
            pending: 1,
            processing: 2,
            completed: 3,
            failed: 4,
            retrying: 5,
        };
        assert_eq!(s.total(), 15);
    }
}
