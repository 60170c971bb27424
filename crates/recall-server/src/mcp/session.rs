// crates/recall-server/src/mcp/session.rs
// Session tracking: action ring buffer, duplicate detection, idle eviction

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::ports::Clock;
use crate::util::canonical_json;

/// Ring buffer capacity: last 50 actions per session.
pub const MAX_ACTIONS: usize = 50;

/// Duplicate detection looks at the last 3 actions.
pub const DUPLICATE_WINDOW: usize = 3;

/// Sessions idle this long are evicted (30 minutes).
pub const IDLE_EVICTION_MS: i64 = 30 * 60 * 1000;

/// One recorded tool invocation.
#[derive(Debug, Clone)]
pub struct ActionRecord {
    pub timestamp: i64,
    pub action_key: String,
    pub output: Value,
    pub turn_number: u64,
}

#[derive(Debug)]
struct SessionState {
    started_at: i64,
    last_activity: i64,
    tool_calls: u64,
    referenced_memories: Vec<String>,
    actions: VecDeque<ActionRecord>,
}

impl SessionState {
    fn new(now: i64) -> Self {
        Self {
            started_at: now,
            last_activity: now,
            tool_calls: 0,
            referenced_memories: Vec::new(),
            actions: VecDeque::with_capacity(MAX_ACTIONS),
        }
    }
}

/// Summary of one session for inspection.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub started_at: i64,
    pub last_activity: i64,
    pub tool_calls: u64,
    pub referenced_memories: Vec<String>,
}

/// In-memory session store with per-session locks.
///
/// The outer map lock is held only to find or insert the session entry;
/// action bookkeeping takes the per-session lock, so concurrent sessions
/// never contend with each other.
pub struct SessionTracker {
    clock: Arc<dyn Clock>,
    sessions: Mutex<HashMap<String, Arc<Mutex<SessionState>>>>,
}

impl SessionTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn session(&self, session_id: &str) -> Arc<Mutex<SessionState>> {
        let now = self.clock.now_ms();
        let mut sessions = self.sessions.lock().expect("session map lock poisoned");
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SessionState::new(now))))
            .clone()
    }

    /// Normalized action key: lowercased tool name + canonical JSON of the
    /// input with strings lowercased and whitespace collapsed.
    pub fn normalize_action_key(tool_name: &str, arguments: &Value) -> String {
        format!(
            "{}:{}",
            tool_name.to_lowercase(),
            canonical_json(&normalize_value(arguments))
        )
    }

    /// If the normalized key matches one of the last DUPLICATE_WINDOW
    /// actions, return that action's recorded output.
    pub fn check_duplicate(&self, session_id: &str, action_key: &str) -> Option<Value> {
        let session = self.session(session_id);
        let state = session.lock().expect("session lock poisoned");
        state
            .actions
            .iter()
            .rev()
            .take(DUPLICATE_WINDOW)
            .find(|a| a.action_key == action_key)
            .map(|a| a.output.clone())
    }

    /// Record a completed action; the ring buffer keeps the last 50.
    pub fn record_action(&self, session_id: &str, action_key: &str, output: Value) {
        let now = self.clock.now_ms();
        let session = self.session(session_id);
        let mut state = session.lock().expect("session lock poisoned");

        state.last_activity = now;
        state.tool_calls += 1;
        let turn_number = state.tool_calls;

        if state.actions.len() == MAX_ACTIONS {
            state.actions.pop_front();
        }
        state.actions.push_back(ActionRecord {
            timestamp: now,
            action_key: action_key.to_string(),
            output,
            turn_number,
        });
    }

    /// Remember which memory ids this session touched.
    pub fn note_memory_reference(&self, session_id: &str, key: &str) {
        let session = self.session(session_id);
        let mut state = session.lock().expect("session lock poisoned");
        if !state.referenced_memories.iter().any(|k| k == key) {
            state.referenced_memories.push(key.to_string());
        }
    }

    /// Bump last_activity without recording an action.
    pub fn touch(&self, session_id: &str) {
        let now = self.clock.now_ms();
        let session = self.session(session_id);
        session.lock().expect("session lock poisoned").last_activity = now;
    }

    pub fn summary(&self, session_id: &str) -> SessionSummary {
        let session = self.session(session_id);
        let state = session.lock().expect("session lock poisoned");
        SessionSummary {
            session_id: session_id.to_string(),
            started_at: state.started_at,
            last_activity: state.last_activity,
            tool_calls: state.tool_calls,
            referenced_memories: state.referenced_memories.clone(),
        }
    }

    /// Evict sessions idle past the threshold; returns evicted ids.
    pub fn evict_idle(&self) -> Vec<String> {
        let now = self.clock.now_ms();
        let mut sessions = self.sessions.lock().expect("session map lock poisoned");
        let stale: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| {
                let state = s.lock().expect("session lock poisoned");
                now - state.last_activity >= IDLE_EVICTION_MS
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            sessions.remove(id);
        }
        stale
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().expect("session map lock poisoned").len()
    }
}

/// Recursive input normalization: lowercase strings, collapse whitespace.
fn normalize_value(value: &Value) -> Value {
    match value {
        Value::String(s) => {
            let collapsed = s.split_whitespace().collect::<Vec<_>>().join(" ");
            Value::String(collapsed.to_lowercase())
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize_value).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), normalize_value(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}
