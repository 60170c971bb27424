// crates/recall-server/src/mcp/rate_limit.rs
// Per-session fixed-window rate limiter

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::ports::Clock;

struct Bucket {
    window_start: i64,
    count: u32,
}

/// Fixed-window request budget per session.
///
/// The window resets when now exceeds window_start + window_ms; until then
/// each non-exempt request consumes one unit of the budget.
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    window_ms: i64,
    max_requests: u32,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>, window_ms: i64, max_requests: u32) -> Self {
        Self {
            clock,
            window_ms,
            max_requests,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Consume one request from the session's budget.
    ///
    /// Err carries retry_after_ms: how long until the window resets.
    pub fn check(&self, session_id: &str) -> Result<(), i64> {
        let now = self.clock.now_ms();
        let mut buckets = self.buckets.lock().expect("rate limiter lock poisoned");

        let bucket = buckets.entry(session_id.to_string()).or_insert(Bucket {
            window_start: now,
            count: 0,
        });

        if now - bucket.window_start >= self.window_ms {
            bucket.window_start = now;
            bucket.count = 0;
        }

        if bucket.count >= self.max_requests {
            return Err((bucket.window_start + self.window_ms - now).max(0));
        }

        bucket.count += 1;
        Ok(())
    }

    /// Drop state for an evicted session.
    pub fn forget(&self, session_id: &str) {
        self.buckets
            .lock()
            .expect("rate limiter lock poisoned")
            .remove(session_id);
    }
}
