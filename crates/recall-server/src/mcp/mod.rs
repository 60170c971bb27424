// crates/recall-server/src/mcp/mod.rs
// JSON-RPC tool surface: state, method router, stdio transport

pub mod prompts;
pub mod protocol;
pub mod rate_limit;
pub mod resources;
pub mod router;
pub mod server;
pub mod session;
pub mod tools;

use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::ports::Clock;
use crate::queue::QueueService;
use crate::service::MemoryService;

use rate_limit::RateLimiter;
use session::SessionTracker;

/// Default per-tool execution timeout.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// How often idle sessions are swept.
const SESSION_JANITOR_INTERVAL: Duration = Duration::from_secs(60);

/// Shared state behind the tool surface.
pub struct ServerState {
    pub service: Arc<MemoryService>,
    pub queue: Arc<QueueService>,
    pub sessions: SessionTracker,
    pub limiter: RateLimiter,
    /// Session identity of this transport connection.
    pub session_id: String,
    pub tool_timeout: Duration,
}

impl ServerState {
    pub fn new(
        service: Arc<MemoryService>,
        queue: Arc<QueueService>,
        config: &Config,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Arc::new(Self {
            service,
            queue,
            sessions: SessionTracker::new(clock.clone()),
            limiter: RateLimiter::new(clock, config.rate_window_ms, config.rate_max),
            session_id: uuid::Uuid::new_v4().to_string(),
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        })
    }

    /// Start the idle-session janitor. Evicted sessions also drop their
    /// rate-limit buckets.
    pub fn spawn_session_janitor(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let state = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(SESSION_JANITOR_INTERVAL).await;
                let evicted = state.sessions.evict_idle();
                for session_id in &evicted {
                    state.limiter.forget(session_id);
                }
                if !evicted.is_empty() {
                    tracing::debug!(count = evicted.len(), "Evicted idle sessions");
                }
            }
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::db::pool::DatabasePool;
    use crate::ports::{ManualClock, UuidGen};

    /// Server state over a fresh in-memory database and manual clock.
    pub async fn setup_state() -> (Arc<ServerState>, Arc<ManualClock>) {
        let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let queue = Arc::new(QueueService::new(pool.clone(), clock.clone()));
        let service = Arc::new(MemoryService::new(
            pool,
            queue.clone(),
            None,
            clock.clone(),
            Arc::new(UuidGen),
            384,
        ));
        let config = Config::default();
        let state = ServerState::new(service, queue, &config, clock.clone());
        (state, clock)
    }
}
