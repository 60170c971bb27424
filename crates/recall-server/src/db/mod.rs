// crates/recall-server/src/db/mod.rs
// Database layer: pooled SQLite access plus synchronous row operations

pub mod memory;
mod migration_helpers;
pub mod pool;
pub mod queue;
pub mod schema;
#[cfg(test)]
pub mod test_support;

pub use memory::{
    ContextFilter, SaveMemoryParams, SaveOutcome, clear_memories_sync, compact_sync,
    database_size_sync, delete_memory_sync, get_memory_sync, keyword_candidates_sync,
    parse_memory_row, retrieve_memory_sync, save_memory_sync, search_by_context_sync,
    similarity_candidates_sync, stats_sync, store_embedding_sync,
};
pub use migration_helpers::{add_column_if_missing, column_exists, create_table_if_missing,
    table_exists};
pub use pool::DatabasePool;
pub use queue::{
    EnqueueParams, FailOutcome, MAX_PAYLOAD_BYTES, RetryPolicy, claim_sync, compute_retry_delay,
    dead_letters_sync, enqueue_batch_sync, enqueue_sync, mark_completed_sync, mark_failed_sync,
    queue_stats_sync, revert_stuck_sync, sweep_completed_sync,
};
