// crates/recall-server/src/db/queue.rs
// Durable work-queue row operations: enqueue, claim, terminal transitions,
// dead-lettering, sweeps

use recall_types::{DeadLetter, QueueMessage, QueueStats, QueueStatus};
use rusqlite::OptionalExtension;
use serde_json::Value;

use crate::error::RecallError;

/// Hard cap on serialized payload size (1 MiB).
pub const MAX_PAYLOAD_BYTES: usize = 1_048_576;

/// Retry budget applied when the enqueuer names none.
pub const DEFAULT_MAX_RETRIES: i64 = 3;

/// Retry backoff policy, configurable per queue.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_delay_ms: i64,
    pub max_delay_ms: i64,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 300_000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Jitter ceiling as a fraction of the unjittered delay.
const JITTER_MAX_FRACTION: f64 = 0.30;

/// Compute the retry delay for the n-th retry (1-based).
///
/// `delay = min(max, base * multiplier^(n-1) + jitter)` where jitter is
/// `jitter_frac` (uniform in [0, 1)) of up to 30% of the unjittered delay.
/// The jitter fraction is injected so tests stay deterministic.
pub fn compute_retry_delay(policy: &RetryPolicy, retry_count: i64, jitter_frac: f64) -> i64 {
    let exponent = (retry_count - 1).max(0) as i32;
    let unjittered = (policy.base_delay_ms as f64 * policy.backoff_multiplier.powi(exponent))
        .min(policy.max_delay_ms as f64);
    let jitter = jitter_frac.clamp(0.0, 1.0) * JITTER_MAX_FRACTION * unjittered;
    (unjittered + jitter).min(policy.max_delay_ms as f64) as i64
}

/// Parameters for enqueueing one message.
#[derive(Debug, Clone)]
pub struct EnqueueParams {
    pub queue_name: String,
    pub message_type: String,
    pub payload: Value,
    pub priority: i64,
    /// Per-message retry budget; None takes the queue default.
    pub max_retries: Option<i64>,
    /// Earliest eligible claim time; defaults to now.
    pub scheduled_at: Option<i64>,
    pub correlation_id: Option<String>,
    pub metadata: Option<Value>,
}

impl EnqueueParams {
    pub fn new(queue_name: &str, message_type: &str, payload: Value) -> Self {
        Self {
            queue_name: queue_name.to_string(),
            message_type: message_type.to_string(),
            payload,
            priority: 0,
            max_retries: None,
            scheduled_at: None,
            correlation_id: None,
            metadata: None,
        }
    }
}

/// Serialize and bound-check a payload before anything touches the table.
fn serialize_payload(payload: &Value) -> Result<String, RecallError> {
    let serialized = payload.to_string();
    if serialized.len() > MAX_PAYLOAD_BYTES {
        return Err(RecallError::PayloadTooLarge {
            size: serialized.len(),
            limit: MAX_PAYLOAD_BYTES,
        });
    }
    Ok(serialized)
}

/// Enqueue a message (sync version for pool.run()). Returns the new id.
///
/// Priority is clamped to [0, 100] and max_retries to [0, 10]. Payloads
/// over 1 MiB fail before any row is written.
pub fn enqueue_sync(
    conn: &rusqlite::Connection,
    params: &EnqueueParams,
    now_ms: i64,
) -> Result<i64, RecallError> {
    let payload = serialize_payload(&params.payload)?;
    insert_message(conn, params, &payload, now_ms)?;
    Ok(conn.last_insert_rowid())
}

/// Enqueue a batch atomically: either every message is written or none.
pub fn enqueue_batch_sync(
    conn: &rusqlite::Connection,
    batch: &[EnqueueParams],
    now_ms: i64,
) -> Result<Vec<i64>, RecallError> {
    // Validate every payload before the first insert
    let payloads: Vec<String> = batch
        .iter()
        .map(|p| serialize_payload(&p.payload))
        .collect::<Result<_, _>>()?;

    let tx = conn.unchecked_transaction()?;
    let mut ids = Vec::with_capacity(batch.len());
    for (params, payload) in batch.iter().zip(&payloads) {
        insert_message(&tx, params, payload, now_ms)?;
        ids.push(tx.last_insert_rowid());
    }
    tx.commit()?;
    Ok(ids)
}

fn insert_message(
    conn: &rusqlite::Connection,
    params: &EnqueueParams,
    payload: &str,
    now_ms: i64,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO queue_messages
             (queue_name, message_type, payload, priority, status, retry_count,
              max_retries, scheduled_at, created_at, correlation_id, metadata)
         VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, ?6, ?7, ?8, ?9)",
        rusqlite::params![
            params.queue_name,
            params.message_type,
            payload,
            params.priority.clamp(0, 100),
            params.max_retries.unwrap_or(DEFAULT_MAX_RETRIES).clamp(0, 10),
            params.scheduled_at.unwrap_or(now_ms),
            now_ms,
            params.correlation_id,
            params.metadata.as_ref().map(|m| m.to_string()),
        ],
    )?;
    Ok(())
}

const QUEUE_COLUMNS: &str = "id, queue_name, message_type, payload, priority, status, \
     retry_count, max_retries, scheduled_at, next_retry_at, created_at, processed_at, \
     correlation_id, metadata, error_message";

fn parse_queue_row(row: &rusqlite::Row) -> rusqlite::Result<QueueMessage> {
    let payload: String = row.get(3)?;
    let status: String = row.get(5)?;
    let metadata: Option<String> = row.get(13)?;
    Ok(QueueMessage {
        id: row.get(0)?,
        queue_name: row.get(1)?,
        message_type: row.get(2)?,
        payload: serde_json::from_str(&payload).unwrap_or(Value::Null),
        priority: row.get(4)?,
        status: QueueStatus::parse(&status),
        retry_count: row.get(6)?,
        max_retries: row.get(7)?,
        scheduled_at: row.get(8)?,
        next_retry_at: row.get(9)?,
        created_at: row.get(10)?,
        processed_at: row.get(11)?,
        correlation_id: row.get(12)?,
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
        error_message: row.get(14)?,
    })
}

/// Atomically claim up to `batch_size` eligible messages.
///
/// A single UPDATE ... RETURNING statement flips eligible rows to
/// `processing`, so two workers can never claim the same row: the row set
/// is selected and transitioned under one write lock.
pub fn claim_sync(
    conn: &rusqlite::Connection,
    queue_name: &str,
    batch_size: usize,
    now_ms: i64,
) -> rusqlite::Result<Vec<QueueMessage>> {
    let sql = format!(
        "UPDATE queue_messages
         SET status = 'processing', processed_at = ?1
         WHERE id IN (
             SELECT id FROM queue_messages
             WHERE queue_name = ?2
               AND status IN ('pending', 'retrying')
               AND scheduled_at <= ?1
               AND (next_retry_at IS NULL OR next_retry_at <= ?1)
             ORDER BY priority DESC, created_at ASC, id ASC
             LIMIT ?3
         )
         RETURNING {QUEUE_COLUMNS}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        rusqlite::params![now_ms, queue_name, batch_size as i64],
        parse_queue_row,
    )?;
    let mut claimed = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    // RETURNING order is unspecified; restore claim order
    claimed.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    });
    Ok(claimed)
}

/// Transition a claimed message to `completed`.
pub fn mark_completed_sync(
    conn: &rusqlite::Connection,
    id: i64,
    now_ms: i64,
) -> Result<(), RecallError> {
    let updated = conn.execute(
        "UPDATE queue_messages
         SET status = 'completed', processed_at = ?1
         WHERE id = ?2 AND status = 'processing'",
        rusqlite::params![now_ms, id],
    )?;
    if updated == 0 {
        return Err(RecallError::Queue(format!(
            "message {id} is not in processing state"
        )));
    }
    Ok(())
}

/// Terminal outcome of a failure transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailOutcome {
    /// Scheduled for another attempt.
    Retrying { next_retry_at: i64 },
    /// Retry budget exhausted; the dead-letter row id is returned.
    DeadLettered { dead_letter_id: i64 },
}

/// Transition a claimed message on failure: schedule a retry with backoff,
/// or mark `failed` and append a dead-letter row once the budget is spent.
pub fn mark_failed_sync(
    conn: &rusqlite::Connection,
    id: i64,
    error: &str,
    policy: &RetryPolicy,
    jitter_frac: f64,
    now_ms: i64,
) -> Result<FailOutcome, RecallError> {
    let row: Option<(i64, i64)> = conn
        .query_row(
            "SELECT retry_count, max_retries FROM queue_messages
             WHERE id = ?1 AND status = 'processing'",
            [id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;

    let Some((retry_count, max_retries)) = row else {
        return Err(RecallError::Queue(format!(
            "message {id} is not in processing state"
        )));
    };

    let new_count = retry_count + 1;
    if new_count > max_retries {
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE queue_messages
             SET status = 'failed', retry_count = ?1, error_message = ?2, processed_at = ?3
             WHERE id = ?4",
            rusqlite::params![max_retries, error, now_ms, id],
        )?;
        tx.execute(
            "INSERT INTO dead_letters
                 (message_id, queue_name, message_type, payload, correlation_id,
                  metadata, retry_count, error_message, failed_at)
             SELECT id, queue_name, message_type, payload, correlation_id,
                    metadata, retry_count, error_message, ?1
             FROM queue_messages WHERE id = ?2",
            rusqlite::params![now_ms, id],
        )?;
        let dead_letter_id = tx.last_insert_rowid();
        tx.commit()?;
        return Ok(FailOutcome::DeadLettered { dead_letter_id });
    }

    let delay = compute_retry_delay(policy, new_count, jitter_frac);
    let next_retry_at = now_ms + delay;
    conn.execute(
        "UPDATE queue_messages
         SET status = 'retrying', retry_count = ?1, next_retry_at = ?2, error_message = ?3
         WHERE id = ?4",
        rusqlite::params![new_count, next_retry_at, error, id],
    )?;
    Ok(FailOutcome::Retrying { next_retry_at })
}

/// Per-queue (or global) message counts by status.
pub fn queue_stats_sync(
    conn: &rusqlite::Connection,
    queue_name: Option<&str>,
) -> rusqlite::Result<QueueStats> {
    let (sql, params): (&str, Vec<Box<dyn rusqlite::ToSql>>) = match queue_name {
        Some(q) => (
            "SELECT status, COUNT(*) FROM queue_messages WHERE queue_name = ?1 GROUP BY status",
            vec![Box::new(q.to_string())],
        ),
        None => (
            "SELECT status, COUNT(*) FROM queue_messages GROUP BY status",
            vec![],
        ),
    };

    let mut stats = QueueStats::default();
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    for row in rows {
        let (status, count) = row?;
        match QueueStatus::parse(&status) {
            QueueStatus::Pending => stats.pending = count,
            QueueStatus::Processing => stats.processing = count,
            QueueStatus::Completed => stats.completed = count,
            QueueStatus::Failed => stats.failed = count,
            QueueStatus::Retrying => stats.retrying = count,
        }
    }
    Ok(stats)
}

/// Delete completed rows older than the retention period.
pub fn sweep_completed_sync(
    conn: &rusqlite::Connection,
    retention_ms: i64,
    now_ms: i64,
) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM queue_messages
         WHERE status = 'completed' AND processed_at < ?1",
        [now_ms - retention_ms],
    )
}

/// Revert stuck `processing` rows (older than the processing timeout).
///
/// Rows with retry budget left go back to `retrying` with an incremented
/// count and are immediately claimable; rows already at their budget are
/// failed and dead-lettered so retry_count never exceeds max_retries.
pub fn revert_stuck_sync(
    conn: &rusqlite::Connection,
    processing_timeout_ms: i64,
    now_ms: i64,
) -> rusqlite::Result<usize> {
    let cutoff = now_ms - processing_timeout_ms;

    let stuck: Vec<(i64, i64, i64)> = {
        let mut stmt = conn.prepare(
            "SELECT id, retry_count, max_retries FROM queue_messages
             WHERE status = 'processing' AND processed_at IS NOT NULL AND processed_at < ?1",
        )?;
        let rows = stmt.query_map([cutoff], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
    };

    for (id, retry_count, max_retries) in &stuck {
        if retry_count + 1 > *max_retries {
            conn.execute(
                "UPDATE queue_messages
                 SET status = 'failed', error_message = 'processing timeout', processed_at = ?1
                 WHERE id = ?2",
                rusqlite::params![now_ms, id],
            )?;
            conn.execute(
                "INSERT INTO dead_letters
                     (message_id, queue_name, message_type, payload, correlation_id,
                      metadata, retry_count, error_message, failed_at)
                 SELECT id, queue_name, message_type, payload, correlation_id,
                        metadata, retry_count, error_message, ?1
                 FROM queue_messages WHERE id = ?2",
                rusqlite::params![now_ms, id],
            )?;
        } else {
            conn.execute(
                "UPDATE queue_messages
                 SET status = 'retrying', retry_count = retry_count + 1, next_retry_at = ?1,
                     error_message = 'processing timeout'
                 WHERE id = ?2",
                rusqlite::params![now_ms, id],
            )?;
        }
    }

    if !stuck.is_empty() {
        tracing::warn!(count = stuck.len(), "Reverted stuck processing messages");
    }
    Ok(stuck.len())
}

/// List dead letters, most recent first.
pub fn dead_letters_sync(
    conn: &rusqlite::Connection,
    queue_name: Option<&str>,
    limit: usize,
) -> rusqlite::Result<Vec<DeadLetter>> {
    let (sql, params): (String, Vec<Box<dyn rusqlite::ToSql>>) = match queue_name {
        Some(q) => (
            "SELECT id, message_id, queue_name, message_type, payload, correlation_id,
                    metadata, retry_count, error_message, failed_at
             FROM dead_letters WHERE queue_name = ?1
             ORDER BY failed_at DESC LIMIT ?2"
                .to_string(),
            vec![Box::new(q.to_string()), Box::new(limit as i64)],
        ),
        None => (
            "SELECT id, message_id, queue_name, message_type, payload, correlation_id,
                    metadata, retry_count, error_message, failed_at
             FROM dead_letters
             ORDER BY failed_at DESC LIMIT ?1"
                .to_string(),
            vec![Box::new(limit as i64)],
        ),
    };

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| {
        let payload: String = row.get(4)?;
        let metadata: Option<String> = row.get(6)?;
        Ok(DeadLetter {
            id: row.get(0)?,
            message_id: row.get(1)?,
            queue_name: row.get(2)?,
            message_type: row.get(3)?,
            payload: serde_json::from_str(&payload).unwrap_or(Value::Null),
            correlation_id: row.get(5)?,
            metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
            retry_count: row.get(7)?,
            error_message: row.get(8)?,
            failed_at: row.get(9)?,
        })
    })?;
    rows.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::setup_test_connection;
    use serde_json::json;

    const NOW: i64 = 1_000_000;

    fn enqueue(conn: &rusqlite::Connection, priority: i64) -> i64 {
        let mut p = EnqueueParams::new("q", "job", json!({"n": priority}));
        p.priority = priority;
        enqueue_sync(conn, &p, NOW).unwrap()
    }

    #[test]
    fn test_priority_then_fifo_claim_order() {
        let conn = setup_test_connection();
        enqueue(&conn, 1);
        enqueue(&conn, 10);
        enqueue(&conn, 5);

        let claimed = claim_sync(&conn, "q", 3, NOW).unwrap();
        let priorities: Vec<i64> = claimed.iter().map(|m| m.priority).collect();
        assert_eq!(priorities, vec![10, 5, 1]);
        assert!(claimed.iter().all(|m| m.status == QueueStatus::Processing));
    }

    #[test]
    fn test_fifo_within_equal_priority() {
        let conn = setup_test_connection();
        let first = {
            let mut p = EnqueueParams::new("q", "job", json!({"n": 1}));
            p.priority = 5;
            enqueue_sync(&conn, &p, 100).unwrap()
        };
        let second = {
            let mut p = EnqueueParams::new("q", "job", json!({"n": 2}));
            p.priority = 5;
            enqueue_sync(&conn, &p, 200).unwrap()
        };

        let claimed = claim_sync(&conn, "q", 2, NOW).unwrap();
        assert_eq!(claimed[0].id, first);
        assert_eq!(claimed[1].id, second);
    }

    #[test]
    fn test_claimed_rows_are_not_reclaimable() {
        let conn = setup_test_connection();
        enqueue(&conn, 1);
        let first = claim_sync(&conn, "q", 10, NOW).unwrap();
        assert_eq!(first.len(), 1);
        let second = claim_sync(&conn, "q", 10, NOW).unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn test_scheduled_messages_not_claimable_early() {
        let conn = setup_test_connection();
        let mut p = EnqueueParams::new("q", "job", json!({}));
        p.scheduled_at = Some(NOW + 5_000);
        enqueue_sync(&conn, &p, NOW).unwrap();

        assert!(claim_sync(&conn, "q", 10, NOW).unwrap().is_empty());
        assert_eq!(claim_sync(&conn, "q", 10, NOW + 5_000).unwrap().len(), 1);
    }

    #[test]
    fn test_priority_clamped_on_enqueue() {
        let conn = setup_test_connection();
        let mut p = EnqueueParams::new("q", "job", json!({}));
        p.priority = 500;
        enqueue_sync(&conn, &p, NOW).unwrap();
        let claimed = claim_sync(&conn, "q", 1, NOW).unwrap();
        assert_eq!(claimed[0].priority, 100);
    }

    #[test]
    fn test_payload_too_large_writes_nothing() {
        let conn = setup_test_connection();
        let big = "x".repeat(MAX_PAYLOAD_BYTES + 1);
        let p = EnqueueParams::new("q", "job", json!({"data": big}));
        let err = enqueue_sync(&conn, &p, NOW).unwrap_err();
        assert!(matches!(err, RecallError::PayloadTooLarge { .. }));

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM queue_messages", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_enqueue_batch_all_or_nothing() {
        let conn = setup_test_connection();
        let good = EnqueueParams::new("q", "job", json!({"ok": true}));
        let bad = EnqueueParams::new("q", "job", json!({"data": "x".repeat(MAX_PAYLOAD_BYTES + 1)}));

        let err = enqueue_batch_sync(&conn, &[good.clone(), bad], NOW).unwrap_err();
        assert!(matches!(err, RecallError::PayloadTooLarge { .. }));
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM queue_messages", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);

        let ids = enqueue_batch_sync(&conn, &[good.clone(), good], NOW).unwrap();
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn test_mark_completed_requires_claim() {
        let conn = setup_test_connection();
        let id = enqueue(&conn, 1);
        assert!(mark_completed_sync(&conn, id, NOW).is_err());

        claim_sync(&conn, "q", 1, NOW).unwrap();
        mark_completed_sync(&conn, id, NOW + 1).unwrap();
        // Completing twice is a conflict
        assert!(mark_completed_sync(&conn, id, NOW + 2).is_err());
    }

    #[test]
    fn test_retry_backoff_escalates_then_dead_letters() {
        let conn = setup_test_connection();
        let mut p = EnqueueParams::new("q", "job", json!({}));
        p.max_retries = Some(2);
        let id = enqueue_sync(&conn, &p, NOW).unwrap();
        let policy = RetryPolicy::default();

        // Failure 1: retrying with base delay
        claim_sync(&conn, "q", 1, NOW).unwrap();
        let o1 = mark_failed_sync(&conn, id, "boom", &policy, 0.0, NOW).unwrap();
        let FailOutcome::Retrying { next_retry_at: r1 } = o1 else {
            panic!("expected retry");
        };
        assert_eq!(r1 - NOW, 1_000);

        // Failure 2: doubled delay
        let t2 = r1;
        claim_sync(&conn, "q", 1, t2).unwrap();
        let o2 = mark_failed_sync(&conn, id, "boom", &policy, 0.0, t2).unwrap();
        let FailOutcome::Retrying { next_retry_at: r2 } = o2 else {
            panic!("expected retry");
        };
        assert_eq!(r2 - t2, 2_000);
        assert!(r2 - t2 > r1 - NOW);

        // Failure 3: budget exhausted, dead letter exactly once
        let t3 = r2;
        claim_sync(&conn, "q", 1, t3).unwrap();
        let o3 = mark_failed_sync(&conn, id, "final error", &policy, 0.0, t3).unwrap();
        assert!(matches!(o3, FailOutcome::DeadLettered { .. }));

        let stats = queue_stats_sync(&conn, Some("q")).unwrap();
        assert_eq!(stats.failed, 1);

        let letters = dead_letters_sync(&conn, Some("q"), 10).unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].message_id, id);
        assert_eq!(letters[0].retry_count, 2);
        assert_eq!(letters[0].error_message.as_deref(), Some("final error"));
    }

    #[test]
    fn test_retry_delay_jitter_and_cap() {
        let policy = RetryPolicy::default();
        // No jitter: pure exponential
        assert_eq!(compute_retry_delay(&policy, 1, 0.0), 1_000);
        assert_eq!(compute_retry_delay(&policy, 2, 0.0), 2_000);
        assert_eq!(compute_retry_delay(&policy, 3, 0.0), 4_000);
        // Full jitter adds at most 30%
        assert_eq!(compute_retry_delay(&policy, 1, 1.0), 1_300);
        // Capped at max_delay
        assert_eq!(compute_retry_delay(&policy, 60, 1.0), 300_000);
    }

    #[test]
    fn test_retrying_row_claimable_after_window() {
        let conn = setup_test_connection();
        let id = enqueue(&conn, 1);
        claim_sync(&conn, "q", 1, NOW).unwrap();
        let FailOutcome::Retrying { next_retry_at } =
            mark_failed_sync(&conn, id, "e", &RetryPolicy::default(), 0.0, NOW).unwrap()
        else {
            panic!("expected retry");
        };

        assert!(claim_sync(&conn, "q", 1, next_retry_at - 1).unwrap().is_empty());
        let claimed = claim_sync(&conn, "q", 1, next_retry_at).unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].retry_count, 1);
    }

    #[test]
    fn test_sweep_completed_respects_retention() {
        let conn = setup_test_connection();
        let id = enqueue(&conn, 1);
        claim_sync(&conn, "q", 1, NOW).unwrap();
        mark_completed_sync(&conn, id, NOW).unwrap();

        assert_eq!(sweep_completed_sync(&conn, 10_000, NOW + 5_000).unwrap(), 0);
        assert_eq!(sweep_completed_sync(&conn, 10_000, NOW + 20_000).unwrap(), 1);
    }

    #[test]
    fn test_revert_stuck_processing() {
        let conn = setup_test_connection();
        let id = enqueue(&conn, 1);
        claim_sync(&conn, "q", 1, NOW).unwrap();

        // Not yet timed out
        assert_eq!(revert_stuck_sync(&conn, 30_000, NOW + 10_000).unwrap(), 0);

        // Timed out: back to retrying with an incremented count
        assert_eq!(revert_stuck_sync(&conn, 30_000, NOW + 60_000).unwrap(), 1);
        let claimed = claim_sync(&conn, "q", 1, NOW + 60_000).unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, id);
        assert_eq!(claimed[0].retry_count, 1);
    }

    #[test]
    fn test_revert_stuck_exhausted_budget_dead_letters() {
        let conn = setup_test_connection();
        let mut p = EnqueueParams::new("q", "job", json!({}));
        p.max_retries = Some(0);
        let id = enqueue_sync(&conn, &p, NOW).unwrap();
        claim_sync(&conn, "q", 1, NOW).unwrap();

        assert_eq!(revert_stuck_sync(&conn, 30_000, NOW + 60_000).unwrap(), 1);
        let letters = dead_letters_sync(&conn, Some("q"), 10).unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].message_id, id);
        let stats = queue_stats_sync(&conn, Some("q")).unwrap();
        assert_eq!(stats.failed, 1);
    }

    #[test]
    fn test_queues_are_isolated() {
        let conn = setup_test_connection();
        enqueue_sync(&conn, &EnqueueParams::new("a", "job", json!({})), NOW).unwrap();
        enqueue_sync(&conn, &EnqueueParams::new("b", "job", json!({})), NOW).unwrap();

        let claimed = claim_sync(&conn, "a", 10, NOW).unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].queue_name, "a");
        assert_eq!(queue_stats_sync(&conn, Some("b")).unwrap().pending, 1);
    }
}
