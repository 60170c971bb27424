// crates/recall-server/src/queue/mod.rs
// Durable work-queue service: registered processors, worker loops, sweeper
//
// All background work in the engine flows through here; there are no
// fire-and-forget tasks outside these workers, so failure semantics stay
// uniform (retry with backoff, then dead-letter).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use rand::Rng;
use recall_types::{DeadLetter, QueueMessage, QueueStats};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::db::pool::DatabasePool;
use crate::db::queue::{
    EnqueueParams, FailOutcome, RetryPolicy, claim_sync, dead_letters_sync, enqueue_batch_sync,
    enqueue_sync, mark_completed_sync, mark_failed_sync, queue_stats_sync, revert_stuck_sync,
    sweep_completed_sync,
};
use crate::error::Result;
use crate::ports::Clock;

/// Per-queue tuning.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Messages claimed per worker iteration.
    pub batch_size: usize,
    /// Sleep between iterations when the queue was empty.
    pub poll_interval: Duration,
    /// Claimed messages older than this revert to retrying.
    pub processing_timeout_ms: i64,
    /// Completed rows older than this are swept.
    pub retention_ms: i64,
    pub retry: RetryPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            poll_interval: Duration::from_millis(1_000),
            processing_timeout_ms: 30_000,
            retention_ms: 7 * 24 * 60 * 60 * 1000,
            retry: RetryPolicy::default(),
        }
    }
}

/// Handler invoked for each claimed message.
///
/// Errors are strings by contract: the worker turns them into a failure
/// transition, never a propagated panic.
#[async_trait]
pub trait QueueProcessor: Send + Sync {
    async fn process(&self, message: &QueueMessage) -> std::result::Result<(), String>;
}

/// Durable, prioritized, at-least-once work queue over the shared pool.
pub struct QueueService {
    pool: Arc<DatabasePool>,
    clock: Arc<dyn Clock>,
    configs: RwLock<HashMap<String, QueueConfig>>,
    /// Retry budget applied when the enqueuer names none
    /// (QUEUE_DEFAULT_MAX_RETRIES).
    default_max_retries: i64,
    shutdown_tx: watch::Sender<bool>,
    workers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl QueueService {
    pub fn new(pool: Arc<DatabasePool>, clock: Arc<dyn Clock>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            pool,
            clock,
            configs: RwLock::new(HashMap::new()),
            default_max_retries: crate::db::queue::DEFAULT_MAX_RETRIES,
            shutdown_tx,
            workers: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// Override the default per-message retry budget (clamped to [0, 10]).
    pub fn with_default_max_retries(mut self, max_retries: i64) -> Self {
        self.default_max_retries = max_retries.clamp(0, 10);
        self
    }

    /// Set per-queue configuration (retry policy, batch size, timeouts).
    pub fn configure_queue(&self, queue_name: &str, config: QueueConfig) {
        self.configs
            .write()
            .expect("queue config lock poisoned")
            .insert(queue_name.to_string(), config);
    }

    fn config_for(&self, queue_name: &str) -> QueueConfig {
        self.configs
            .read()
            .expect("queue config lock poisoned")
            .get(queue_name)
            .cloned()
            .unwrap_or_default()
    }

    /// Enqueue one message; rejects payloads over 1 MiB before writing.
    pub async fn enqueue(&self, mut params: EnqueueParams) -> Result<i64> {
        params.max_retries = Some(params.max_retries.unwrap_or(self.default_max_retries));
        let now = self.clock.now_ms();
        self.pool
            .run_with_retry(move |conn| enqueue_sync(conn, &params, now))
            .await
    }

    /// Enqueue a batch atomically (all-or-nothing).
    pub async fn enqueue_batch(&self, batch: Vec<EnqueueParams>) -> Result<Vec<i64>> {
        let batch: Vec<EnqueueParams> = batch
            .into_iter()
            .map(|mut p| {
                p.max_retries = Some(p.max_retries.unwrap_or(self.default_max_retries));
                p
            })
            .collect();
        let now = self.clock.now_ms();
        self.pool
            .run_with_retry(move |conn| enqueue_batch_sync(conn, &batch, now))
            .await
    }

    /// Claim up to `batch_size` eligible messages (now in `processing`).
    pub async fn dequeue(&self, queue_name: &str, batch_size: usize) -> Result<Vec<QueueMessage>> {
        let queue = queue_name.to_string();
        let now = self.clock.now_ms();
        self.pool
            .run(move |conn| claim_sync(conn, &queue, batch_size, now))
            .await
    }

    /// Terminal success transition for a claimed message.
    pub async fn mark_completed(&self, id: i64) -> Result<()> {
        let now = self.clock.now_ms();
        self.pool
            .run_with_retry(move |conn| mark_completed_sync(conn, id, now))
            .await
    }

    /// Failure transition: retry with jittered backoff or dead-letter.
    pub async fn mark_failed(&self, id: i64, error: &str, queue_name: &str) -> Result<FailOutcome> {
        let policy = self.config_for(queue_name).retry;
        let error = error.to_string();
        let now = self.clock.now_ms();
        let jitter: f64 = rand::rng().random();
        self.pool
            .run_with_retry(move |conn| mark_failed_sync(conn, id, &error, &policy, jitter, now))
            .await
    }

    /// Counts by status for one queue (or all queues when None).
    pub async fn stats(&self, queue_name: Option<&str>) -> Result<QueueStats> {
        let queue = queue_name.map(|s| s.to_string());
        self.pool
            .run(move |conn| queue_stats_sync(conn, queue.as_deref()))
            .await
    }

    /// Inspect dead letters, most recent first.
    pub async fn dead_letters(
        &self,
        queue_name: Option<&str>,
        limit: usize,
    ) -> Result<Vec<DeadLetter>> {
        let queue = queue_name.map(|s| s.to_string());
        self.pool
            .run(move |conn| dead_letters_sync(conn, queue.as_deref(), limit))
            .await
    }

    /// Register a processor and start its worker loop.
    pub async fn register_processor(
        self: &Arc<Self>,
        queue_name: &str,
        processor: Arc<dyn QueueProcessor>,
    ) {
        let service = Arc::clone(self);
        let queue = queue_name.to_string();
        let shutdown = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            service.worker_loop(queue, processor, shutdown).await;
        });
        self.workers.lock().await.push(handle);
    }

    /// Start the periodic sweeper: deletes old completed rows and reverts
    /// stuck processing rows. Log-and-continue on errors.
    pub async fn spawn_sweeper(self: &Arc<Self>, interval: Duration) {
        let service = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.changed() => {}
                }
                if *shutdown.borrow() {
                    break;
                }

                let defaults = QueueConfig::default();
                let now = service.clock.now_ms();
                let retention = defaults.retention_ms;
                let timeout = defaults.processing_timeout_ms;
                service
                    .pool
                    .try_interact("queue sweep", move |conn| {
                        let swept = sweep_completed_sync(conn, retention, now)?;
                        let reverted = revert_stuck_sync(conn, timeout, now)?;
                        if swept > 0 || reverted > 0 {
                            tracing::debug!(swept, reverted, "Queue sweep");
                        }
                        Ok(())
                    })
                    .await;
            }
        });
        self.workers.lock().await.push(handle);
    }

    async fn worker_loop(
        &self,
        queue_name: String,
        processor: Arc<dyn QueueProcessor>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tracing::info!(queue = %queue_name, "Queue worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let config = self.config_for(&queue_name);
            match self.dequeue(&queue_name, config.batch_size).await {
                Ok(batch) if !batch.is_empty() => {
                    // Finish the claimed batch even if shutdown arrives
                    // mid-way; we just stop claiming new work.
                    for message in &batch {
                        self.run_processor(&queue_name, processor.as_ref(), message)
                            .await;
                    }
                }
                Ok(_) => {
                    tokio::select! {
                        _ = tokio::time::sleep(config.poll_interval) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!(queue = %queue_name, "Claim failed: {}", e);
                    tokio::select! {
                        _ = tokio::time::sleep(config.poll_interval * 4) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }

        tracing::info!(queue = %queue_name, "Queue worker stopped");
    }

    /// Run one message through the processor, translating both errors and
    /// panics into failure transitions.
    async fn run_processor(
        &self,
        queue_name: &str,
        processor: &dyn QueueProcessor,
        message: &QueueMessage,
    ) {
        let outcome = std::panic::AssertUnwindSafe(processor.process(message))
            .catch_unwind()
            .await;

        let transition = match outcome {
            Ok(Ok(())) => self.mark_completed(message.id).await,
            Ok(Err(error)) => {
                tracing::warn!(
                    queue = %queue_name,
                    message_id = message.id,
                    "Processor failed: {}",
                    error
                );
                self.mark_failed(message.id, &error, queue_name).await.map(|_| ())
            }
            Err(_) => {
                tracing::error!(
                    queue = %queue_name,
                    message_id = message.id,
                    "Processor panicked"
                );
                self.mark_failed(message.id, "processor panicked", queue_name)
                    .await
                    .map(|_| ())
            }
        };

        if let Err(e) = transition {
            tracing::warn!(
                queue = %queue_name,
                message_id = message.id,
                "Failed to record message outcome: {}",
                e
            );
        }
    }

    /// Stop workers: no new claims; in-flight batches get a grace period,
    /// then remaining tasks are aborted.
    pub async fn shutdown(&self, grace: Duration) {
        let _ = self.shutdown_tx.send(true);

        let mut workers = self.workers.lock().await;
        let drained: Vec<JoinHandle<()>> = workers.drain(..).collect();
        drop(workers);

        let drain_all = async {
            for handle in &drained {
                // JoinHandle isn't awaitable by reference; poll completion
                while !handle.is_finished() {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        };

        if tokio::time::timeout(grace, drain_all).await.is_err() {
            tracing::warn!("Queue workers did not drain in time, aborting");
            for handle in &drained {
                handle.abort();
            }
        }
    }
}
