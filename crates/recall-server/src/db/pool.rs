// crates/recall-server/src/db/pool.rs
// Async connection pool using deadpool-sqlite
//
// All SQLite access goes through this pool: closures run on blocking
// threads, so database work never stalls the async runtime. Row-level
// operations are synchronous `*_sync(conn, ..)` functions composed by
// async callers via `run()` / `interact()`.

use crate::error::RecallError;
use crate::util::path_to_string;
use anyhow::{Context, Result};
use deadpool_sqlite::{Config, Hook, Pool, Runtime};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Check if a rusqlite error is SQLITE_BUSY or SQLITE_LOCKED.
///
/// SQLITE_BUSY occurs with file-based databases under write contention.
/// SQLITE_LOCKED occurs with shared-cache in-memory databases when another
/// connection holds a write lock on the same table.
fn is_rusqlite_contention(err: &rusqlite::Error) -> bool {
    use rusqlite::ffi;
    matches!(
        err,
        rusqlite::Error::SqliteFailure(
            ffi::Error {
                code: ffi::ErrorCode::DatabaseBusy | ffi::ErrorCode::DatabaseLocked,
                ..
            },
            _,
        )
    )
}

/// Check if a RecallError wraps a SQLite contention error.
fn is_recall_contention(err: &RecallError) -> bool {
    match err {
        RecallError::Db(db_err) => is_rusqlite_contention(db_err),
        _ => false,
    }
}

/// Retry delays for SQLite contention backoff.
const RETRY_DELAYS: [std::time::Duration; 3] = [
    std::time::Duration::from_millis(100),
    std::time::Duration::from_millis(500),
    std::time::Duration::from_millis(2000),
];

/// Database pool wrapper with per-connection setup.
pub struct DatabasePool {
    pool: Pool,
    path: Option<PathBuf>,
    /// URI for in-memory databases (shares state across pooled connections)
    memory_uri: Option<String>,
}

impl DatabasePool {
    /// Open a pooled database at the given path, running migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        ensure_parent_directory(path)?;

        let conn_str = path_to_string(path);
        let hook = make_file_post_create_hook(path.to_path_buf());
        let pool = build_pool(&conn_str, hook)?;

        let db_pool = Self {
            pool,
            path: Some(path.to_path_buf()),
            memory_uri: None,
        };

        if let Err(e) = Self::backup_before_migration(path) {
            tracing::warn!("Pre-migration backup failed (continuing anyway): {}", e);
        }

        db_pool.run_migrations().await?;
        Ok(db_pool)
    }

    /// Open a pooled in-memory database (for tests).
    ///
    /// Uses a shared-cache URI so every pooled connection sees the same
    /// database state.
    pub async fn open_in_memory() -> Result<Self> {
        let uri = format!("file:memdb_{:?}?mode=memory&cache=shared", uuid::Uuid::new_v4());
        let pool = build_pool(&uri, make_memory_post_create_hook())?;

        let db_pool = Self {
            pool,
            path: None,
            memory_uri: Some(uri),
        };
        db_pool.run_migrations().await?;
        Ok(db_pool)
    }

    /// Get the memory URI (for sharing state in tests)
    pub fn memory_uri(&self) -> Option<&str> {
        self.memory_uri.as_deref()
    }

    /// Get the database file path (None for in-memory).
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Release the database handle: reject new checkouts and drop idle
    /// connections. In-flight interactions finish first.
    pub fn close(&self) {
        self.pool.close();
    }

    /// Run a closure with a connection from the pool.
    ///
    /// The closure runs on a blocking thread pool, so it won't block the
    /// async runtime.
    pub async fn interact<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get connection from pool")?;

        conn.interact(move |conn| f(conn))
            .await
            .map_err(|e| anyhow::anyhow!("interact failed: {e}"))?
    }

    /// Run a closure on a pooled connection, logging errors but not
    /// propagating. Use for best-effort operations (janitors, telemetry).
    pub async fn try_interact<F, R>(&self, label: &str, f: F) -> Option<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let label = label.to_string();
        match self.interact(move |conn| f(conn)).await {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!("{}: {}", label, e);
                None
            }
        }
    }

    /// Run a closure and convert the error to RecallError.
    ///
    /// This is the primary API for tool handlers and services.
    pub async fn run<F, R, E>(&self, f: F) -> Result<R, RecallError>
    where
        F: FnOnce(&Connection) -> Result<R, E> + Send + 'static,
        R: Send + 'static,
        E: Into<RecallError> + Send + 'static,
    {
        self.pool
            .get()
            .await
            .map_err(|e| RecallError::Storage(format!("Failed to get connection: {}", e)))?
            .interact(move |conn| f(conn).map_err(Into::into))
            .await
            .map_err(|e| RecallError::Storage(format!("Database error: {}", e)))?
    }

    /// Like [`run`](Self::run) but with retry on SQLite contention errors.
    ///
    /// Uses backoff (100ms, 500ms, 2000ms) for up to 3 retries. Use this
    /// for critical writes that must not be lost (memory saves, queue
    /// transitions). The closure must be `Clone` to support retries.
    pub async fn run_with_retry<F, R, E>(&self, f: F) -> Result<R, RecallError>
    where
        F: FnOnce(&Connection) -> Result<R, E> + Send + Clone + 'static,
        R: Send + 'static,
        E: Into<RecallError> + Send + 'static,
    {
        for delay in RETRY_DELAYS {
            let attempt = f.clone();
            match self.run(attempt).await {
                Ok(v) => return Ok(v),
                Err(e) if is_recall_contention(&e) => {
                    tracing::warn!("SQLite contention, retrying in {:?}", delay);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
        self.run(f).await
    }

    /// Create a backup of the database before running migrations.
    ///
    /// Uses SQLite's VACUUM INTO for an atomic, consistent backup. Keeps at
    /// most one backup per database (overwrites previous).
    fn backup_before_migration(path: &Path) -> Result<()> {
        let backup_path = path.with_extension("db.pre-migration");

        if !path.exists() {
            return Ok(());
        }

        // Open a direct connection for the backup (pool isn't ready yet)
        let conn = rusqlite::Connection::open(path).context("Failed to open DB for backup")?;

        // VACUUM INTO fails if the target exists
        let _ = std::fs::remove_file(&backup_path);

        conn.execute("VACUUM INTO ?1", [backup_path.to_string_lossy().as_ref()])
            .context("Failed to create pre-migration backup")?;

        tracing::info!("Created pre-migration backup: {}", backup_path.display());
        Ok(())
    }

    /// Run schema migrations on a dedicated connection.
    async fn run_migrations(&self) -> Result<()> {
        self.interact(|conn| {
            super::schema::run_all_migrations(conn)?;
            if let Err(e) = conn.execute_batch("PRAGMA optimize") {
                tracing::debug!("PRAGMA optimize skipped: {}", e);
            }
            Ok(())
        })
        .await
    }
}

fn build_pool(conn_str: &str, hook: Hook) -> Result<Pool> {
    Config::new(conn_str)
        .builder(Runtime::Tokio1)
        .context("Failed to create pool builder")?
        .max_size(8)
        .post_create(hook)
        .build()
        .context("Failed to build connection pool")
}

/// Ensure parent directory exists with secure permissions (0o700 on Unix).
fn ensure_parent_directory(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
        #[cfg(unix)]
        {
            let mut perms = std::fs::metadata(parent)?.permissions();
            perms.set_mode(0o700); // rwx------
            std::fs::set_permissions(parent, perms)?;
        }
        #[cfg(not(unix))]
        tracing::debug!(
            "Skipping directory permission restriction on non-Unix platform: {}",
            parent.display()
        );
    }
    Ok(())
}

/// Create a post_create hook for file-based databases.
///
/// Sets up PRAGMAs via `setup_connection` and restricts file permissions
/// to 0o600.
fn make_file_post_create_hook(path: PathBuf) -> Hook {
    Hook::async_fn(move |conn, _metrics| {
        let path_for_perms = path.clone();
        Box::pin(async move {
            conn.interact(move |conn| {
                setup_connection(conn)?;

                #[cfg(unix)]
                if let Ok(metadata) = std::fs::metadata(&path_for_perms) {
                    let mut perms = metadata.permissions();
                    perms.set_mode(0o600); // rw-------
                    if let Err(e) = std::fs::set_permissions(&path_for_perms, perms) {
                        tracing::warn!("Failed to set database file permissions to 0600: {}", e);
                    }
                }
                #[cfg(not(unix))]
                tracing::debug!(
                    "Skipping DB file permission restriction on non-Unix platform: {}",
                    path_for_perms.display()
                );

                Ok::<_, rusqlite::Error>(())
            })
            .await
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("interact failed: {e}").into())
            })?
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("connection setup failed: {e}").into())
            })
        })
    })
}

/// Create a post_create hook for in-memory databases.
///
/// WAL mode is not applicable to in-memory DBs.
fn make_memory_post_create_hook() -> Hook {
    Hook::async_fn(|conn, _metrics| {
        Box::pin(async move {
            conn.interact(|conn| {
                conn.execute_batch(
                    "PRAGMA foreign_keys=ON; \
                     PRAGMA busy_timeout=5000;",
                )?;
                Ok::<_, rusqlite::Error>(())
            })
            .await
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("interact failed: {e}").into())
            })?
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("connection setup failed: {e}").into())
            })
        })
    })
}

/// Configure a connection after it's created.
fn setup_connection(conn: &Connection) -> rusqlite::Result<()> {
    // WAL for concurrent readers, busy_timeout for write contention,
    // NORMAL synchronous (safe with WAL, fewer fsyncs).
    conn.execute_batch(
        "PRAGMA journal_mode=WAL; \
         PRAGMA foreign_keys=ON; \
         PRAGMA busy_timeout=5000; \
         PRAGMA synchronous=NORMAL; \
         PRAGMA journal_size_limit=32768;",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pool_in_memory() {
        let pool = DatabasePool::open_in_memory()
            .await
            .expect("Failed to open in-memory pool");

        let id = pool
            .interact(|conn| {
                conn.execute(
                    "INSERT INTO memories (key, memory_type, value, timestamp) VALUES (?, ?, ?, ?)",
                    rusqlite::params!["k1", "context", "{}", 1i64],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .expect("Failed to insert");

        assert!(id > 0);

        // Verify from another connection in the pool (tests shared cache)
        let key: String = pool
            .interact(move |conn| {
                conn.query_row("SELECT key FROM memories WHERE id = ?", [id], |row| {
                    row.get(0)
                })
                .map_err(Into::into)
            })
            .await
            .expect("Failed to query");

        assert_eq!(key, "k1");
    }

    #[tokio::test]
    async fn test_concurrent_access() {
        let pool = std::sync::Arc::new(
            DatabasePool::open_in_memory()
                .await
                .expect("Failed to open pool"),
        );

        let mut handles = Vec::new();
        for i in 0..10 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                pool.run_with_retry(move |conn| {
                    conn.execute(
                        "INSERT INTO memories (key, memory_type, value, timestamp) VALUES (?, ?, ?, ?)",
                        rusqlite::params![format!("key-{i}"), "context", "{}", i as i64],
                    )?;
                    Ok::<_, rusqlite::Error>(())
                })
                .await
            }));
        }

        for handle in handles {
            handle.await.unwrap().expect("Insert failed");
        }

        let count: i64 = pool
            .interact(|conn| {
                conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))
                    .map_err(Into::into)
            })
            .await
            .expect("Count failed");

        assert_eq!(count, 10);
    }

    #[tokio::test]
    async fn test_run_converts_errors() {
        let pool = DatabasePool::open_in_memory().await.unwrap();
        let result = pool
            .run(|conn| {
                conn.execute("INSERT INTO nonexistent_table VALUES (1)", [])?;
                Ok::<_, rusqlite::Error>(())
            })
            .await;
        assert!(matches!(result, Err(RecallError::Db(_))));
    }

    #[tokio::test]
    async fn test_open_file_backed() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("memory.db");
        let pool = DatabasePool::open(&db_path).await.expect("open failed");
        assert_eq!(pool.path(), Some(db_path.as_path()));
        assert!(db_path.exists());
    }

    #[test]
    fn test_contention_detection() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ffi::ErrorCode::DatabaseBusy,
                extended_code: 5,
            },
            Some("database is locked".to_string()),
        );
        assert!(is_rusqlite_contention(&busy));
        assert!(is_recall_contention(&RecallError::Db(busy)));

        let constraint = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ffi::ErrorCode::ConstraintViolation,
                extended_code: 19,
            },
            Some("UNIQUE constraint failed".to_string()),
        );
        assert!(!is_rusqlite_contention(&constraint));
        assert!(!is_recall_contention(&RecallError::Other(
            "database is locked".to_string()
        )));
    }
}
