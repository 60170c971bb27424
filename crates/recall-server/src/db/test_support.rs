// crates/recall-server/src/db/test_support.rs
// Shared helpers for database unit tests

use rusqlite::Connection;

/// Fresh in-memory connection with the full schema applied.
pub fn setup_test_connection() -> Connection {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    conn.execute_batch("PRAGMA foreign_keys=ON;")
        .expect("enable foreign keys");
    super::schema::run_all_migrations(&conn).expect("run migrations");
    conn
}
