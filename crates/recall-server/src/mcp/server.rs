// crates/recall-server/src/mcp/server.rs
// Line-delimited JSON-RPC transport over stdio
//
// One UTF-8 JSON message per line. Requests are read in order and handled
// in their own tasks; responses are written by a single writer task so
// lines never interleave. Logging goes to stderr, stdout carries only
// protocol frames.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use super::ServerState;
use super::protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use super::router;

/// Grace period for in-flight handlers after the transport closes.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Serve the JSON-RPC protocol on stdin/stdout until EOF or ctrl-c.
pub async fn serve(state: Arc<ServerState>) -> Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    let (tx, rx) = mpsc::channel::<String>(64);
    let writer = tokio::spawn(write_loop(rx));

    let mut in_flight: JoinSet<()> = JoinSet::new();

    tracing::info!(session_id = %state.session_id, "Serving JSON-RPC on stdio");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        handle_line(&state, line, &tx, &mut in_flight);
                        // Opportunistically reap finished handlers
                        while in_flight.try_join_next().is_some() {}
                    }
                    Ok(None) => {
                        tracing::info!("Transport closed (EOF)");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Transport read error: {}", e);
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupt received, shutting down");
                break;
            }
        }
    }

    // Stop accepting new requests; drain in-flight handlers up to the
    // grace period, then abort the stragglers. In-flight DB transactions
    // finish on their blocking threads; no partial results are written
    // after this point.
    let drain = async {
        while in_flight.join_next().await.is_some() {}
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        tracing::warn!("In-flight handlers exceeded grace period, aborting");
        in_flight.shutdown().await;
    }

    drop(tx);
    let _ = writer.await;

    state.queue.shutdown(SHUTDOWN_GRACE).await;
    state.service.close();
    Ok(())
}

/// Parse one frame and spawn its handler.
fn handle_line(
    state: &Arc<ServerState>,
    line: String,
    tx: &mpsc::Sender<String>,
    in_flight: &mut JoinSet<()>,
) {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return;
    }

    let request: JsonRpcRequest = match serde_json::from_str(trimmed) {
        Ok(req) => req,
        Err(e) => {
            // Unparsable frames get an id:null error response
            let response = JsonRpcResponse::failure(None, JsonRpcError::parse_error(e.to_string()));
            let tx = tx.clone();
            in_flight.spawn(async move {
                send_response(&tx, &response).await;
            });
            return;
        }
    };

    let state = Arc::clone(state);
    let tx = tx.clone();
    in_flight.spawn(async move {
        if let Some(response) = router::dispatch(&state, request).await {
            send_response(&tx, &response).await;
        }
    });
}

async fn send_response(tx: &mpsc::Sender<String>, response: &JsonRpcResponse) {
    match serde_json::to_string(response) {
        Ok(frame) => {
            let _ = tx.send(frame).await;
        }
        Err(e) => tracing::error!("Failed to serialize response: {}", e),
    }
}

/// Single writer: one response per line, flushed per frame.
async fn write_loop(mut rx: mpsc::Receiver<String>) {
    let mut stdout = tokio::io::stdout();
    while let Some(frame) = rx.recv().await {
        if stdout.write_all(frame.as_bytes()).await.is_err() {
            break;
        }
        if stdout.write_all(b"\n").await.is_err() {
            break;
        }
        if stdout.flush().await.is_err() {
            break;
        }
    }
}
