// crates/recall-server/src/main.rs
// Recall - persistent memory engine for code assistants

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use recall::config::Config;
use recall::db::pool::DatabasePool;
use recall::embeddings::{Embedder, EmbeddingClient};
use recall::mcp::ServerState;
use recall::ports::{Clock, SystemClock, UuidGen};
use recall::queue::QueueService;
use recall::service::processors::{CompactProcessor, EmbedMemoryProcessor,
    ExtractPreferencesProcessor};
use recall::service::{EMBED_QUEUE, EXTRACT_QUEUE, MAINTENANCE_QUEUE, MemoryService};

#[derive(Parser)]
#[command(name = "recall", about = "Persistent memory engine for code assistants")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the JSON-RPC server on stdio (default)
    Serve,
    /// Print store and queue statistics
    Stats,
    /// Compact the store (dry-run unless --execute)
    Compact {
        /// Apply the compaction instead of reporting it
        #[arg(long)]
        execute: bool,
    },
    /// Inspect the dead-letter table
    DeadLetters {
        /// Restrict to one queue
        #[arg(long)]
        queue: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env();

    // Load .env from the data directory only (never from CWD)
    if let Err(e) = dotenvy::from_path(config.data_dir.join(".env")) {
        tracing::debug!("No .env loaded: {}", e);
    }

    let cli = Cli::parse();

    // Quiet on stdio serve (stdout carries the protocol), louder for
    // maintenance subcommands
    let default_level = match &cli.command {
        None | Some(Commands::Serve) => Level::WARN,
        _ => Level::INFO,
    };
    let level = match config.log_level.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => default_level,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    match cli.command {
        None | Some(Commands::Serve) => run_serve(config).await,
        Some(Commands::Stats) => run_stats(config).await,
        Some(Commands::Compact { execute }) => run_compact(config, execute).await,
        Some(Commands::DeadLetters { queue, limit }) => {
            run_dead_letters(config, queue, limit).await
        }
    }
}

struct Engine {
    service: Arc<MemoryService>,
    queue: Arc<QueueService>,
    clock: Arc<dyn Clock>,
}

async fn build_engine(config: &Config) -> Result<Engine> {
    let pool = Arc::new(DatabasePool::open(&config.db_path()).await?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let queue = Arc::new(
        QueueService::new(pool.clone(), clock.clone())
            .with_default_max_retries(config.queue_default_max_retries),
    );

    let embedder = EmbeddingClient::from_env(config.embedding_dim)
        .map(|client| Arc::new(client) as Arc<dyn Embedder>);
    if embedder.is_none() {
        tracing::info!("No embedding provider configured, keyword-only retrieval");
    }

    let service = Arc::new(MemoryService::new(
        pool,
        queue.clone(),
        embedder,
        clock.clone(),
        Arc::new(UuidGen),
        config.embedding_dim,
    ));

    Ok(Engine {
        service,
        queue,
        clock,
    })
}

async fn run_serve(config: Config) -> Result<()> {
    let engine = build_engine(&config).await?;

    // All background work flows through the queue
    engine
        .queue
        .register_processor(
            EMBED_QUEUE,
            Arc::new(EmbedMemoryProcessor::new(engine.service.clone())),
        )
        .await;
    engine
        .queue
        .register_processor(
            EXTRACT_QUEUE,
            Arc::new(ExtractPreferencesProcessor::new(engine.service.clone())),
        )
        .await;
    engine
        .queue
        .register_processor(
            MAINTENANCE_QUEUE,
            Arc::new(CompactProcessor::new(engine.service.clone())),
        )
        .await;
    engine.queue.spawn_sweeper(Duration::from_secs(30)).await;

    // Store-size janitor: schedules compaction through the queue
    {
        let service = engine.service.clone();
        let max_memories = config.max_memories;
        let compact_size = config.compact_size_bytes;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(300)).await;
                if let Err(e) = service
                    .schedule_compaction_if_needed(max_memories, compact_size)
                    .await
                {
                    tracing::warn!("Compaction check failed: {}", e);
                }
            }
        });
    }

    let state = ServerState::new(
        engine.service,
        engine.queue,
        &config,
        engine.clock.clone(),
    );
    state.spawn_session_janitor();

    recall::mcp::server::serve(state).await
}

async fn run_stats(config: Config) -> Result<()> {
    let engine = build_engine(&config).await?;
    let memory = engine.service.get_stats().await?;
    let queue = engine.queue.stats(None).await?;
    let report = serde_json::json!({ "memory": memory, "queue": queue });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_compact(config: Config, execute: bool) -> Result<()> {
    let engine = build_engine(&config).await?;
    let report = engine.service.compact(!execute).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !execute {
        eprintln!("Dry run; pass --execute to apply.");
    }
    Ok(())
}

async fn run_dead_letters(config: Config, queue: Option<String>, limit: usize) -> Result<()> {
    let engine = build_engine(&config).await?;
    let letters = engine.queue.dead_letters(queue.as_deref(), limit).await?;
    println!("{}", serde_json::to_string_pretty(&letters)?);
    Ok(())
}
