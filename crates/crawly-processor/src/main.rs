//! External Crawly Processor - crawl result ingestion service

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crawly_common::logging::{init_logging, LogConfig, LogLevel};
use crawly_processor::config::ProcessorConfig;
use crawly_processor::error::{ProcessorError, StartupError};
use crawly_processor::feed::JsonLinesFeed;
use crawly_processor::processor::{IngestionProcessor, ProcessingSummary};
use crawly_processor::store::{DocumentStore, MemoryDocumentStore, PgDocumentStore};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "external-crawly-processor")]
#[command(author, version, about = "Ingest crawl results into the document store")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Keep documents in memory instead of the database
    #[arg(long, global = true)]
    dry_run: bool,

    /// Document store URL (overrides DATABASE_URL)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Number of concurrent workers (overrides CRAWLY_WORKERS)
    #[arg(long, global = true)]
    workers: Option<usize>,

    /// Records per batch write (overrides CRAWLY_BATCH_SIZE)
    #[arg(long, global = true)]
    batch_size: Option<usize>,

    /// Do not apply schema migrations on startup
    #[arg(long, global = true)]
    skip_migrations: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream records until the feed ends or a shutdown signal arrives
    Run {
        /// JSON-lines input file; stdin when omitted
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Load a JSON-lines file through the batch path
    Import {
        /// JSON-lines input file
        #[arg(short, long)]
        input: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("external-crawly-processor")
        .filter_directives("sqlx=warn")
        .build();

    // Environment variables take precedence
    let _guard = match log_config
        .with_env_overrides()
        .and_then(|config| init_logging(&config))
    {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            return ExitCode::from(1);
        },
    };

    match run(cli).await {
        Ok(summary) => {
            info!(
                received = summary.received,
                accepted = summary.accepted,
                rejected = summary.rejected,
                stored = summary.stored,
                store_failed = summary.store_failed,
                "Processing complete"
            );
            ExitCode::SUCCESS
        },
        Err(e) if is_startup_failure(&e) => {
            error!("Startup failed: {:#}", e);
            ExitCode::from(2)
        },
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(1)
        },
    }
}

fn is_startup_failure(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause.is::<StartupError>()
            || matches!(
                cause.downcast_ref::<ProcessorError>(),
                Some(ProcessorError::Startup(_))
            )
    })
}

async fn run(cli: Cli) -> Result<ProcessingSummary> {
    let mut config = ProcessorConfig::load().context("Failed to load configuration")?;
    if let Some(url) = cli.database_url {
        config.store.url = url;
    }
    if let Some(workers) = cli.workers {
        config.pipeline.workers = workers;
    }
    if let Some(batch_size) = cli.batch_size {
        config.pipeline.batch_size = batch_size;
    }
    config.validate().context("Invalid configuration")?;

    let store = open_store(&config, cli.dry_run, cli.skip_migrations).await?;
    let processor = IngestionProcessor::new(store, config.pipeline.clone());

    match cli.command {
        Command::Run { input } => {
            match input {
                Some(path) => {
                    info!(input = %path.display(), "Streaming records from file");
                    let feed = JsonLinesFeed::open(&path)
                        .await
                        .with_context(|| format!("Failed to open {}", path.display()))?;
                    processor.start(feed).await?;
                },
                None => {
                    info!("Streaming records from stdin");
                    processor.start(JsonLinesFeed::stdin()).await?;
                },
            }
            stream(&processor, config.shutdown_timeout_secs).await
        },
        Command::Import { input } => {
            let feed = JsonLinesFeed::open(&input)
                .await
                .with_context(|| format!("Failed to open {}", input.display()))?;
            info!(input = %input.display(), batch_size = config.pipeline.batch_size, "Importing records");
            processor.start_import(feed).await?;
            stream(&processor, config.shutdown_timeout_secs).await
        },
    }
}

async fn open_store(
    config: &ProcessorConfig,
    dry_run: bool,
    skip_migrations: bool,
) -> Result<Arc<dyn DocumentStore>> {
    if dry_run {
        info!("Dry run: documents are kept in memory");
        return Ok(Arc::new(MemoryDocumentStore::new()));
    }

    info!(url = %config.store.redacted_url(), "Connecting to document store");
    let store = PgDocumentStore::connect(&config.store).await?;
    if !skip_migrations {
        store.migrate().await?;
    }
    Ok(Arc::new(store))
}

/// Wait for the feed to end, or drain on a shutdown signal
async fn stream(processor: &IngestionProcessor, shutdown_timeout_secs: u64) -> Result<ProcessingSummary> {
    tokio::select! {
        summary = processor.wait_stopped() => Ok(summary),
        _ = shutdown_signal() => {
            info!(timeout_secs = shutdown_timeout_secs, "Draining in-flight records");
            match tokio::time::timeout(Duration::from_secs(shutdown_timeout_secs), processor.drain()).await {
                Ok(summary) => Ok(summary?),
                Err(_) => {
                    warn!("Drain timed out, stopping");
                    Ok(processor.stop().await)
                },
            }
        },
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
