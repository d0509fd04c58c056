//! exportd - background export service
//!
//! Streams MongoDB query results into CSV or JSON Lines artifacts on a pool
//! of background workers. Requests arrive as JSON lines on stdin; replies go
//! to stdout and logs to stderr.
//!
//! # Usage
//!
//! ```bash
//! exportd --base-dir /var/lib/exportd --workers 4
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{Level, info, warn};
use tracing_subscriber::EnvFilter;

use exportd::cli::{CliInterface, protocol};
use exportd::error::Result;
use exportd::notify::LogNotifier;
use exportd::service::ExportService;
use exportd::source::MongoDataSource;

/// How long shutdown waits for workers to clean up
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Application entry point
#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Main application logic
///
/// 1. Parse command-line arguments and load configuration
/// 2. Initialize logging
/// 3. Handle subcommands or start the service
async fn run() -> Result<()> {
    let cli = CliInterface::new()?;
    initialize_logging(&cli);

    if cli.handle_subcommand()? {
        return Ok(());
    }

    if let Some(path) = cli.config_path() {
        info!("Using configuration {}", path.display());
    }
    let config = cli.config();
    tokio::fs::create_dir_all(&config.export.base_dir).await?;

    let source = MongoDataSource::connect(&config.source).await?;
    let service = Arc::new(ExportService::new(
        config.export.clone(),
        Arc::new(source),
        Arc::new(LogNotifier),
    ));
    let dispatcher = service.start().await?;
    info!(
        "exportd {} ready, writing into {}",
        exportd::VERSION,
        config.export.base_dir.display()
    );

    let served = serve(&service).await;

    service.shutdown();
    if let Err(e) = dispatcher.await {
        warn!("Dispatcher ended abnormally: {}", e);
    }
    if tokio::time::timeout(SHUTDOWN_GRACE, service.wait_idle())
        .await
        .is_err()
    {
        warn!("Workers still busy after {:?}, exiting anyway", SHUTDOWN_GRACE);
    }
    info!("Goodbye");
    served
}

/// Answer commands from stdin until EOF or Ctrl+C
async fn serve(service: &ExportService) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        };
        let Some(line) = line else {
            info!("Input closed, shutting down");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let reply = protocol::handle_line(service, &line).await;
        let mut text = reply.to_line()?;
        text.push('\n');
        stdout.write_all(text.as_bytes()).await?;
        stdout.flush().await?;
    }

    Ok(())
}

/// Initialize logging system based on verbosity level
///
/// `RUST_LOG` takes precedence over the configured level. Logs go to stderr;
/// stdout carries protocol replies only.
fn initialize_logging(cli: &CliInterface) {
    let level: Level = cli.config().logging.level.to_tracing_level();
    let filter = log_filter(level, std::env::var("RUST_LOG").ok().as_deref());

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if cli.config().logging.timestamps {
        subscriber.init();
    } else {
        subscriber.without_time().init();
    }
}

/// `RUST_LOG` directives when present and valid, else `level`
fn log_filter(level: Level, directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(level.as_str().to_lowercase()))
}
