//! Audio policy daemon.

use anyhow::Context;
use clap::Parser;
use std::fs::OpenOptions;
use std::path::PathBuf;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use audio_policy::config::{Config, LoggingConfig};
use audio_policy::events::EventBroadcaster;
use audio_policy::Daemon;

/// Audio policy daemon: routing, volume and session policy for the audio server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Command socket path
    #[arg(long, env = "AUDIO_POLICYD_SOCKET")]
    socket: Option<PathBuf>,

    /// HAL backend (soft, null)
    #[arg(long, env = "AUDIO_POLICYD_HAL")]
    hal: Option<String>,

    /// Keytone FIFO path
    #[arg(long, env = "AUDIO_POLICYD_KEYTONE_PIPE")]
    keytone_pipe: Option<PathBuf>,
}

/// Set up stdout logging plus the optional log file. The returned guard
/// flushes the file writer and must live until exit.
fn init_logging(logging: &LoggingConfig) -> Option<WorkerGuard> {
    // RUST_LOG wins over the configured level
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(logging.log_level.as_deref().unwrap_or("info"))
    });

    let file = logging.log_file.as_ref().and_then(|path| {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some((file, path.clone())),
            Err(e) => {
                eprintln!(
                    "Warning: cannot open log file {}: {}, logging to stdout only",
                    path.display(),
                    e
                );
                None
            }
        }
    });

    let stdout = fmt::layer().with_target(false).compact();
    match file {
        Some((file, path)) => {
            let (writer, guard) = tracing_appender::non_blocking(file);
            let offset = time::UtcOffset::current_local_offset().unwrap_or(time::UtcOffset::UTC);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stdout)
                .with(
                    fmt::layer()
                        .compact()
                        .with_timer(OffsetTime::new(
                            offset,
                            time::format_description::well_known::Rfc3339,
                        ))
                        .with_writer(writer)
                        .with_ansi(false),
                )
                .init();
            info!("Logging to file: {}", path.display());
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stdout)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::from_figment(args.socket, args.hal, args.keytone_pipe)?;
    let _log_guard = init_logging(&config.logging);
    info!(
        "Starting audio policy daemon (HAL {}, socket {})",
        config.hal.backend,
        config.server.socket_path.display()
    );

    let daemon = Daemon::start(config, EventBroadcaster::default()).await?;

    let signal = tokio::signal::ctrl_c().await;
    if signal.is_ok() {
        info!("Received Ctrl+C, shutting down gracefully...");
    }
    daemon.shutdown().await;

    signal.context("Failed to listen for Ctrl+C")
}
