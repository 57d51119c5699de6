//! tailcast - stream a growing log file to the browser
//!
//! # Usage
//!
//! ```bash
//! # Tail a single file
//! tailcast --file /var/log/app.log
//!
//! # Tail the most recently modified log file in a directory
//! tailcast --dir /var/log/myapp --port 9000
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tailcast::server::{build_router, AppState};
use tailcast::{ChangeNotifier, Config, Hub, Source, TailDetector};

/// Stream newly appended log lines to the browser over server-sent events
#[derive(Parser, Debug)]
#[command(name = "tailcast")]
#[command(version, about, long_about = None)]
#[command(group(ArgGroup::new("source").required(true).args(["file", "dir"])))]
struct Cli {
    /// Path to the log file to monitor
    #[arg(short, long, env = "TAILCAST_FILE")]
    file: Option<PathBuf>,

    /// Directory containing log files (the most recently modified one is used)
    #[arg(short, long, env = "TAILCAST_DIR")]
    dir: Option<PathBuf>,

    /// Host to bind to
    #[arg(long, env = "TAILCAST_HOST", default_value = tailcast::config::DEFAULT_HOST)]
    host: String,

    /// Port to serve on
    #[arg(short, long, env = "TAILCAST_PORT", default_value_t = tailcast::config::DEFAULT_PORT)]
    port: u16,

    /// Milliseconds between two checks of the log file
    #[arg(long, env = "TAILCAST_POLL_INTERVAL_MS", default_value_t = 300)]
    poll_interval_ms: u64,

    /// Lines a viewer may fall behind before it is disconnected
    #[arg(long, env = "TAILCAST_QUEUE_CAPACITY", default_value_t = tailcast::DEFAULT_QUEUE_CAPACITY)]
    queue_capacity: usize,

    /// Longest line in bytes; longer lines are split into several
    #[arg(long, env = "TAILCAST_MAX_LINE_BYTES", default_value_t = tailcast::DEFAULT_MAX_LINE_BYTES)]
    max_line_bytes: usize,

    /// Also check the file as soon as the OS reports a change
    #[arg(long, env = "TAILCAST_FS_EVENTS")]
    fs_events: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "TAILCAST_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Cli {
    fn into_config(self) -> tailcast::Result<Config> {
        let mut config = Config::new(Source::from_options(self.file, self.dir)?);
        config.poll_interval = Duration::from_millis(self.poll_interval_ms);
        config.host = self.host;
        config.port = self.port;
        config.queue_capacity = self.queue_capacity;
        config.fs_events = self.fs_events;
        config.max_line_bytes = self.max_line_bytes;
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let config = cli.into_config().context("invalid configuration")?;
    let target = config
        .resolve_target()
        .await
        .context("failed to find log file")?;

    let hub = Hub::new(config.queue_capacity);
    let detector =
        Arc::new(TailDetector::new(&target).with_max_line_bytes(config.max_line_bytes));

    let wakeups = if config.fs_events {
        Some(ChangeNotifier::new(&target).context("failed to watch log directory")?)
    } else {
        None
    };

    let tail = Arc::clone(&detector);
    let tail_hub = hub.clone();
    let interval = config.poll_interval;
    tokio::spawn(async move { tail.run(&tail_hub, interval, wakeups).await });

    let state = AppState::new(hub, detector).context("failed to load page templates")?;
    let app = build_router(state).layer(TraceLayer::new_for_http());

    let addr = config.bind_address();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    info!(
        address = %addr,
        file = %target.display(),
        poll_interval_ms = interval.as_millis() as u64,
        fs_events = config.fs_events,
        "tailcast server starting"
    );

    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

/// Initialize the tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level)
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("invalid log level: {}", e))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["tailcast", "--file", "app.log"]).unwrap();
        let config = cli.into_config().unwrap();

        assert_eq!(config.source, Source::File("app.log".into()));
        assert_eq!(config.poll_interval, Duration::from_millis(300));
        assert_eq!(config.port, 8080);
        assert_eq!(config.queue_capacity, 100);
        assert!(!config.fs_events);
        assert_eq!(config.max_line_bytes, tailcast::DEFAULT_MAX_LINE_BYTES);
    }

    #[test]
    fn test_cli_requires_exactly_one_source() {
        assert!(Cli::try_parse_from(["tailcast"]).is_err());
        assert!(
            Cli::try_parse_from(["tailcast", "--file", "a.log", "--dir", "/var/log"]).is_err()
        );
    }

    #[test]
    fn test_cli_rejects_zero_interval() {
        let cli = Cli::try_parse_from([
            "tailcast",
            "--dir",
            "/var/log",
            "--poll-interval-ms",
            "0",
        ])
        .unwrap();
        assert!(cli.into_config().is_err());
    }
}
