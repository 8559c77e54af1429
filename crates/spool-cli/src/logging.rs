//! Logging and tracing setup for the spool CLI
//!
//! Human-readable output goes to stderr so reports on stdout stay clean.
//! Optionally a JSON log is written to a daily rotated file as well.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Directory for JSON log files; no file output when unset
    pub json_log_dir: Option<PathBuf>,

    /// Whether to log span open/close events
    pub enable_spans: bool,

    /// Filter used when RUST_LOG is not set
    pub default_filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json_log_dir: None,
            enable_spans: false,
            default_filter: "warn,spool=info,spool_connection=info".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Verbose configuration for watching individual acquisitions
    pub fn verbose() -> Self {
        Self {
            enable_spans: true,
            default_filter: "info,spool=debug,spool_connection=debug".to_string(),
            ..Self::default()
        }
    }
}

/// Initialize the logging system
///
/// The returned guard flushes the JSON file writer and must be held until
/// the program exits.
pub fn init(config: LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    // RUST_LOG takes precedence over the default filter
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    // NEW fires once per span; ENTER would repeat on every re-poll
    let span_events = if config.enable_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let mut layers = Vec::new();

    let console_layer = fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_span_events(span_events.clone())
        .with_filter(env_filter.clone())
        .boxed();
    layers.push(console_layer);

    let mut guard = None;
    if let Some(log_dir) = &config.json_log_dir {
        std::fs::create_dir_all(log_dir)?;
        let file_appender = tracing_appender::rolling::daily(log_dir, "spool.log");
        let (non_blocking, worker_guard) = tracing_appender::non_blocking(file_appender);
        guard = Some(worker_guard);

        let json_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(span_events)
            .with_ansi(false)
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(non_blocking)
            .with_filter(env_filter)
            .boxed();
        layers.push(json_layer);
    }

    tracing_subscriber::registry().with(layers).try_init()?;

    tracing::debug!(
        json_log_dir = ?config.json_log_dir,
        spans = config.enable_spans,
        "logging initialized"
    );

    Ok(guard)
}
