//! # Observability
//!
//! Logging setup for the campus-auth workspace.
//!
//! Library crates only emit `tracing` events. The binary calls
//! [`init_with_config`] once at startup and decides where logs go:
//!
//! - structured JSONL appended to [`LogConfig::log_path`], one object per line;
//! - optional compact stderr output for interactive use.
//!
//! Every JSONL entry passes through [`redact`] before it is written, so
//! credential fields (`password`, `secret`, `cookie`, tokens) never reach disk
//! even if a call site logs them by accident.

mod file_sink;
mod json_layer;
pub mod redact;

use std::path::PathBuf;

pub use file_sink::{EntryWriter, LogFile};
pub use json_layer::{JsonLayer, LogEntry};

/// Field redaction policy applied to the JSONL sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedactionMode {
    /// Redact sensitive keys and secret-looking values, keep everything else.
    #[default]
    Standard,
    /// Keep only the message and allow-listed correlation fields.
    MetadataOnly,
}

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Included in every JSONL entry.
    pub service_name: String,

    /// Default filter; `RUST_LOG` takes precedence.
    pub default_level: String,

    /// JSONL destination. `None` logs to stderr only.
    pub log_path: Option<PathBuf>,

    pub also_stderr: bool,

    pub redaction: RedactionMode,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
            redaction: RedactionMode::Standard,
        }
    }
}

/// Install the global subscriber.
///
/// Falls back to stderr-only logging when no file is configured or the file
/// cannot be opened, so an unwritable log directory never stops the binary.
///
/// ```rust,ignore
/// observability::init_with_config(observability::LogConfig {
///     service_name: "campus-auth".into(),
///     log_path: Some(paths.log_file()),
///     also_stderr: true,
///     ..Default::default()
/// });
/// ```
pub fn init_with_config(config: LogConfig) {
    let file_error = match &config.log_path {
        Some(path) => match file_sink::install(&config, path) {
            Ok(()) => return,
            Err(err) => Some((path.clone(), err)),
        },
        None => None,
    };

    use tracing_subscriber::util::SubscriberInitExt;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.default_level)),
        )
        .with_target(true)
        .compact()
        .with_writer(std::io::stderr)
        .finish()
        .try_init();

    if let Some((path, err)) = file_error {
        tracing::warn!(
            log_path = %path.display(),
            error = %err,
            "log file unavailable, logging to stderr only"
        );
    }
}
