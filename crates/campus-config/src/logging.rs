//! Logging initialization for campus-auth binaries.
//!
//! Structured JSONL goes to [`Paths::log_file`] through the observability
//! crate, so a custom base directory moves the logs with the config.

use crate::Paths;
use observability::{LogConfig, RedactionMode};

/// Environment variable selecting the redaction mode (`standard` or `metadata`).
const REDACTION_ENV: &str = "CAMPUS_AUTH_LOG_REDACTION";

/// Initialize the logging system.
///
/// ```ignore
/// init_logging("info", &Paths::new()?);
/// tracing::info!("ready");
/// ```
pub fn init_logging(level: &str, paths: &Paths) {
    observability::init_with_config(log_config(level, paths));
}

fn log_config(level: &str, paths: &Paths) -> LogConfig {
    LogConfig {
        service_name: "campus-auth".into(),
        default_level: level.into(),
        log_path: Some(paths.log_file()),
        also_stderr: true,
        redaction: redaction_from_env(),
    }
}

fn redaction_from_env() -> RedactionMode {
    std::env::var(REDACTION_ENV)
        .map(|raw| parse_redaction(&raw))
        .unwrap_or_default()
}

fn parse_redaction(raw: &str) -> RedactionMode {
    match raw.trim().to_ascii_lowercase().as_str() {
        "metadata" | "metadata-only" | "prod" | "production" => RedactionMode::MetadataOnly,
        _ => RedactionMode::Standard,
    }
}
