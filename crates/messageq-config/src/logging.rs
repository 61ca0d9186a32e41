//! Logging initialization.
//!
//! Thin wrapper over the observability crate: JSONL to the configured file,
//! compact lines on stderr when running in the foreground.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

/// Initialize logging for a messageq process.
///
/// `RUST_LOG` still wins over `level` when set. With `log_path` set, output
/// goes to that file and is mirrored to stderr.
///
/// ```ignore
/// init_logging("info", Some(paths.log_file()))?;
/// tracing::info!("journal started");
/// ```
pub fn init_logging(level: &str, log_path: Option<PathBuf>) -> CoreResult<()> {
    observability::init_with_config(observability::LogConfig {
        service_name: "messageq".into(),
        default_level: parse_level(level).as_str().to_ascii_lowercase(),
        also_stderr: true,
        log_path,
    })
    .map_err(|e| CoreError::Config(format!("failed to initialize logging: {e}")))
}

/// Parse a log level string into a tracing Level. Unknown values mean INFO.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
