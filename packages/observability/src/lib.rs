//! # Observability
//!
//! Logging setup shared by every messageq binary.
//!
//! Services call [`init_with_config`] once at startup and use the standard
//! `tracing` macros everywhere else. Where the lines go is decided here:
//!
//! - a JSONL file (one object per event) when `log_path` is set, so
//!   `tail -f messageq.jsonl | jq` works across processes
//! - a compact human-readable stream on stderr when no file is configured
//!   or when `also_stderr` is set
//!
//! The filter comes from `RUST_LOG` when present, otherwise from
//! `default_level`.
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "messageq".into(),
//!     default_level: "debug".into(),
//!     log_path: Some("/var/log/messageq.jsonl".into()),
//!     also_stderr: true,
//! })?;
//! ```

mod json_layer;
mod writer;

pub use json_layer::{JsonLayer, LogRecord};
pub use writer::AppendWriter;

use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name written into every JSON line.
    pub service_name: String,

    /// Filter used when `RUST_LOG` is unset (e.g. "info", "messageq_core=debug").
    pub default_level: String,

    /// JSONL output file. `None` logs to stderr only.
    pub log_path: Option<PathBuf>,

    /// Mirror file output to stderr.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Errors raised while installing the subscriber.
#[derive(Error, Debug)]
pub enum InitError {
    #[error("failed to open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid log filter \"{0}\"")]
    Filter(String),

    #[error("a global subscriber is already installed")]
    AlreadyInitialized,
}

/// Initialize with default settings for `service_name`.
pub fn init(service_name: &str) -> Result<(), InitError> {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    })
}

/// Install the global subscriber described by `config`.
pub fn init_with_config(config: LogConfig) -> Result<(), InitError> {
    let json_layer = match &config.log_path {
        Some(path) => {
            let writer = AppendWriter::open(path).map_err(|source| InitError::LogFile {
                path: path.clone(),
                source,
            })?;
            Some(JsonLayer::new(config.service_name.clone(), writer).with_filter(filter(&config)?))
        }
        None => None,
    };

    let stderr_layer = if config.log_path.is_none() || config.also_stderr {
        Some(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .compact()
                .with_writer(io::stderr)
                .with_filter(filter(&config)?),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(json_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|_| InitError::AlreadyInitialized)?;

    if let Some(path) = &config.log_path {
        tracing::info!(log_path = %path.display(), "observability initialized");
    }
    Ok(())
}

fn filter(config: &LogConfig) -> Result<EnvFilter, InitError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.default_level)
            .map_err(|_| InitError::Filter(config.default_level.clone())),
    }
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};

/// Re-export Level for advanced filtering.
pub use tracing::Level;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.service_name, "unknown");
        assert_eq!(config.default_level, "info");
        assert!(config.log_path.is_none());
        assert!(!config.also_stderr);
    }

    #[test]
    fn test_unopenable_log_file_reported() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened for appending.
        let result = init_with_config(LogConfig {
            log_path: Some(dir.path().to_path_buf()),
            ..Default::default()
        });
        assert!(matches!(result, Err(InitError::LogFile { .. })));
    }
}
