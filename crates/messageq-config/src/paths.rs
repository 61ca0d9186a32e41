//! File system paths for the journal.

use crate::{CoreError, CoreResult};
use std::path::{Path, PathBuf};

/// Directory name under the home directory.
const BASE_DIR_NAME: &str = ".messageq";
/// Structured log file under the logs directory.
const LOG_FILE_NAME: &str = "messageq.jsonl";

/// Manages file system paths for the journal.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory for config and logs (~/.messageq)
    base_dir: PathBuf,
}

impl Paths {
    /// Create a new Paths instance rooted at `~/.messageq`.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;

        Ok(Self {
            base_dir: home.join(BASE_DIR_NAME),
        })
    }

    /// Create a new Paths instance with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory (~/.messageq).
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Get the config file path (~/.messageq/config.json).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the logs directory (~/.messageq/logs).
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Get the log file path (~/.messageq/logs/messageq.jsonl).
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join(LOG_FILE_NAME)
    }

    /// Ensure all required directories exist.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_layout_under_base_dir() {
        let paths = Paths::with_base_dir(PathBuf::from("/srv/messageq"));
        assert_eq!(paths.base_dir(), Path::new("/srv/messageq"));
        assert_eq!(paths.config_file(), PathBuf::from("/srv/messageq/config.json"));
        assert_eq!(
            paths.log_file(),
            PathBuf::from("/srv/messageq/logs/messageq.jsonl")
        );
    }

    #[test]
    fn test_ensure_dirs_creates_logs_dir() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().join("nested"));

        paths.ensure_dirs().unwrap();
        assert!(paths.logs_dir().is_dir());
        // Idempotent.
        paths.ensure_dirs().unwrap();
    }
}
