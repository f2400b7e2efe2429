//! File system paths for campus-auth.

use crate::{ConfigError, ConfigResult};
use std::path::PathBuf;

/// Name of the runtime directory under the user's home.
const BASE_DIR_NAME: &str = ".campus-auth";
/// JSONL log file name under the logs directory.
const LOG_FILE_NAME: &str = "campus-auth.jsonl";

/// Manages file system paths for the CLI and libraries.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory for runtime files (~/.campus-auth)
    base_dir: PathBuf,
}

impl Paths {
    /// Create a new Paths instance rooted at `~/.campus-auth`.
    pub fn new() -> ConfigResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| ConfigError::Path("Could not determine home directory".to_string()))?;

        Ok(Self {
            base_dir: home.join(BASE_DIR_NAME),
        })
    }

    /// Create a new Paths instance with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory (~/.campus-auth).
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the config file path (~/.campus-auth/config.json).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the logs directory (~/.campus-auth/logs).
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Get the JSONL log file path (~/.campus-auth/logs/campus-auth.jsonl).
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join(LOG_FILE_NAME)
    }

    /// Ensure all required directories exist.
    pub fn ensure_dirs(&self) -> ConfigResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_paths_layout() {
        let paths = Paths::with_base_dir(PathBuf::from("/tmp/campus"));
        assert_eq!(paths.config_file(), PathBuf::from("/tmp/campus/config.json"));
        assert_eq!(paths.logs_dir(), PathBuf::from("/tmp/campus/logs"));
        assert_eq!(
            paths.log_file(),
            PathBuf::from("/tmp/campus/logs/campus-auth.jsonl")
        );
    }

    #[test]
    fn test_ensure_dirs_creates_tree() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().join("nested"));
        paths.ensure_dirs().unwrap();
        assert!(paths.base_dir().exists());
        assert!(paths.logs_dir().exists());
    }
}
