//! Configuration management for campus-auth.

use crate::{ConfigError, ConfigResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default learning-portal (manabo) origin.
pub const DEFAULT_LEARNING_PORTAL_URL: &str = "https://manabo.cnc.chukyo-u.ac.jp";

/// Default student-information system (cubics) origin.
pub const DEFAULT_STUDENT_INFO_URL: &str = "https://cubics-as-out.mng.chukyo-u.ac.jp";

/// Default campus-portal (albo) origin.
pub const DEFAULT_CAMPUS_PORTAL_URL: &str = "https://cubics-pt-out.mng.chukyo-u.ac.jp";

/// Default identity API origin (can be overridden at compile time via CAMPUS_IDENTITY_API_URL).
pub const DEFAULT_IDENTITY_API_URL: &str = match option_env!("CAMPUS_IDENTITY_API_URL") {
    Some(url) => url,
    None => "https://api.chukyo-passpal.app",
};

/// Default identity broker page loaded by the federated bridge.
pub const DEFAULT_IDENTITY_BROKER_URL: &str = match option_env!("CAMPUS_IDENTITY_BROKER_URL") {
    Some(url) => url,
    None => "https://chukyo-passpal.app/extensions/auth",
};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Environment variable that overrides the log level at runtime.
const LOG_LEVEL_ENV: &str = "CAMPUS_AUTH_LOG_LEVEL";

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_learning_portal_url")]
    pub learning_portal_url: String,
    #[serde(default = "default_student_info_url")]
    pub student_info_url: String,
    #[serde(default = "default_campus_portal_url")]
    pub campus_portal_url: String,
    #[serde(default = "default_identity_api_url")]
    pub identity_api_url: String,
    #[serde(default = "default_identity_broker_url")]
    pub identity_broker_url: String,
    /// Per-request timeout for portal and API traffic.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Upper bound on one SSO handshake.
    #[serde(default = "default_sso_timeout_secs")]
    pub sso_timeout_secs: u64,
    /// How long an established session is trusted without re-authenticating.
    #[serde(default = "default_session_validity_mins")]
    pub session_validity_mins: u64,
    /// Retries after the first attempt for retrying providers.
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_jitter_ms")]
    pub retry_jitter_ms: u64,
    /// Orchestrator-side deadline for a federated sign-in.
    #[serde(default = "default_bridge_timeout_secs")]
    pub bridge_timeout_secs: u64,
    /// Surface-side deadline for a federated sign-in.
    #[serde(default = "default_bridge_surface_timeout_secs")]
    pub bridge_surface_timeout_secs: u64,
    #[serde(default = "default_frame_load_timeout_secs")]
    pub frame_load_timeout_secs: u64,
    /// Port for the loopback identity frame callback listener.
    #[serde(default = "default_callback_port")]
    pub callback_port: u16,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_learning_portal_url() -> String {
    DEFAULT_LEARNING_PORTAL_URL.to_string()
}

fn default_student_info_url() -> String {
    DEFAULT_STUDENT_INFO_URL.to_string()
}

fn default_campus_portal_url() -> String {
    DEFAULT_CAMPUS_PORTAL_URL.to_string()
}

fn default_identity_api_url() -> String {
    DEFAULT_IDENTITY_API_URL.to_string()
}

fn default_identity_broker_url() -> String {
    DEFAULT_IDENTITY_BROKER_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_sso_timeout_secs() -> u64 {
    60
}

fn default_session_validity_mins() -> u64 {
    25
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    200
}

fn default_retry_jitter_ms() -> u64 {
    300
}

fn default_bridge_timeout_secs() -> u64 {
    360
}

fn default_bridge_surface_timeout_secs() -> u64 {
    300
}

fn default_frame_load_timeout_secs() -> u64 {
    10
}

fn default_callback_port() -> u16 {
    9876
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            learning_portal_url: default_learning_portal_url(),
            student_info_url: default_student_info_url(),
            campus_portal_url: default_campus_portal_url(),
            identity_api_url: default_identity_api_url(),
            identity_broker_url: default_identity_broker_url(),
            request_timeout_secs: default_request_timeout_secs(),
            sso_timeout_secs: default_sso_timeout_secs(),
            session_validity_mins: default_session_validity_mins(),
            retry_count: default_retry_count(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_jitter_ms: default_retry_jitter_ms(),
            bridge_timeout_secs: default_bridge_timeout_secs(),
            bridge_surface_timeout_secs: default_bridge_surface_timeout_secs(),
            frame_load_timeout_secs: default_frame_load_timeout_secs(),
            callback_port: default_callback_port(),
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the config file, falling back to defaults.
    pub fn load(paths: &Paths) -> ConfigResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        // Environment variables can only override log_level
        config.load_from_env();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the config file.
    pub fn save(&self, paths: &Paths) -> ConfigResult<()> {
        paths.ensure_dirs()?;
        let config_path = paths.config_file();
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    fn load_from_env(&mut self) {
        if let Ok(log_level) = std::env::var(LOG_LEVEL_ENV) {
            if !log_level.trim().is_empty() {
                self.log_level = log_level.trim().to_string();
            }
        }
    }

    /// Check that every URL parses and the timing values are usable.
    pub fn validate(&self) -> ConfigResult<()> {
        self.learning_portal_url()?;
        self.student_info_url()?;
        self.campus_portal_url()?;
        self.identity_api_url()?;
        self.identity_broker_url()?;

        if self.request_timeout_secs == 0 || self.sso_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "timeouts must be greater than zero".to_string(),
            ));
        }
        if self.bridge_surface_timeout_secs > self.bridge_timeout_secs {
            return Err(ConfigError::Invalid(format!(
                "bridge_surface_timeout_secs ({}) must not exceed bridge_timeout_secs ({})",
                self.bridge_surface_timeout_secs, self.bridge_timeout_secs
            )));
        }
        Ok(())
    }

    pub fn learning_portal_url(&self) -> ConfigResult<Url> {
        Url::parse(&self.learning_portal_url).map_err(ConfigError::from)
    }

    pub fn student_info_url(&self) -> ConfigResult<Url> {
        Url::parse(&self.student_info_url).map_err(ConfigError::from)
    }

    pub fn campus_portal_url(&self) -> ConfigResult<Url> {
        Url::parse(&self.campus_portal_url).map_err(ConfigError::from)
    }

    pub fn identity_api_url(&self) -> ConfigResult<Url> {
        Url::parse(&self.identity_api_url).map_err(ConfigError::from)
    }

    pub fn identity_broker_url(&self) -> ConfigResult<Url> {
        Url::parse(&self.identity_broker_url).map_err(ConfigError::from)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn sso_timeout(&self) -> Duration {
        Duration::from_secs(self.sso_timeout_secs)
    }

    pub fn session_validity(&self) -> Duration {
        Duration::from_secs(self.session_validity_mins * 60)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_jitter(&self) -> Duration {
        Duration::from_millis(self.retry_jitter_ms)
    }

    pub fn bridge_timeout(&self) -> Duration {
        Duration::from_secs(self.bridge_timeout_secs)
    }

    pub fn bridge_surface_timeout(&self) -> Duration {
        Duration::from_secs(self.bridge_surface_timeout_secs)
    }

    pub fn frame_load_timeout(&self) -> Duration {
        Duration::from_secs(self.frame_load_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.learning_portal_url, DEFAULT_LEARNING_PORTAL_URL);
        assert_eq!(config.session_validity(), Duration::from_secs(25 * 60));
        assert_eq!(config.retry_count, 3);
        assert_eq!(config.sso_timeout(), Duration::from_secs(60));
        assert_eq!(config.bridge_timeout(), Duration::from_secs(360));
        assert_eq!(config.bridge_surface_timeout(), Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_load_from_file_fills_missing_fields() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");

        let config_json = r#"{
            "log_level": "debug",
            "retry_count": 1
        }"#;

        std::fs::write(&config_path, config_json).unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.retry_count, 1);
        assert_eq!(config.campus_portal_url, DEFAULT_CAMPUS_PORTAL_URL);
        assert_eq!(config.callback_port, 9876);
    }

    #[test]
    fn test_config_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let mut config = Config::default();
        config.student_info_url = "https://cubics.example.test".to_string();
        config.sso_timeout_secs = 30;

        config.save(&paths).unwrap();

        let loaded = Config::load(&paths).unwrap();
        assert_eq!(loaded.student_info_url, "https://cubics.example.test");
        assert_eq!(loaded.sso_timeout_secs, 30);
    }

    #[test]
    fn test_config_load_nonexistent_uses_defaults() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = Config::load(&paths).unwrap();
        assert_eq!(config.identity_api_url, DEFAULT_IDENTITY_API_URL);
    }

    #[test]
    fn test_config_invalid_url() {
        let config = Config {
            campus_portal_url: "not a valid url".to_string(),
            ..Config::default()
        };

        assert!(config.campus_portal_url().is_err());
        assert!(matches!(config.validate(), Err(ConfigError::InvalidUrl(_))));
    }

    #[test]
    fn test_config_rejects_surface_timeout_longer_than_bridge() {
        let config = Config {
            bridge_surface_timeout_secs: 400,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
