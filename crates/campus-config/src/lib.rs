//! Configuration, filesystem paths and logging setup for campus-auth.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, DEFAULT_CAMPUS_PORTAL_URL, DEFAULT_IDENTITY_API_URL, DEFAULT_IDENTITY_BROKER_URL,
    DEFAULT_LEARNING_PORTAL_URL, DEFAULT_LOG_LEVEL, DEFAULT_STUDENT_INFO_URL,
};
pub use error::{ConfigError, ConfigResult};
pub use logging::init_logging;
pub use paths::Paths;
