//! CLI command implementations.

mod config;
mod federated;
mod portal;

pub use config::config;
pub use federated::federated_sign_in;
pub use portal::{api_get, auth_test, fetch, post};

use crate::output::OutputFormat;
use anyhow::Result;
use campus_auth::Credential;
use campus_config::{Config, Paths};
use std::io::{self, Write};

/// Environment variable holding the SSO password.
pub const PASSWORD_ENV: &str = "CAMPUS_AUTH_PASSWORD";

pub struct Context {
    pub config: Config,
    pub paths: Paths,
    pub format: OutputFormat,
}

/// Build the SSO credential, prompting for whatever is missing.
pub fn read_credential(user: Option<String>) -> Result<Credential> {
    let identifier = match user.filter(|u| !u.trim().is_empty()) {
        Some(user) => user.trim().to_string(),
        None => {
            print!("User ID: ");
            io::stdout().flush()?;
            let mut user = String::new();
            io::stdin().read_line(&mut user)?;
            user.trim().to_string()
        }
    };
    if identifier.is_empty() {
        anyhow::bail!("User ID is required");
    }

    let secret = match std::env::var(PASSWORD_ENV) {
        Ok(password) if !password.is_empty() => password,
        _ => rpassword::prompt_password("Password: ")?,
    };
    if secret.is_empty() {
        anyhow::bail!("Password is required");
    }

    Ok(Credential::new(identifier, secret))
}
