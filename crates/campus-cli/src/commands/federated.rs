//! Federated sign-in command.

use super::Context;
use crate::output;
use anyhow::Result;
use chrono::Utc;
use federated_bridge::{token_time_remaining, FederatedSignIn, Launcher, OperationType};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use url::Url;

#[derive(Serialize)]
struct SignInSummary {
    uid: String,
    email: String,
    display_name: String,
    operation: OperationType,
    token_expires_in_secs: i64,
}

impl fmt::Display for SignInSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Signed in as {} ({})", self.email, self.uid)?;
        if !self.display_name.is_empty() {
            writeln!(f, "Name: {}", self.display_name)?;
        }
        write!(f, "ID token expires in {}s", self.token_expires_in_secs)
    }
}

pub async fn federated_sign_in(ctx: &Context, login_hint: Option<&str>) -> Result<()> {
    let launcher: Launcher = Arc::new(|url: &Url| {
        eprintln!("Continue signing in at:\n  {}", url);
        if let Err(e) = open::that(url.as_str()) {
            debug!(error = %e, "could not open a browser");
        }
    });

    let bridge = FederatedSignIn::from_config(&ctx.config, launcher)?;
    let result = bridge
        .federated_sign_in(login_hint.unwrap_or_default())
        .await?;

    let user = result.authenticated_user();
    let summary = SignInSummary {
        token_expires_in_secs: token_time_remaining(&user.id_token, Utc::now()).num_seconds(),
        uid: user.uid,
        email: user.email,
        display_name: user.display_name,
        operation: result.operation_type,
    };
    output::print(&summary, &ctx.format);
    Ok(())
}
