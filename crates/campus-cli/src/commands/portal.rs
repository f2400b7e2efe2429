//! Portal and identity API commands.

use super::Context;
use crate::output::{self, OutputFormat};
use anyhow::Result;
use campus_auth::{Credential, PortalSuite, ServiceKind};
use serde::Serialize;
use tracing::info;

#[derive(Serialize)]
struct AuthTestReport {
    service: ServiceKind,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
}

/// Force one handshake per service.
pub async fn auth_test(
    ctx: &Context,
    credential: Credential,
    service: Option<ServiceKind>,
) -> Result<()> {
    let suite = PortalSuite::from_config(&ctx.config)?;
    let kinds = match service {
        Some(kind) => vec![kind],
        None => ServiceKind::ALL.to_vec(),
    };

    let mut reports = Vec::with_capacity(kinds.len());
    for kind in kinds {
        info!(service = %kind, "running auth test");
        let report = match suite.provider(kind).auth_test(&credential).await {
            Ok(_) => AuthTestReport {
                service: kind,
                ok: true,
                error_kind: None,
                message: None,
            },
            Err(e) => AuthTestReport {
                service: kind,
                ok: false,
                error_kind: Some(e.kind()),
                message: Some(e.user_message()),
            },
        };
        reports.push(report);
    }

    match ctx.format {
        OutputFormat::Text => {
            output::print_heading("Auth test");
            for report in &reports {
                let outcome = match report.message {
                    None => "ok",
                    Some(message) => message,
                };
                output::print_row(report.service.as_str(), outcome);
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&reports)?),
    }

    let failed = reports.iter().filter(|r| !r.ok).count();
    if failed > 0 {
        anyhow::bail!("{} of {} services failed to authenticate", failed, reports.len());
    }
    Ok(())
}

pub async fn fetch(ctx: &Context, credential: Credential, service: ServiceKind, path: &str) -> Result<()> {
    let suite = PortalSuite::from_config(&ctx.config)?;
    suite.set_credential(Some(credential));
    let body = suite.provider(service).get(path).await?;
    output::print_body(&body);
    Ok(())
}

pub async fn post(
    ctx: &Context,
    credential: Credential,
    path: &str,
    content_type: &str,
    body: &str,
) -> Result<()> {
    let suite = PortalSuite::from_config(&ctx.config)?;
    suite.set_credential(Some(credential));
    let response = suite.learning.post(path, content_type, body).await?;
    output::print_body(&response);
    Ok(())
}

pub async fn api_get(ctx: &Context, path: &str) -> Result<()> {
    let suite = PortalSuite::from_config(&ctx.config)?;
    let body = suite.identity_api.get(path).await?;
    output::print_body(&body);
    Ok(())
}
