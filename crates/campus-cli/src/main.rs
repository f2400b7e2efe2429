//! campus-auth CLI - sign in to the campus portals and fetch pages.

mod commands;
mod output;

use std::path::PathBuf;

use campus_auth::{AuthError, ServiceKind};
use campus_config::{init_logging, Config, Paths};
use clap::{Parser, Subcommand};
use commands::Context;
use output::OutputFormat;
use tracing::debug;

/// Command-line client for the campus portals.
#[derive(Parser)]
#[command(name = "campus-auth")]
#[command(about = "Authenticated access to the campus portals and the PassPal identity API")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text", global = true)]
    format: OutputFormat,

    /// Log level (trace, debug, info, warn, error). Defaults to the configured level
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Base directory for config and logs. Defaults to ~/.campus-auth
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// SSO user id; the password is read from CAMPUS_AUTH_PASSWORD or prompted
    #[arg(short, long, env = "CAMPUS_AUTH_USER", global = true)]
    user: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one SSO handshake per service and report the outcome
    AuthTest {
        /// Only test this service (learning-portal, student-info, campus-portal)
        #[arg(short, long)]
        service: Option<ServiceKind>,
    },
    /// GET a page from a portal
    Fetch {
        /// learning-portal, student-info or campus-portal
        service: ServiceKind,
        /// Path under the service's base URL
        path: String,
    },
    /// POST to the learning portal
    Post {
        /// Path under the learning portal's base URL
        path: String,
        #[arg(long, default_value = "application/x-www-form-urlencoded")]
        content_type: String,
        #[arg(long, default_value = "")]
        body: String,
    },
    /// GET from the PassPal identity API
    ApiGet {
        path: String,
    },
    /// Sign in through the federated identity broker
    FederatedSignIn {
        /// Account to preselect at the broker
        #[arg(long)]
        login_hint: Option<String>,
    },
    /// Show or initialise the configuration
    Config {
        /// Write the current configuration to the config file
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let format = cli.format;

    if let Err(e) = run(cli).await {
        match e.downcast_ref::<AuthError>() {
            Some(auth) => {
                debug!(error = %auth, "command failed");
                output::print_error(auth.kind(), auth.user_message(), &format);
            }
            None => output::print_error("error", &format!("{:#}", e), &format),
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    let config = Config::load(&paths)?;
    init_logging(cli.log_level.as_deref().unwrap_or(&config.log_level), &paths);

    let ctx = Context {
        config,
        paths,
        format: cli.format,
    };

    match cli.command {
        Commands::AuthTest { service } => {
            let credential = commands::read_credential(cli.user)?;
            commands::auth_test(&ctx, credential, service).await
        }
        Commands::Fetch { service, path } => {
            let credential = commands::read_credential(cli.user)?;
            commands::fetch(&ctx, credential, service, &path).await
        }
        Commands::Post {
            path,
            content_type,
            body,
        } => {
            let credential = commands::read_credential(cli.user)?;
            commands::post(&ctx, credential, &path, &content_type, &body).await
        }
        Commands::ApiGet { path } => commands::api_get(&ctx, &path).await,
        Commands::FederatedSignIn { login_hint } => {
            commands::federated_sign_in(&ctx, login_hint.as_deref()).await
        }
        Commands::Config { init } => commands::config(&ctx, init),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_fetch() {
        let cli = Cli::try_parse_from([
            "campus-auth",
            "fetch",
            "cubics",
            "/unias/UnSSOLoginControl2",
            "--format",
            "json",
        ])
        .unwrap();
        match cli.command {
            Commands::Fetch { service, path } => {
                assert_eq!(service, ServiceKind::StudentInfo);
                assert_eq!(path, "/unias/UnSSOLoginControl2");
            }
            _ => panic!("expected fetch"),
        }
        assert!(matches!(cli.format, OutputFormat::Json));
    }

    #[test]
    fn test_cli_rejects_unknown_service() {
        assert!(Cli::try_parse_from(["campus-auth", "fetch", "moodle", "/"]).is_err());
    }

    #[test]
    fn test_cli_post_defaults() {
        let cli = Cli::try_parse_from(["campus-auth", "post", "/announcement/"]).unwrap();
        match cli.command {
            Commands::Post { content_type, body, .. } => {
                assert_eq!(content_type, "application/x-www-form-urlencoded");
                assert!(body.is_empty());
            }
            _ => panic!("expected post"),
        }
    }
}
