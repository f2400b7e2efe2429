//! Request-sending primitive shared by every provider.
//!
//! A [`Transport`] issues one request, bounded by a timeout and an optional
//! caller-owned [`CancellationToken`]. Non-success statuses are classified by
//! [`ClientMode`] so that a 503 from a portal or from the identity API
//! surfaces as a maintenance error instead of a generic network failure.

use crate::{AuthError, AuthResult};
use async_trait::async_trait;
use reqwest::cookie::Jar;
use reqwest::header::USER_AGENT;
use reqwest::{Client, Method, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client-identity header value attached to every request.
pub const CLIENT_IDENTITY: &str = concat!("PassPal/", env!("CARGO_PKG_VERSION"), " (campus-auth)");

const MAX_REDIRECTS: usize = 10;

/// How non-success statuses are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientMode {
    #[default]
    Default,
    /// University portal traffic.
    Portal,
    /// Identity API traffic.
    IdentityApi,
}

/// `base` followed by `path`, verbatim (query strings included).
///
/// Unlike [`Url::join`], a base path is never replaced by a rooted `path`.
pub fn join_path(base: &Url, path: &str) -> AuthResult<Url> {
    let base = base.as_str().trim_end_matches('/');
    Ok(Url::parse(&format!("{}{}", base, path))?)
}

/// Options for a single request.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub method: Method,
    pub body: Option<String>,
    pub headers: Vec<(String, String)>,
    pub mode: ClientMode,
    /// Overrides the transport's default timeout.
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl RequestOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn post(body: impl Into<String>) -> Self {
        Self {
            method: Method::POST,
            body: Some(body.into()),
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: ClientMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Successful response, already read to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    /// URL after following redirects.
    pub final_url: Url,
    pub body: String,
}

/// Request-sending primitive.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, target: &Url, options: RequestOptions) -> AuthResult<TransportResponse>;
}

/// Build the HTTP client used for one service.
///
/// The cookie jar carries the session established by the SSO handshake, so
/// the transport and the handshake surface of a service must share it.
pub fn build_client(jar: Arc<Jar>) -> AuthResult<Client> {
    Client::builder()
        .cookie_provider(jar)
        .user_agent(CLIENT_IDENTITY)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .build()
        .map_err(|e| AuthError::Process(format!("failed to build HTTP client: {}", e)))
}

/// [`Transport`] backed by reqwest.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    default_timeout: Duration,
}

impl HttpTransport {
    /// Transport with its own, empty cookie jar.
    pub fn new() -> AuthResult<Self> {
        Ok(Self::from_client(build_client(Arc::new(Jar::default()))?))
    }

    pub fn from_client(client: Client) -> Self {
        Self {
            client,
            default_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    async fn exchange(&self, target: &Url, options: RequestOptions) -> AuthResult<TransportResponse> {
        let mut request = self.client.request(options.method.clone(), target.clone());
        for (name, value) in &options.headers {
            // The client identity is fixed; callers cannot replace it.
            if name.eq_ignore_ascii_case(USER_AGENT.as_str()) {
                continue;
            }
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = options.body {
            request = request.body(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| request_error(target.as_str(), e))?;
        let status = response.status();
        let final_url = response.url().clone();

        if !status.is_success() {
            return Err(classify_status(options.mode, status, &final_url));
        }

        let body = response
            .text()
            .await
            .map_err(|e| request_error(final_url.as_str(), e))?;

        Ok(TransportResponse {
            status: status.as_u16(),
            final_url,
            body,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, target: &Url, options: RequestOptions) -> AuthResult<TransportResponse> {
        let timeout = options.timeout.unwrap_or(self.default_timeout);
        let cancel = options.cancel.clone().unwrap_or_default();

        if cancel.is_cancelled() {
            return Err(AuthError::network(target.as_str(), "request cancelled"));
        }

        debug!(method = %options.method, url = %target, mode = ?options.mode, "sending request");

        tokio::select! {
            result = self.exchange(target, options) => result,
            _ = tokio::time::sleep(timeout) => {
                warn!(url = %target, timeout_ms = timeout.as_millis() as u64, "request timed out");
                Err(AuthError::Timeout)
            }
            _ = cancel.cancelled() => {
                debug!(url = %target, "request cancelled by caller");
                Err(AuthError::network(target.as_str(), "request cancelled"))
            }
        }
    }
}

fn classify_status(mode: ClientMode, status: StatusCode, url: &Url) -> AuthError {
    match (mode, status) {
        (ClientMode::Portal, StatusCode::SERVICE_UNAVAILABLE) => AuthError::PortalMaintenance,
        (ClientMode::IdentityApi, StatusCode::SERVICE_UNAVAILABLE) => AuthError::ApiMaintenance,
        _ => {
            warn!(status = status.as_u16(), url = %url, "HTTP error");
            AuthError::Network {
                status: Some(status.as_u16()),
                url: url.to_string(),
                message: format!("HTTP error: {}", status),
            }
        }
    }
}

fn request_error(url: &str, err: reqwest::Error) -> AuthError {
    if err.is_timeout() {
        return AuthError::Timeout;
    }
    AuthError::Network {
        status: err.status().map(|s| s.as_u16()),
        url: url.to_string(),
        message: err.to_string(),
    }
}
