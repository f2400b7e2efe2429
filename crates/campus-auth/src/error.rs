//! Authentication error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Code used when the identity broker returned something without a usable code.
pub const UNEXPECTED_CODE: &str = "unexpected";

/// Broker code for a Google account outside the university domain.
pub const INVALID_DOMAIN_CODE: &str = "auth/invalid-domain";

const UNIVERSITY_DOMAIN: &str = "chukyo-u.ac.jp";

/// Structured error reported by the federated identity broker.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct FederatedAuthError {
    /// Machine-readable code (e.g. `auth/invalid-domain`).
    pub code: String,
    /// Broker-supplied description, never shown to the user verbatim.
    pub message: String,
}

impl FederatedAuthError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Error for payloads that carried no recognizable code.
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(UNEXPECTED_CODE, message)
    }

    pub fn is_unexpected(&self) -> bool {
        self.code == UNEXPECTED_CODE
    }

    /// Localized message for display.
    ///
    /// Unknown codes are logged and collapse to a generic message.
    pub fn user_message(&self) -> &'static str {
        if self.code == INVALID_DOMAIN_CODE || self.message.contains(UNIVERSITY_DOMAIN) {
            return "中京大学のメールアドレスでログインしてください。";
        }
        if !self.is_unexpected() {
            warn!(code = %self.code, "unrecognized federated auth error code");
        }
        "認証中にエラーが発生しました"
    }
}

/// Error type for every public entry point of the authentication stack.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Transport-level failure or an unclassified non-2xx response.
    #[error("Network error ({}): {message} [{url}]", status_label(.status))]
    Network {
        status: Option<u16>,
        url: String,
        message: String,
    },

    /// A bounded wait expired.
    #[error("Operation timed out")]
    Timeout,

    /// A university portal answered 503.
    #[error("Campus portal is under maintenance")]
    PortalMaintenance,

    /// The identity API answered 503.
    #[error("Identity API is under maintenance")]
    ApiMaintenance,

    /// The identity provider rejected the credential.
    #[error("Credential rejected by the identity provider")]
    Unauthorized,

    /// The portal kept reporting a missing session after every retry.
    #[error("Session expired")]
    ExpiredSession,

    /// The SSO handshake failed for a reason other than bad credentials.
    #[error("Authentication process failed: {0}")]
    Process(String),

    /// Federated sign-in failed with a broker error.
    #[error("Federated sign-in failed: {0}")]
    Federated(#[from] FederatedAuthError),

    /// No credential has been set on the session holder.
    #[error("No credential configured")]
    CredentialMissing,

    /// URL parse error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AuthError {
    pub(crate) fn network(url: impl Into<String>, message: impl Into<String>) -> Self {
        AuthError::Network {
            status: None,
            url: url.into(),
            message: message.into(),
        }
    }

    /// Short stable identifier, used in structured output.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::Network { .. } => "network",
            AuthError::Timeout => "timeout",
            AuthError::PortalMaintenance => "portal_maintenance",
            AuthError::ApiMaintenance => "api_maintenance",
            AuthError::Unauthorized => "unauthorized",
            AuthError::ExpiredSession => "expired_session",
            AuthError::Process(_) => "process_error",
            AuthError::Federated(_) => "federated",
            AuthError::CredentialMissing => "credential_missing",
            AuthError::InvalidUrl(_) => "invalid_url",
            AuthError::Config(_) => "config",
        }
    }

    /// Localized message shown to the user. Internal details never leak here.
    pub fn user_message(&self) -> &'static str {
        match self {
            AuthError::Network { .. } => "ネットワークエラーが発生しました",
            AuthError::Timeout => "リクエストがタイムアウトしました。",
            AuthError::PortalMaintenance => "ポータルサイトがメンテナンス中です。",
            AuthError::ApiMaintenance => "PassPalがメンテナンス中です。",
            AuthError::Unauthorized => {
                "ログインに失敗しました。IDまたはパスワードが正しくありません。"
            }
            AuthError::ExpiredSession => "セッションの有効期限が切れました。再度ログインしてください。",
            AuthError::Process(_) => "認証処理中にエラーが発生しました。",
            AuthError::Federated(err) => err.user_message(),
            AuthError::CredentialMissing => "ユーザー情報が設定されていません",
            AuthError::InvalidUrl(_) | AuthError::Config(_) => "設定に誤りがあります。",
        }
    }
}

impl From<campus_config::ConfigError> for AuthError {
    fn from(err: campus_config::ConfigError) -> Self {
        match err {
            campus_config::ConfigError::InvalidUrl(e) => AuthError::InvalidUrl(e),
            other => AuthError::Config(other.to_string()),
        }
    }
}

fn status_label(status: &Option<u16>) -> String {
    status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "no status".to_string())
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;
