//! Service providers.
//!
//! Each provider wraps a [`SessionHolder`] and a [`Transport`]. The student
//! information system and the campus portal re-authenticate and retry when a
//! response shows the session was not accepted; the learning portal makes a
//! single authenticated request.

mod campus_portal;
mod identity_api;
mod learning;
mod student_info;

pub use campus_portal::CampusPortalProvider;
pub use identity_api::IdentityApiProvider;
pub use learning::LearningPortalProvider;
pub use student_info::StudentInfoProvider;

use crate::transport::{ClientMode, RequestOptions, Transport, TransportResponse};
use crate::{AuthError, AuthResult, Credential, SessionHolder};
use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;
use tracing::warn;
use url::Url;

/// Body fragments a portal serves when the session cookie did not arrive.
pub const MISSING_COOKIE_MARKERS: [&str; 2] = ["Missing cookie", "クッキーが見つかりません"];

/// Common surface of the SSO-backed providers.
#[async_trait]
pub trait PortalProvider: Send + Sync {
    /// GET `path` under the service's base URL and return the body.
    async fn get(&self, path: &str) -> AuthResult<String>;

    /// Run one handshake with `credential`, ignoring the validity window.
    async fn auth_test(&self, credential: &Credential) -> AuthResult<bool>;

    fn session(&self) -> &SessionHolder;

    fn set_credential(&self, credential: Option<Credential>) {
        self.session().set_credential(credential);
    }

    fn clear_auth_state(&self) {
        self.session().invalidate();
    }
}

/// Bounded re-authentication policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub retry_count: u32,
    pub base_delay: Duration,
    /// Upper bound (exclusive) of the random delay added to `base_delay`.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_count: 3,
            base_delay: Duration::from_millis(200),
            jitter: Duration::from_millis(300),
        }
    }
}

impl RetryPolicy {
    /// Total attempts, the first one included.
    pub fn attempts(&self) -> u32 {
        self.retry_count.saturating_add(1)
    }

    /// Backoff before the next attempt.
    pub fn delay(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let extra = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..jitter_ms)
        };
        self.base_delay + Duration::from_millis(extra)
    }
}

/// Position of one attempt inside a provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAttempt {
    pub number: u32,
    pub bound: u32,
}

/// Whether a portal response was served to an authenticated session.
///
/// The final URL must stay under the service's base URL and the body must not
/// carry a missing-cookie marker.
pub fn is_session_valid(base_url: &Url, response: &TransportResponse) -> bool {
    if !response.final_url.as_str().starts_with(base_url.as_str()) {
        return false;
    }
    !MISSING_COOKIE_MARKERS
        .iter()
        .any(|marker| response.body.contains(marker))
}

/// Options for a portal request.
pub(crate) fn portal_options(options: RequestOptions) -> RequestOptions {
    options
        .with_mode(ClientMode::Portal)
        .with_header("Accept-Language", "ja")
}

/// Authenticate, send, validate; invalidate and back off on a rejected session.
///
/// Transport errors propagate immediately. Only the session-invalid condition
/// is retried.
pub(crate) async fn send_with_session_retry(
    session: &SessionHolder,
    transport: &dyn Transport,
    policy: &RetryPolicy,
    target: &Url,
    options: RequestOptions,
) -> AuthResult<String> {
    let bound = policy.attempts();
    for number in 1..=bound {
        let attempt = RetryAttempt { number, bound };

        session.ensure_authenticated().await?;
        let response = transport.send(target, options.clone()).await?;
        if is_session_valid(&session.profile().base_url, &response) {
            return Ok(response.body);
        }

        warn!(
            service = %session.profile().name,
            attempt = attempt.number,
            bound = attempt.bound,
            final_url = %response.final_url,
            "session rejected by portal, re-authenticating"
        );
        session.invalidate();
        if attempt.number < attempt.bound {
            tokio::time::sleep(policy.delay()).await;
        }
    }
    Err(AuthError::ExpiredSession)
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::{ManualClock, ServiceProfile};
    use chrono::Utc;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    fn no_delay(retry_count: u32) -> RetryPolicy {
        RetryPolicy {
            retry_count,
            base_delay: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    fn session(auth: Arc<CountingAuthenticator>) -> SessionHolder {
        let profile = ServiceProfile::new(
            "cubics",
            Url::parse("https://cubics.example").unwrap(),
            "/unias/UnSSOLoginControl2",
            "/unias/UnSSOLoginControl2",
        );
        let holder = SessionHolder::new(profile, auth, Arc::new(ManualClock::new(Utc::now())));
        holder.set_credential(Some(Credential::new("s12345", "pw")));
        holder
    }

    #[test]
    fn test_session_validity_oracle() {
        let base = Url::parse("https://cubics.example").unwrap();
        assert!(is_session_valid(
            &base,
            &response("https://cubics.example/list", "<title>時間割</title>")
        ));
        assert!(!is_session_valid(
            &base,
            &response("https://sso.example/idp/login", "<title>Login</title>")
        ));
        assert!(!is_session_valid(
            &base,
            &response("https://cubics.example/list", "<title>Missing cookie</title>")
        ));
        assert!(!is_session_valid(
            &base,
            &response("https://cubics.example/list", "<h1>クッキーが見つかりません</h1>")
        ));
    }

    #[test]
    fn test_retry_delay_stays_within_jitter() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts(), 4);
        for _ in 0..50 {
            let delay = policy.delay();
            assert!(delay >= Duration::from_millis(200));
            assert!(delay < Duration::from_millis(500));
        }
    }

    #[tokio::test]
    async fn test_retry_bound_raises_expired_session() {
        let auth = Arc::new(CountingAuthenticator::default());
        let holder = session(auth.clone());
        let transport = ScriptedTransport::always(response(
            "https://cubics.example/list",
            "<title>Missing cookie</title>",
        ));
        let target = Url::parse("https://cubics.example/list").unwrap();

        let result =
            send_with_session_retry(&holder, &transport, &no_delay(3), &target, RequestOptions::get())
                .await;

        assert!(matches!(result, Err(AuthError::ExpiredSession)));
        assert_eq!(transport.sent_count(), 4);
        assert_eq!(holder.invalidation_count(), 4);
        assert_eq!(auth.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_recovers_after_one_rejected_response() {
        let auth = Arc::new(CountingAuthenticator::default());
        let holder = session(auth.clone());
        let transport = ScriptedTransport::always(response("https://cubics.example/list", "ok"));
        transport.push(Ok(response("https://sso.example/idp/login", "login")));
        let target = Url::parse("https://cubics.example/list").unwrap();

        let body =
            send_with_session_retry(&holder, &transport, &no_delay(3), &target, RequestOptions::get())
                .await
                .unwrap();

        assert_eq!(body, "ok");
        assert_eq!(holder.invalidation_count(), 1);
        assert_eq!(auth.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_maintenance_is_not_retried() {
        let auth = Arc::new(CountingAuthenticator::default());
        let holder = session(auth);
        let transport = ScriptedTransport::default();
        transport.push(Err(AuthError::PortalMaintenance));
        let target = Url::parse("https://cubics.example/list").unwrap();

        let result =
            send_with_session_retry(&holder, &transport, &no_delay(3), &target, RequestOptions::get())
                .await;

        assert!(matches!(result, Err(AuthError::PortalMaintenance)));
        assert_eq!(transport.sent_count(), 1);
        assert_eq!(holder.invalidation_count(), 0);
    }
}
