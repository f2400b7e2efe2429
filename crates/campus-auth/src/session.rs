//! Per-service session holder.
//!
//! A [`SessionHolder`] owns the credential and the validity window of one
//! service. Callers go through [`SessionHolder::ensure_authenticated`], which
//! runs the SSO handshake only when the window has lapsed. Concurrent callers
//! on the same holder share one handshake.
//!
//! ## Phases
//!
//! ```text
//! Unauthenticated ──AuthStarted──► Authenticating ──AuthSucceeded──► Authenticated
//!        ▲                               │                                 │
//!        └──────────AuthFailed───────────┘                                 │
//!        └──────────────────────────Invalidated────────────────────────────┘
//! ```

use crate::sso::Authenticator;
use crate::transport::join_path;
use crate::{AuthError, AuthResult, Clock, Credential};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_fsm::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// How long an established session is trusted.
pub const DEFAULT_VALIDITY_WINDOW: Duration = Duration::from_secs(25 * 60);

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub session_machine(Unauthenticated)

    Unauthenticated => {
        AuthStarted => Authenticating,
        Invalidated => Unauthenticated
    },
    Authenticating => {
        AuthSucceeded => Authenticated,
        AuthFailed => Unauthenticated,
        // The running handshake still stamps the session when it finishes
        Invalidated => Authenticating
    },
    Authenticated => {
        // Window lapsed without an explicit invalidation
        AuthStarted => Authenticating,
        Invalidated => Unauthenticated
    }
}

pub use session_machine::Input as SessionMachineInput;
pub use session_machine::State as SessionMachineState;
pub use session_machine::StateMachine as SessionMachine;

/// Phase of a holder, for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Unauthenticated,
    Authenticating,
    Authenticated,
}

impl From<&SessionMachineState> for SessionPhase {
    fn from(state: &SessionMachineState) -> Self {
        match state {
            SessionMachineState::Unauthenticated => SessionPhase::Unauthenticated,
            SessionMachineState::Authenticating => SessionPhase::Authenticating,
            SessionMachineState::Authenticated => SessionPhase::Authenticated,
        }
    }
}

/// When the session was last established and how long it is trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionState {
    pub last_authenticated_at: DateTime<Utc>,
    pub validity_window: chrono::Duration,
}

impl SessionState {
    pub fn new(validity_window: Duration) -> Self {
        Self {
            last_authenticated_at: DateTime::<Utc>::UNIX_EPOCH,
            validity_window: chrono::Duration::from_std(validity_window)
                .unwrap_or(chrono::Duration::MAX),
        }
    }

    /// Valid iff `now < last_authenticated_at + validity_window`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        match self.last_authenticated_at.checked_add_signed(self.validity_window) {
            Some(expires_at) => now < expires_at,
            None => true,
        }
    }

    pub fn mark_authenticated(&mut self, now: DateTime<Utc>) {
        self.last_authenticated_at = now;
    }

    pub fn invalidate(&mut self) {
        self.last_authenticated_at = DateTime::<Utc>::UNIX_EPOCH;
    }
}

/// Where a service's handshake starts and which page proves it finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceProfile {
    pub name: String,
    pub base_url: Url,
    pub enter_path: String,
    pub goal_path: String,
}

impl ServiceProfile {
    pub fn new(
        name: impl Into<String>,
        base_url: Url,
        enter_path: impl Into<String>,
        goal_path: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url,
            enter_path: enter_path.into(),
            goal_path: goal_path.into(),
        }
    }

    pub fn url_for(&self, path: &str) -> AuthResult<Url> {
        join_path(&self.base_url, path)
    }

    pub fn enter_url(&self) -> AuthResult<Url> {
        self.url_for(&self.enter_path)
    }

    pub fn goal_url(&self) -> AuthResult<Url> {
        self.url_for(&self.goal_path)
    }
}

struct HolderState {
    credential: Option<Credential>,
    session: SessionState,
}

/// Owns one service's credential and session validity.
pub struct SessionHolder {
    profile: ServiceProfile,
    authenticator: Arc<dyn Authenticator>,
    clock: Arc<dyn Clock>,
    state: Mutex<HolderState>,
    fsm: Mutex<SessionMachine>,
    /// Serializes handshakes so concurrent callers share one.
    auth_gate: tokio::sync::Mutex<()>,
    invalidations: AtomicU64,
}

impl SessionHolder {
    pub fn new(
        profile: ServiceProfile,
        authenticator: Arc<dyn Authenticator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            profile,
            authenticator,
            clock,
            state: Mutex::new(HolderState {
                credential: None,
                session: SessionState::new(DEFAULT_VALIDITY_WINDOW),
            }),
            fsm: Mutex::new(SessionMachine::new()),
            auth_gate: tokio::sync::Mutex::new(()),
            invalidations: AtomicU64::new(0),
        }
    }

    pub fn with_validity_window(self, window: Duration) -> Self {
        {
            let mut state = self.state.lock();
            let last = state.session.last_authenticated_at;
            state.session = SessionState::new(window);
            state.session.last_authenticated_at = last;
        }
        self
    }

    pub fn profile(&self) -> &ServiceProfile {
        &self.profile
    }

    /// Replace the stored credential. A currently valid session stays valid.
    pub fn set_credential(&self, credential: Option<Credential>) {
        self.state.lock().credential = credential;
    }

    pub fn has_credential(&self) -> bool {
        self.state.lock().credential.is_some()
    }

    pub fn session_state(&self) -> SessionState {
        self.state.lock().session
    }

    pub fn is_valid(&self) -> bool {
        let now = self.clock.now();
        self.state.lock().session.is_valid_at(now)
    }

    pub fn phase(&self) -> SessionPhase {
        SessionPhase::from(self.fsm.lock().state())
    }

    /// Number of invalidations since creation.
    pub fn invalidation_count(&self) -> u64 {
        self.invalidations.load(Ordering::SeqCst)
    }

    /// Force a handshake on next use.
    pub fn invalidate(&self) {
        self.state.lock().session.invalidate();
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        self.transition(&SessionMachineInput::Invalidated);
        debug!(service = %self.profile.name, "session invalidated");
    }

    /// Run the SSO handshake unless the session is still inside its window.
    pub async fn ensure_authenticated(&self) -> AuthResult<()> {
        if !self.has_credential() {
            return Err(AuthError::CredentialMissing);
        }

        if self.is_valid() {
            return Ok(());
        }

        let _gate = self.auth_gate.lock().await;
        // Another caller may have finished a handshake while we waited.
        if self.is_valid() {
            debug!(service = %self.profile.name, "session established by concurrent caller");
            return Ok(());
        }

        // Read after the gate so a credential replaced while waiting is used.
        let credential = self
            .state
            .lock()
            .credential
            .clone()
            .ok_or(AuthError::CredentialMissing)?;
        self.run_handshake(&credential).await
    }

    /// Run one handshake with `credential`, ignoring the validity window.
    ///
    /// The credential is not stored.
    pub async fn force_authenticate(&self, credential: &Credential) -> AuthResult<()> {
        let _gate = self.auth_gate.lock().await;
        self.run_handshake(credential).await
    }

    async fn run_handshake(&self, credential: &Credential) -> AuthResult<()> {
        let enter = self.profile.enter_url()?;
        let goal = self.profile.goal_url()?;

        self.transition(&SessionMachineInput::AuthStarted);
        match self.authenticator.authenticate(&enter, &goal, credential).await {
            Ok(()) => {
                let now = self.clock.now();
                self.state.lock().session.mark_authenticated(now);
                self.transition(&SessionMachineInput::AuthSucceeded);
                info!(service = %self.profile.name, "session established");
                Ok(())
            }
            Err(err) => {
                self.transition(&SessionMachineInput::AuthFailed);
                warn!(service = %self.profile.name, error = %err, "authentication failed");
                Err(err)
            }
        }
    }

    fn transition(&self, input: &SessionMachineInput) {
        let mut fsm = self.fsm.lock();
        let old_phase = SessionPhase::from(fsm.state());
        if fsm.consume(input).is_err() {
            warn!(
                service = %self.profile.name,
                phase = ?old_phase,
                input = ?input,
                "ignored invalid session transition"
            );
            return;
        }
        let new_phase = SessionPhase::from(fsm.state());
        if old_phase != new_phase {
            debug!(
                service = %self.profile.name,
                old_phase = ?old_phase,
                new_phase = ?new_phase,
                "session phase transition"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ManualClock;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct CountingAuthenticator {
        calls: AtomicUsize,
        fail_with_unauthorized: bool,
        delay: Duration,
    }

    impl CountingAuthenticator {
        fn ok() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_with_unauthorized: false,
                delay: Duration::ZERO,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Authenticator for CountingAuthenticator {
        async fn authenticate(&self, enter: &Url, goal: &Url, _credential: &Credential) -> AuthResult<()> {
            assert_eq!(enter.path(), "/login");
            assert_eq!(goal.path(), "/home");
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail_with_unauthorized {
                Err(AuthError::Unauthorized)
            } else {
                Ok(())
            }
        }
    }

    fn profile() -> ServiceProfile {
        ServiceProfile::new(
            "test",
            Url::parse("https://portal.example").unwrap(),
            "/login",
            "/home",
        )
    }

    fn start() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-04-01T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn holder(auth: Arc<CountingAuthenticator>, clock: Arc<ManualClock>) -> SessionHolder {
        let holder = SessionHolder::new(profile(), auth, clock);
        holder.set_credential(Some(Credential::new("s12345", "pw")));
        holder
    }

    #[test]
    fn test_validity_window_boundaries() {
        let mut state = SessionState::new(DEFAULT_VALIDITY_WINDOW);
        let t0 = start();
        state.mark_authenticated(t0);
        let window = chrono::Duration::minutes(25);
        let second = chrono::Duration::seconds(1);

        assert!(state.is_valid_at(t0));
        assert!(state.is_valid_at(t0 + window - second));
        assert!(!state.is_valid_at(t0 + window));
        assert!(!state.is_valid_at(t0 + window + second));

        state.invalidate();
        assert!(!state.is_valid_at(t0));
    }

    #[test]
    fn test_fresh_state_is_invalid() {
        let state = SessionState::new(DEFAULT_VALIDITY_WINDOW);
        assert!(!state.is_valid_at(start()));
    }

    #[test]
    fn test_profile_urls_concatenate_paths() {
        let profile = ServiceProfile::new(
            "albo",
            Url::parse("https://cubics-pt-out.mng.chukyo-u.ac.jp").unwrap(),
            "/uniprove_pt/UnLoginControl",
            "/uniprove_pt/portal",
        );
        assert_eq!(
            profile.enter_url().unwrap().as_str(),
            "https://cubics-pt-out.mng.chukyo-u.ac.jp/uniprove_pt/UnLoginControl"
        );
        assert_eq!(
            profile.url_for("/uniprove_pt/list?page=2").unwrap().as_str(),
            "https://cubics-pt-out.mng.chukyo-u.ac.jp/uniprove_pt/list?page=2"
        );
    }

    #[tokio::test]
    async fn test_ensure_authenticated_respects_window() {
        let auth = Arc::new(CountingAuthenticator::ok());
        let clock = Arc::new(ManualClock::new(start()));
        let holder = holder(auth.clone(), clock.clone());

        holder.ensure_authenticated().await.unwrap();
        assert_eq!(auth.calls(), 1);
        assert_eq!(holder.session_state().last_authenticated_at, start());
        assert_eq!(holder.phase(), SessionPhase::Authenticated);

        clock.advance(chrono::Duration::minutes(25) - chrono::Duration::seconds(1));
        holder.ensure_authenticated().await.unwrap();
        assert_eq!(auth.calls(), 1);

        clock.advance(chrono::Duration::seconds(2));
        holder.ensure_authenticated().await.unwrap();
        assert_eq!(auth.calls(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_reauthentication() {
        let auth = Arc::new(CountingAuthenticator::ok());
        let clock = Arc::new(ManualClock::new(start()));
        let holder = holder(auth.clone(), clock);

        holder.ensure_authenticated().await.unwrap();
        holder.invalidate();
        assert_eq!(holder.phase(), SessionPhase::Unauthenticated);
        assert_eq!(holder.invalidation_count(), 1);

        holder.ensure_authenticated().await.unwrap();
        assert_eq!(auth.calls(), 2);
    }

    #[tokio::test]
    async fn test_missing_credential_is_typed_error() {
        let auth = Arc::new(CountingAuthenticator::ok());
        let holder = SessionHolder::new(profile(), auth.clone(), Arc::new(ManualClock::new(start())));

        let result = holder.ensure_authenticated().await;
        assert!(matches!(result, Err(AuthError::CredentialMissing)));
        assert_eq!(auth.calls(), 0);
    }

    #[tokio::test]
    async fn test_set_credential_keeps_valid_session() {
        let auth = Arc::new(CountingAuthenticator::ok());
        let clock = Arc::new(ManualClock::new(start()));
        let holder = holder(auth.clone(), clock);

        holder.ensure_authenticated().await.unwrap();
        holder.set_credential(Some(Credential::new("s67890", "other")));
        assert!(holder.is_valid());

        holder.ensure_authenticated().await.unwrap();
        assert_eq!(auth.calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_handshake_propagates_and_leaves_session_invalid() {
        let auth = Arc::new(CountingAuthenticator {
            fail_with_unauthorized: true,
            ..CountingAuthenticator::ok()
        });
        let clock = Arc::new(ManualClock::new(start()));
        let holder = holder(auth, clock);

        let result = holder.ensure_authenticated().await;
        assert!(matches!(result, Err(AuthError::Unauthorized)));
        assert!(!holder.is_valid());
        assert_eq!(holder.phase(), SessionPhase::Unauthenticated);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_handshake() {
        let auth = Arc::new(CountingAuthenticator {
            delay: Duration::from_millis(50),
            ..CountingAuthenticator::ok()
        });
        let clock = Arc::new(ManualClock::new(start()));
        let holder = holder(auth.clone(), clock);

        let (a, b) = tokio::join!(holder.ensure_authenticated(), holder.ensure_authenticated());
        a.unwrap();
        b.unwrap();
        assert_eq!(auth.calls(), 1);
    }

    /// Rejects `rejected_id` after a short delay and records every identifier.
    struct RecordingAuthenticator {
        rejected_id: &'static str,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Authenticator for RecordingAuthenticator {
        async fn authenticate(&self, _enter: &Url, _goal: &Url, credential: &Credential) -> AuthResult<()> {
            self.seen.lock().push(credential.identifier().to_string());
            tokio::time::sleep(Duration::from_millis(50)).await;
            if credential.identifier() == self.rejected_id {
                Err(AuthError::Unauthorized)
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_waiting_caller_uses_credential_replaced_during_handshake() {
        let auth = Arc::new(RecordingAuthenticator {
            rejected_id: "s12345",
            seen: Mutex::new(Vec::new()),
        });
        let holder = SessionHolder::new(profile(), auth.clone(), Arc::new(ManualClock::new(start())));
        holder.set_credential(Some(Credential::new("s12345", "wrong")));

        let (first, second) = tokio::join!(holder.ensure_authenticated(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let (waiting, _) = tokio::join!(holder.ensure_authenticated(), async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                holder.set_credential(Some(Credential::new("s67890", "right")));
            });
            waiting
        });

        assert!(matches!(first, Err(AuthError::Unauthorized)));
        second.unwrap();
        assert_eq!(*auth.seen.lock(), vec!["s12345".to_string(), "s67890".to_string()]);
        assert!(holder.is_valid());
    }

    #[tokio::test]
    async fn test_headless_handshake_stamps_session_at_completion() {
        use crate::sso::{HttpSurfaceHost, SsoFlow};
        use crate::transport::build_client;
        use crate::SystemClock;
        use reqwest::cookie::Jar;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<form method="post" action="/login">
                   <input name="username" type="text"><input name="password" type="password">
                   <input type="submit" name="login" value="Login"></form>"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("Location", format!("{}/intermediate", server.uri())),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/intermediate"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("Location", format!("{}/home", server.uri())),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/home"))
            .respond_with(ResponseTemplate::new(200).set_body_string("home"))
            .mount(&server)
            .await;

        let client = build_client(Arc::new(Jar::default())).unwrap();
        let flow = SsoFlow::new(Arc::new(HttpSurfaceHost::from_client(client)));
        let profile = ServiceProfile::new("portal", Url::parse(&server.uri()).unwrap(), "/login", "/home");
        let holder = SessionHolder::new(profile, Arc::new(flow), Arc::new(SystemClock));
        holder.set_credential(Some(Credential::new("s12345", "pw")));

        let started = std::time::Instant::now();
        holder.ensure_authenticated().await.unwrap();
        let completed_at = Utc::now();

        assert!(started.elapsed() < Duration::from_secs(60));
        let stamped = holder.session_state().last_authenticated_at;
        assert!(completed_at - stamped < chrono::Duration::seconds(1));
        assert!(stamped <= completed_at);
        assert!(holder.is_valid());
        assert_eq!(holder.phase(), SessionPhase::Authenticated);
    }

    #[tokio::test]
    async fn test_force_authenticate_ignores_window() {
        let auth = Arc::new(CountingAuthenticator::ok());
        let clock = Arc::new(ManualClock::new(start()));
        let holder = holder(auth.clone(), clock);

        holder.ensure_authenticated().await.unwrap();
        holder
            .force_authenticate(&Credential::new("s12345", "pw"))
            .await
            .unwrap();
        assert_eq!(auth.calls(), 2);
    }
}
