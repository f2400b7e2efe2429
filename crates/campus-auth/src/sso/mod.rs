//! SSO handshake orchestration.
//!
//! [`SsoFlow::perform_sso`] opens a hidden surface at the service's entry URL
//! and races three event classes against a deadline:
//!
//! ```text
//! NavigationCompleted(url starts with goal) ──► Established
//! NavigationFailed                          ──► ProcessError
//! AgentSignal("UNAUTHORIZED")               ──► Unauthorized
//! AgentSignal(other)                        ──► ProcessError
//! deadline                                  ──► Timeout
//! ```
//!
//! Whichever settles first wins. The surface is closed exactly once, also
//! when the caller drops the future before it settles.

mod form;
mod headless;
mod surface;

pub use form::{find_login_form, find_post_back_form, has_error_indicator, DiscoveredForm};
pub use headless::{HttpSurface, HttpSurfaceHost, DEFAULT_MAX_HOPS};
pub use surface::{
    HiddenSurface, SurfaceEvent, SurfaceHandle, SurfaceHost, FORM_REJECTED_SIGNAL,
    UNAUTHORIZED_SIGNAL,
};

use crate::{AuthError, AuthResult, Credential};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Upper bound on one handshake.
pub const DEFAULT_SSO_TIMEOUT: Duration = Duration::from_secs(60);

/// Terminal outcome of one handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    Established,
    Unauthorized,
    ProcessError(String),
    Timeout,
}

impl HandshakeOutcome {
    pub fn into_result(self) -> AuthResult<()> {
        match self {
            HandshakeOutcome::Established => Ok(()),
            HandshakeOutcome::Unauthorized => Err(AuthError::Unauthorized),
            HandshakeOutcome::ProcessError(reason) => Err(AuthError::Process(reason)),
            HandshakeOutcome::Timeout => Err(AuthError::Timeout),
        }
    }
}

/// Establishes a session for a service.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, enter: &Url, goal: &Url, credential: &Credential)
        -> AuthResult<()>;
}

/// Hidden-surface SSO handshake.
pub struct SsoFlow {
    host: Arc<dyn SurfaceHost>,
    timeout: Duration,
}

impl SsoFlow {
    pub fn new(host: Arc<dyn SurfaceHost>) -> Self {
        Self {
            host,
            timeout: DEFAULT_SSO_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run one handshake from `enter` until a page under `goal` loads.
    pub async fn perform_sso(&self, enter: &Url, goal: &Url, credential: &Credential) -> HandshakeOutcome {
        info!(enter = %enter, goal = %goal, "starting SSO handshake");

        let SurfaceHandle { surface, mut events } =
            match self.host.open(enter, credential.clone()).await {
                Ok(handle) => handle,
                Err(err) => {
                    warn!(error = %err, "failed to open hidden surface");
                    return HandshakeOutcome::ProcessError(format!("failed to open surface: {}", err));
                }
            };
        let mut guard = SurfaceGuard::new(surface);

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        let outcome = loop {
            tokio::select! {
                _ = &mut deadline => {
                    if guard.settle() {
                        break HandshakeOutcome::Timeout;
                    }
                }
                event = events.recv() => {
                    let resolved = match event {
                        Some(SurfaceEvent::NavigationCompleted { url }) => {
                            if url.as_str().starts_with(goal.as_str()) {
                                Some(HandshakeOutcome::Established)
                            } else {
                                debug!(surface_id = guard.id(), url = %url, "navigation completed");
                                None
                            }
                        }
                        Some(SurfaceEvent::NavigationFailed { url, reason }) => {
                            debug!(surface_id = guard.id(), url = ?url, %reason, "navigation failed");
                            Some(HandshakeOutcome::ProcessError(reason))
                        }
                        Some(SurfaceEvent::AgentSignal { error }) => {
                            if error == UNAUTHORIZED_SIGNAL {
                                Some(HandshakeOutcome::Unauthorized)
                            } else {
                                Some(HandshakeOutcome::ProcessError(format!("agent reported {}", error)))
                            }
                        }
                        None => Some(HandshakeOutcome::ProcessError(
                            "surface stopped before reaching the goal page".to_string(),
                        )),
                    };
                    if let Some(outcome) = resolved {
                        if guard.settle() {
                            break outcome;
                        }
                    }
                }
            }
        };

        drop(events);
        guard.release();

        match &outcome {
            HandshakeOutcome::Established => info!("SSO handshake established"),
            other => warn!(outcome = ?other, "SSO handshake failed"),
        }
        outcome
    }
}

#[async_trait]
impl Authenticator for SsoFlow {
    async fn authenticate(&self, enter: &Url, goal: &Url, credential: &Credential) -> AuthResult<()> {
        self.perform_sso(enter, goal, credential).await.into_result()
    }
}

/// Owns the surface for one handshake and releases it exactly once.
struct SurfaceGuard {
    surface: Option<Box<dyn HiddenSurface>>,
    settled: AtomicBool,
}

impl SurfaceGuard {
    fn new(surface: Box<dyn HiddenSurface>) -> Self {
        Self {
            surface: Some(surface),
            settled: AtomicBool::new(false),
        }
    }

    fn id(&self) -> &str {
        self.surface.as_ref().map_or("closed", |s| s.id())
    }

    /// True for the first caller only.
    fn settle(&self) -> bool {
        self.settled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn release(&mut self) {
        if let Some(mut surface) = self.surface.take() {
            surface.close();
        }
    }
}

impl Drop for SurfaceGuard {
    fn drop(&mut self) {
        self.release();
    }
}
