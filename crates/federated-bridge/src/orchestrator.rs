//! Federated sign-in orchestration.

use crate::frame::IdentityFrame;
use crate::loopback::{Launcher, LoopbackFrame};
use crate::manager::{BridgeHost, FrameBridgeHost, FrameFactory, SurfaceManager};
use crate::protocol::interpret_reply;
use crate::surface::SurfaceOptions;
use crate::token::FederatedAuthResult;
use campus_auth::{AuthError, AuthResult};
use campus_config::Config;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_BRIDGE_TIMEOUT: Duration = Duration::from_secs(360);

/// Runs federated sign-ins through the single bridge surface.
///
/// The surface is torn down once the last in-flight sign-in reaches a
/// terminal outcome.
pub struct FederatedSignIn {
    manager: SurfaceManager,
    timeout: Duration,
    in_flight: AtomicUsize,
}

impl FederatedSignIn {
    pub fn new(host: Arc<dyn BridgeHost>) -> Self {
        Self {
            manager: SurfaceManager::new(host),
            timeout: DEFAULT_BRIDGE_TIMEOUT,
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Loopback frames against the configured broker.
    pub fn from_config(config: &Config, launcher: Launcher) -> AuthResult<Self> {
        let broker_url = config.identity_broker_url()?;
        let port = config.callback_port;
        let factory: FrameFactory = Arc::new(move || {
            let frame: Arc<dyn IdentityFrame> =
                Arc::new(LoopbackFrame::new(broker_url.clone(), port, launcher.clone()));
            Ok(frame)
        });
        let options = SurfaceOptions {
            load_timeout: config.frame_load_timeout(),
            response_timeout: config.bridge_surface_timeout(),
        };
        Ok(Self::new(Arc::new(FrameBridgeHost::new(factory, options)))
            .with_timeout(config.bridge_timeout()))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn manager(&self) -> &SurfaceManager {
        &self.manager
    }

    pub async fn federated_sign_in(&self, login_hint: &str) -> AuthResult<FederatedAuthResult> {
        let flight = InFlight::enter(&self.in_flight, &self.manager);
        let outcome = self.run(login_hint).await;
        if flight.leave() {
            self.manager.teardown().await;
        }

        match &outcome {
            Ok(result) => info!(uid = %result.user.uid, "federated sign-in succeeded"),
            Err(AuthError::Federated(err)) => {
                warn!(code = %err.code, "federated sign-in rejected by broker")
            }
            Err(e) => warn!(kind = e.kind(), "federated sign-in failed"),
        }
        outcome
    }

    async fn run(&self, login_hint: &str) -> AuthResult<FederatedAuthResult> {
        let surface = self.manager.ensure_exists().await?;
        let reply = surface.request(login_hint, self.timeout).await?;
        interpret_reply(reply)
    }
}

/// Counts a sign-in as in flight until it leaves or is dropped.
///
/// A sign-in dropped before reaching an outcome still tears the surface down
/// when it was the last one in flight.
struct InFlight<'a> {
    counter: &'a AtomicUsize,
    manager: &'a SurfaceManager,
    left: bool,
}

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, manager: &'a SurfaceManager) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self {
            counter,
            manager,
            left: false,
        }
    }

    /// Returns true for the last sign-in to leave.
    fn leave(mut self) -> bool {
        self.left = true;
        self.counter.fetch_sub(1, Ordering::SeqCst) == 1
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.left || self.counter.fetch_sub(1, Ordering::SeqCst) != 1 {
            return;
        }
        let teardown = self.manager.detach();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("federated sign-in cancelled, tearing down bridge surface");
                handle.spawn(teardown);
            }
            Err(_) => warn!("federated sign-in dropped outside a runtime, surface left to drop"),
        }
    }
}
