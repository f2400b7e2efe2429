//! Session-holding clients for the Chukyo University portals.
//!
//! Every SSO-backed service has a [`SessionHolder`] that owns the stored
//! credential and a validity window. Requests go through a provider, which
//! makes sure the session is established (running the SSO handshake in a
//! hidden surface when needed) before talking to the portal.
//!
//! ```text
//! PortalSuite ──► provider ──► SessionHolder ──► SsoFlow ──► SurfaceHost
//!                    │                                        (headless agent)
//!                    └──► Transport (shared cookie jar per service)
//! ```

mod clock;
mod credential;
mod error;
pub mod providers;
mod session;
pub mod sso;
mod suite;
pub mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use credential::Credential;
pub use error::{
    AuthError, AuthResult, FederatedAuthError, INVALID_DOMAIN_CODE, UNEXPECTED_CODE,
};
pub use providers::{
    is_session_valid, CampusPortalProvider, IdentityApiProvider, LearningPortalProvider,
    PortalProvider, RetryPolicy, StudentInfoProvider, MISSING_COOKIE_MARKERS,
};
pub use session::{
    ServiceProfile, SessionHolder, SessionMachine, SessionMachineInput, SessionMachineState,
    SessionPhase, SessionState, DEFAULT_VALIDITY_WINDOW,
};
pub use sso::{Authenticator, HandshakeOutcome, HttpSurfaceHost, SsoFlow, DEFAULT_SSO_TIMEOUT};
pub use suite::{PortalSuite, ServiceKind};
pub use tokio_util::sync::CancellationToken;
pub use transport::{
    build_client, join_path, ClientMode, HttpTransport, RequestOptions, Transport,
    TransportResponse,
};
