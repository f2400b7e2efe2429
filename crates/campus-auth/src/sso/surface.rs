//! Hidden browsing surface abstraction driven by the SSO flow.

use crate::{AuthResult, Credential};
use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

/// Signal from the in-surface agent when the identity provider rejects the credential.
pub const UNAUTHORIZED_SIGNAL: &str = "UNAUTHORIZED";

/// Signal from the agent when a submitted form came back for another reason.
pub const FORM_REJECTED_SIGNAL: &str = "FORM_REJECTED";

/// Event observed on a hidden surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceEvent {
    /// A top-level page finished loading.
    NavigationCompleted { url: Url },
    /// A top-level navigation failed before a page was shown.
    NavigationFailed { url: Option<Url>, reason: String },
    /// Out-of-band error reported by the automation agent.
    AgentSignal { error: String },
}

/// A hidden surface opened for one handshake.
pub trait HiddenSurface: Send {
    fn id(&self) -> &str;

    /// Close the surface and drop anything handed to its agent.
    fn close(&mut self);
}

/// An opened surface and the event stream it produces.
pub struct SurfaceHandle {
    pub surface: Box<dyn HiddenSurface>,
    pub events: mpsc::Receiver<SurfaceEvent>,
}

/// Opens hidden surfaces at an entry URL with an agent primed with a credential.
#[async_trait]
pub trait SurfaceHost: Send + Sync {
    async fn open(&self, enter: &Url, credential: Credential) -> AuthResult<SurfaceHandle>;
}
