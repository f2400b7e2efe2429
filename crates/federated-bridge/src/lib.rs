//! Federated (Google-backed) sign-in bridge.
//!
//! A [`FederatedSignIn`] keeps at most one hidden [`BridgeSurface`] alive.
//! The surface hosts an [`IdentityFrame`] pointed at the identity broker,
//! posts it an init message carrying the login hint, and relays the first
//! qualifying broker message back as a correlated response.
//!
//! ```text
//! federated_sign_in ──► SurfaceManager::ensure_exists ──► BridgeSurface ──► IdentityFrame
//!        ▲                                                     │
//!        └────────────── correlated BridgeResponse ◄───────────┘
//! ```
//!
//! Deadlines: 6 minutes for the orchestrator, 5 minutes inside the surface,
//! 10 seconds for the frame to load.

mod error;
mod frame;
mod loopback;
mod manager;
mod orchestrator;
mod protocol;
mod surface;
mod token;

pub use error::{BridgeError, BridgeResult};
pub use frame::IdentityFrame;
pub use loopback::{Launcher, LoopbackFrame, DEFAULT_CALLBACK_PORT};
pub use manager::{BridgeHost, FrameBridgeHost, FrameFactory, SurfaceManager};
pub use orchestrator::{FederatedSignIn, DEFAULT_BRIDGE_TIMEOUT};
pub use protocol::{
    interpret_reply, parse_frame_data, BridgeRequest, BridgeResponse, FrameMessage, InitMessage,
    SurfaceReply, FRAMEWORK_NOISE_PREFIX,
};
pub use surface::{
    BridgeSurface, SurfaceOptions, DEFAULT_FRAME_LOAD_TIMEOUT, DEFAULT_SURFACE_RESPONSE_TIMEOUT,
};
pub use token::{
    decode_id_token, is_token_expired, token_time_remaining, AuthenticatedUser,
    FederatedAuthResult, FederatedUser, IdTokenPayload, OperationType, ProviderData,
    TokenError, TokenResponse,
};
