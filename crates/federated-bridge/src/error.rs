//! Error types for the federated bridge.

use campus_auth::{AuthError, FederatedAuthError};
use thiserror::Error;

/// Failures inside the bridge machinery. Broker-reported errors are not
/// represented here; they travel as payloads and become
/// [`FederatedAuthError`]s at the orchestrator.
///
/// `Clone` because a creation result is shared by every waiter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    #[error("Bridge timed out: {0}")]
    Timeout(String),

    #[error("Identity frame unavailable: {0}")]
    FrameUnavailable(String),

    #[error("Bridge surface closed")]
    SurfaceClosed,

    #[error("Failed to create bridge surface: {0}")]
    Creation(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Io(err.to_string())
    }
}

impl From<BridgeError> for AuthError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Timeout(_) => AuthError::Timeout,
            other => AuthError::Federated(FederatedAuthError::unexpected(other.to_string())),
        }
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_errors_become_typed_auth_errors() {
        let err: AuthError = BridgeError::Timeout("no reply".into()).into();
        assert!(matches!(err, AuthError::Timeout));

        let err: AuthError = BridgeError::SurfaceClosed.into();
        match err {
            AuthError::Federated(inner) => {
                assert!(inner.is_unexpected());
                assert_eq!(inner.message, "Bridge surface closed");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
