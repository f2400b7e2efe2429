//! Messages exchanged between the orchestrator, the bridge surface and the
//! identity frame.

use crate::token::FederatedAuthResult;
use campus_auth::{AuthError, AuthResult, FederatedAuthError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Prefix of the broker framework's internal messages.
pub const FRAMEWORK_NOISE_PREFIX: &str = "!_{";

/// `name` the broker sets on its structured errors.
const BROKER_ERROR_NAME: &str = "FirebaseError";

/// Posted into the identity frame to start a sign-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitMessage {
    pub init_auth: bool,
    pub login_hint: String,
}

impl InitMessage {
    pub fn new(login_hint: impl Into<String>) -> Self {
        Self {
            init_auth: true,
            login_hint: login_hint.into(),
        }
    }
}

/// A message received from the identity frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameMessage {
    /// Origin of the sender, in ASCII serialization.
    pub origin: String,
    pub data: Value,
}

/// Correlated request from the orchestrator to the surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeRequest {
    pub id: u64,
    pub login_hint: String,
}

/// Correlated response from the surface.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeResponse {
    pub id: u64,
    pub reply: SurfaceReply,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SurfaceReply {
    /// The first qualifying message from the broker.
    Payload { data: Value },
    /// The surface's own response timeout elapsed.
    TimedOut,
    FrameUnavailable { reason: String },
}

/// Turn raw frame data into a broker payload.
///
/// Framework preambles and unparsable strings yield `None` and the listener
/// keeps waiting.
pub fn parse_frame_data(data: &Value) -> Option<Value> {
    match data {
        Value::String(text) if text.starts_with(FRAMEWORK_NOISE_PREFIX) => {
            debug!("ignoring broker framework message");
            None
        }
        Value::String(text) => match serde_json::from_str(text) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(error = %e, "unparsable message from identity frame");
                None
            }
        },
        other => Some(other.clone()),
    }
}

/// Map a surface reply onto the caller-facing result.
pub fn interpret_reply(reply: SurfaceReply) -> AuthResult<FederatedAuthResult> {
    match reply {
        SurfaceReply::Payload { data } => interpret_payload(data),
        SurfaceReply::TimedOut => Err(AuthError::Timeout),
        SurfaceReply::FrameUnavailable { reason } => {
            Err(AuthError::Federated(FederatedAuthError::unexpected(reason)))
        }
    }
}

fn interpret_payload(data: Value) -> AuthResult<FederatedAuthResult> {
    if let Some(error) = broker_error(&data) {
        return Err(AuthError::Federated(error));
    }
    match serde_json::from_value::<FederatedAuthResult>(data) {
        Ok(result) => Ok(result),
        Err(e) => {
            warn!(error = %e, "unrecognised broker payload");
            Err(AuthError::Federated(FederatedAuthError::unexpected(
                "unrecognised response from identity broker",
            )))
        }
    }
}

fn broker_error(data: &Value) -> Option<FederatedAuthError> {
    let object = data.as_object()?;
    let message = object
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default();

    if let Some(code) = object.get("code").and_then(Value::as_str) {
        let named = object.get("name").and_then(Value::as_str) == Some(BROKER_ERROR_NAME);
        if named || !object.contains_key("user") {
            return Some(FederatedAuthError::new(code, message));
        }
    }
    object
        .get("error")
        .map(|error| match error.as_str() {
            Some(text) => FederatedAuthError::unexpected(text),
            None => FederatedAuthError::unexpected(error.to_string()),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use campus_auth::{INVALID_DOMAIN_CODE, UNEXPECTED_CODE};
    use serde_json::json;

    #[test]
    fn test_init_message_wire_format() {
        let value = serde_json::to_value(InitMessage::new("s12345@m.chukyo-u.ac.jp")).unwrap();
        assert_eq!(
            value,
            json!({ "initAuth": true, "loginHint": "s12345@m.chukyo-u.ac.jp" })
        );
    }

    #[test]
    fn test_parse_frame_data() {
        assert_eq!(parse_frame_data(&json!("!_{\"h\":\"x\"}")), None);
        assert_eq!(parse_frame_data(&json!("not json")), None);
        assert_eq!(parse_frame_data(&json!("{\"a\":1}")), Some(json!({ "a": 1 })));
        assert_eq!(parse_frame_data(&json!({ "a": 1 })), Some(json!({ "a": 1 })));
    }

    #[test]
    fn test_broker_error_keeps_code() {
        let reply = SurfaceReply::Payload {
            data: json!({
                "name": "FirebaseError",
                "code": INVALID_DOMAIN_CODE,
                "message": "use your chukyo-u.ac.jp address"
            }),
        };
        match interpret_reply(reply) {
            Err(AuthError::Federated(err)) => assert_eq!(err.code, INVALID_DOMAIN_CODE),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_shapes_become_unexpected() {
        for data in [json!({ "error": "Iframe not available" }), json!([1, 2]), json!("x")] {
            match interpret_reply(SurfaceReply::Payload { data }) {
                Err(AuthError::Federated(err)) => assert_eq!(err.code, UNEXPECTED_CODE),
                other => panic!("unexpected result: {:?}", other),
            }
        }
    }

    #[test]
    fn test_surface_timeout_is_timeout() {
        assert!(matches!(
            interpret_reply(SurfaceReply::TimedOut),
            Err(AuthError::Timeout)
        ));
    }
}
