//! Token bundle returned by the identity broker.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FederatedAuthResult {
    pub user: FederatedUser,
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(rename = "_tokenResponse")]
    pub token_response: TokenResponse,
    pub operation_type: OperationType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationType {
    SignIn,
    SignUp,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FederatedUser {
    pub uid: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default, rename = "photoURL")]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub provider_data: Vec<ProviderData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderData {
    pub provider_id: String,
    pub uid: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub id_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub local_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// Lifetime of the id token in seconds, as a decimal string.
    #[serde(default)]
    pub expires_in: Option<String>,
    /// Raw Google profile, a JSON document encoded as a string.
    #[serde(default)]
    pub raw_user_info: Option<String>,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("id_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("local_id", &self.local_id)
            .field("email", &self.email)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// The subset of a sign-in result that API callers need.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedUser {
    pub uid: String,
    pub email: String,
    pub display_name: String,
    #[serde(rename = "photoURL")]
    pub photo_url: String,
    pub id_token: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for AuthenticatedUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticatedUser")
            .field("uid", &self.uid)
            .field("email", &self.email)
            .field("display_name", &self.display_name)
            .finish_non_exhaustive()
    }
}

impl FederatedAuthResult {
    pub fn authenticated_user(&self) -> AuthenticatedUser {
        AuthenticatedUser {
            uid: self.user.uid.clone(),
            email: self.user.email.clone().unwrap_or_default(),
            display_name: self.user.display_name.clone().unwrap_or_default(),
            photo_url: self.user.photo_url.clone().unwrap_or_default(),
            id_token: self.token_response.id_token.clone(),
            refresh_token: self.token_response.refresh_token.clone(),
        }
    }
}

/// Claims carried by the broker's id token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdTokenPayload {
    pub sub: String,
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub aud: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: Option<bool>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("Token is not a JWT")]
    Malformed,

    #[error("Invalid token encoding: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("Invalid token payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Decode the payload segment of a JWT. The signature is not verified.
pub fn decode_id_token(token: &str) -> Result<IdTokenPayload, TokenError> {
    let mut segments = token.split('.');
    let payload = match (segments.next(), segments.next(), segments.next()) {
        (Some(_), Some(payload), Some(_)) => payload,
        _ => return Err(TokenError::Malformed),
    };
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('='))?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// An undecodable token counts as expired.
pub fn is_token_expired(token: &str, now: DateTime<Utc>) -> bool {
    match decode_id_token(token) {
        Ok(payload) => payload.exp < now.timestamp(),
        Err(_) => true,
    }
}

/// Time until expiry, zero when expired or undecodable.
pub fn token_time_remaining(token: &str, now: DateTime<Utc>) -> Duration {
    decode_id_token(token)
        .map(|payload| Duration::seconds((payload.exp - now.timestamp()).max(0)))
        .unwrap_or_else(|_| Duration::zero())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn jwt(claims: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{}.{}.signature", header, payload)
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_decode_id_token() {
        let token = jwt(json!({
            "sub": "uid-1",
            "exp": 1_700_003_600,
            "iat": 1_700_000_000,
            "email": "s12345@m.chukyo-u.ac.jp",
            "email_verified": true
        }));
        let payload = decode_id_token(&token).unwrap();
        assert_eq!(payload.sub, "uid-1");
        assert_eq!(payload.exp, 1_700_003_600);
        assert_eq!(payload.email.as_deref(), Some("s12345@m.chukyo-u.ac.jp"));
    }

    #[test]
    fn test_decode_rejects_non_jwt() {
        assert!(matches!(decode_id_token("abc"), Err(TokenError::Malformed)));
        assert!(matches!(
            decode_id_token("a.!!!.c"),
            Err(TokenError::Encoding(_))
        ));
    }

    #[test]
    fn test_token_expiry() {
        let token = jwt(json!({ "sub": "uid-1", "exp": 1_000 }));
        assert!(!is_token_expired(&token, at(999)));
        assert!(!is_token_expired(&token, at(1_000)));
        assert!(is_token_expired(&token, at(1_001)));
        assert!(is_token_expired("garbage", at(0)));

        assert_eq!(token_time_remaining(&token, at(400)), Duration::seconds(600));
        assert_eq!(token_time_remaining(&token, at(2_000)), Duration::zero());
    }

    #[test]
    fn test_parse_broker_result_and_extract_user() {
        let raw = json!({
            "user": {
                "uid": "uid-1",
                "email": "s12345@m.chukyo-u.ac.jp",
                "emailVerified": true,
                "displayName": "中京 太郎",
                "photoURL": null,
                "providerData": [{ "providerId": "google.com", "uid": "g-1" }]
            },
            "providerId": "google.com",
            "_tokenResponse": {
                "idToken": "id.token.value",
                "refreshToken": "refresh-value",
                "expiresIn": "3600"
            },
            "operationType": "signIn"
        });

        let result: FederatedAuthResult = serde_json::from_value(raw).unwrap();
        assert_eq!(result.operation_type, OperationType::SignIn);

        let user = result.authenticated_user();
        assert_eq!(user.uid, "uid-1");
        assert_eq!(user.display_name, "中京 太郎");
        assert_eq!(user.photo_url, "");
        assert_eq!(user.id_token, "id.token.value");
        assert!(!format!("{:?}", result).contains("refresh-value"));
    }
}
