//! SSO credential held in memory by a session holder.

use std::fmt;

/// Username/password pair for the university identity provider.
///
/// Never persisted; `Debug` output hides the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    identifier: String,
    secret: String,
}

impl Credential {
    pub fn new(identifier: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            secret: secret.into(),
        }
    }

    /// Student id used as the SSO username.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("identifier", &self.identifier)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_hides_secret() {
        let credential = Credential::new("s12345", "correct horse");
        let rendered = format!("{:?}", credential);
        assert!(rendered.contains("s12345"));
        assert!(!rendered.contains("correct horse"));
    }
}
