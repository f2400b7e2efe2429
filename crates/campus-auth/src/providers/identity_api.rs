//! PassPal identity API.

use crate::transport::{join_path, ClientMode, RequestOptions, Transport};
use crate::AuthResult;
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Thin client for the identity API. No SSO session is involved; calls are
/// authorized with a bearer token when one is given.
pub struct IdentityApiProvider {
    base_url: Url,
    transport: Arc<dyn Transport>,
}

impl IdentityApiProvider {
    pub fn new(base_url: Url, transport: Arc<dyn Transport>) -> Self {
        Self {
            base_url,
            transport,
        }
    }

    pub async fn get(&self, path: &str) -> AuthResult<String> {
        let target = join_path(&self.base_url, path)?;
        debug!(path, "identity API GET");
        let options = RequestOptions::get().with_mode(ClientMode::IdentityApi);
        Ok(self.transport.send(&target, options).await?.body)
    }

    pub async fn post(
        &self,
        path: &str,
        body: Option<String>,
        content_type: Option<&str>,
        bearer: Option<&str>,
    ) -> AuthResult<String> {
        let target = join_path(&self.base_url, path)?;
        debug!(path, "identity API POST");
        let mut options = RequestOptions {
            method: reqwest::Method::POST,
            body,
            ..RequestOptions::default()
        }
        .with_mode(ClientMode::IdentityApi);
        if let Some(bearer) = bearer {
            options = options.with_header("Authorization", format!("Bearer {}", bearer));
        }
        if let Some(content_type) = content_type {
            options = options.with_header("Content-Type", content_type);
        }
        Ok(self.transport.send(&target, options).await?.body)
    }
}
