//! Learning portal (manabo).

use super::{portal_options, PortalProvider};
use crate::transport::{RequestOptions, Transport};
use crate::{AuthResult, Credential, ServiceProfile, SessionHolder};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use url::Url;

pub const SERVICE_NAME: &str = "manabo";
const ENTER_PATH: &str = "/auth/shibboleth/";
const GOAL_PATH: &str = "/auth/shibboleth/";

/// Single-shot provider for the learning portal.
///
/// Requests are made once after ensuring the session; the response is not
/// inspected for a missing session.
pub struct LearningPortalProvider {
    session: SessionHolder,
    transport: Arc<dyn Transport>,
}

impl LearningPortalProvider {
    pub fn profile(base_url: Url) -> ServiceProfile {
        ServiceProfile::new(SERVICE_NAME, base_url, ENTER_PATH, GOAL_PATH)
    }

    pub fn new(session: SessionHolder, transport: Arc<dyn Transport>) -> Self {
        Self { session, transport }
    }

    /// POST `body` to `path` with the given content type.
    pub async fn post(&self, path: &str, content_type: &str, body: &str) -> AuthResult<String> {
        self.session.ensure_authenticated().await?;
        let target = self.session.profile().url_for(path)?;
        debug!(service = SERVICE_NAME, path, "POST");
        let options = portal_options(RequestOptions::post(body)).with_header("Content-Type", content_type);
        Ok(self.transport.send(&target, options).await?.body)
    }
}

#[async_trait]
impl PortalProvider for LearningPortalProvider {
    async fn get(&self, path: &str) -> AuthResult<String> {
        self.session.ensure_authenticated().await?;
        let target = self.session.profile().url_for(path)?;
        debug!(service = SERVICE_NAME, path, "GET");
        Ok(self
            .transport
            .send(&target, portal_options(RequestOptions::get()))
            .await?
            .body)
    }

    async fn auth_test(&self, credential: &Credential) -> AuthResult<bool> {
        self.session.force_authenticate(credential).await?;
        Ok(true)
    }

    fn session(&self) -> &SessionHolder {
        &self.session
    }
}
