//! General campus portal (albo).

use super::{portal_options, send_with_session_retry, PortalProvider, RetryPolicy};
use crate::transport::{RequestOptions, Transport};
use crate::{AuthResult, Credential, ServiceProfile, SessionHolder};
use async_trait::async_trait;
use std::sync::Arc;
use url::Url;

pub const SERVICE_NAME: &str = "albo";
const ENTER_PATH: &str = "/uniprove_pt/UnLoginControl";
const GOAL_PATH: &str = "/uniprove_pt/portal";

/// Retrying provider for the campus portal.
pub struct CampusPortalProvider {
    session: SessionHolder,
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
}

impl CampusPortalProvider {
    pub fn profile(base_url: Url) -> ServiceProfile {
        ServiceProfile::new(SERVICE_NAME, base_url, ENTER_PATH, GOAL_PATH)
    }

    pub fn new(session: SessionHolder, transport: Arc<dyn Transport>) -> Self {
        Self {
            session,
            transport,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl PortalProvider for CampusPortalProvider {
    async fn get(&self, path: &str) -> AuthResult<String> {
        let target = self.session.profile().url_for(path)?;
        send_with_session_retry(
            &self.session,
            self.transport.as_ref(),
            &self.retry,
            &target,
            portal_options(RequestOptions::get()),
        )
        .await
    }

    async fn auth_test(&self, credential: &Credential) -> AuthResult<bool> {
        self.session.force_authenticate(credential).await?;
        Ok(true)
    }

    fn session(&self) -> &SessionHolder {
        &self.session
    }
}
