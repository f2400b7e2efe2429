//! Wiring of all providers from one [`campus_config::Config`].

use crate::providers::{
    CampusPortalProvider, IdentityApiProvider, LearningPortalProvider, PortalProvider, RetryPolicy,
    StudentInfoProvider,
};
use crate::sso::{HttpSurfaceHost, SsoFlow};
use crate::transport::{build_client, HttpTransport};
use crate::{AuthResult, Credential, ServiceProfile, SessionHolder, SystemClock};
use campus_config::Config;
use reqwest::cookie::Jar;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

/// The SSO-backed services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceKind {
    LearningPortal,
    StudentInfo,
    CampusPortal,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 3] = [
        ServiceKind::LearningPortal,
        ServiceKind::StudentInfo,
        ServiceKind::CampusPortal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::LearningPortal => "learning-portal",
            ServiceKind::StudentInfo => "student-info",
            ServiceKind::CampusPortal => "campus-portal",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "learning-portal" | "manabo" => Ok(ServiceKind::LearningPortal),
            "student-info" | "cubics" => Ok(ServiceKind::StudentInfo),
            "campus-portal" | "albo" => Ok(ServiceKind::CampusPortal),
            other => Err(format!("unknown service: {}", other)),
        }
    }
}

/// One provider per service. Every SSO-backed service gets its own cookie
/// jar, shared by its transport and its hidden surface.
pub struct PortalSuite {
    pub learning: LearningPortalProvider,
    pub student_info: StudentInfoProvider,
    pub campus_portal: CampusPortalProvider,
    pub identity_api: IdentityApiProvider,
}

impl PortalSuite {
    pub fn from_config(config: &Config) -> AuthResult<Self> {
        config.validate()?;
        let retry = RetryPolicy {
            retry_count: config.retry_count,
            base_delay: config.retry_base_delay(),
            jitter: config.retry_jitter(),
        };

        let (session, transport) =
            service_parts(config, LearningPortalProvider::profile(config.learning_portal_url()?))?;
        let learning = LearningPortalProvider::new(session, transport);

        let (session, transport) =
            service_parts(config, StudentInfoProvider::profile(config.student_info_url()?))?;
        let student_info =
            StudentInfoProvider::new(session, transport).with_retry_policy(retry.clone());

        let (session, transport) =
            service_parts(config, CampusPortalProvider::profile(config.campus_portal_url()?))?;
        let campus_portal = CampusPortalProvider::new(session, transport).with_retry_policy(retry);

        let api_client = build_client(Arc::new(Jar::default()))?;
        let identity_api = IdentityApiProvider::new(
            config.identity_api_url()?,
            Arc::new(HttpTransport::from_client(api_client).with_default_timeout(config.request_timeout())),
        );

        info!("portal suite ready");
        Ok(Self {
            learning,
            student_info,
            campus_portal,
            identity_api,
        })
    }

    pub fn provider(&self, kind: ServiceKind) -> &dyn PortalProvider {
        match kind {
            ServiceKind::LearningPortal => &self.learning,
            ServiceKind::StudentInfo => &self.student_info,
            ServiceKind::CampusPortal => &self.campus_portal,
        }
    }

    /// Store `credential` on every SSO-backed service.
    pub fn set_credential(&self, credential: Option<Credential>) {
        for kind in ServiceKind::ALL {
            self.provider(kind).set_credential(credential.clone());
        }
    }

    pub fn clear_auth_state(&self) {
        for kind in ServiceKind::ALL {
            self.provider(kind).clear_auth_state();
        }
    }
}

fn service_parts(
    config: &Config,
    profile: ServiceProfile,
) -> AuthResult<(SessionHolder, Arc<HttpTransport>)> {
    let client = build_client(Arc::new(Jar::default()))?;
    let transport = HttpTransport::from_client(client.clone()).with_default_timeout(config.request_timeout());
    let flow = SsoFlow::new(Arc::new(HttpSurfaceHost::from_client(client))).with_timeout(config.sso_timeout());
    let session = SessionHolder::new(profile, Arc::new(flow), Arc::new(SystemClock))
        .with_validity_window(config.session_validity());
    Ok((session, Arc::new(transport)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AuthError;

    #[test]
    fn test_from_config_uses_configured_urls() {
        let mut config = Config::new();
        config.student_info_url = "https://cubics.example".to_string();
        let suite = PortalSuite::from_config(&config).unwrap();

        assert_eq!(
            suite.student_info.session().profile().base_url.as_str(),
            "https://cubics.example/"
        );
        assert_eq!(suite.learning.session().profile().name, "manabo");
        assert_eq!(suite.provider(ServiceKind::CampusPortal).session().profile().name, "albo");
    }

    #[test]
    fn test_set_credential_reaches_every_service() {
        let suite = PortalSuite::from_config(&Config::new()).unwrap();
        suite.set_credential(Some(Credential::new("s12345", "pw")));
        for kind in ServiceKind::ALL {
            assert!(suite.provider(kind).session().has_credential(), "{}", kind);
        }
        suite.set_credential(None);
        assert!(!suite.learning.session().has_credential());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = Config::new();
        config.campus_portal_url = "not a url".to_string();
        assert!(matches!(
            PortalSuite::from_config(&config),
            Err(AuthError::InvalidUrl(_))
        ));

        let mut config = Config::new();
        config.sso_timeout_secs = 0;
        assert!(matches!(
            PortalSuite::from_config(&config),
            Err(AuthError::Config(_))
        ));
    }

    #[test]
    fn test_service_kind_parses_aliases() {
        assert_eq!("cubics".parse::<ServiceKind>().unwrap(), ServiceKind::StudentInfo);
        assert_eq!("learning-portal".parse::<ServiceKind>().unwrap(), ServiceKind::LearningPortal);
        assert!("moodle".parse::<ServiceKind>().is_err());
    }
}
