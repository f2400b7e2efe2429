//! Protocol-level hidden surface.
//!
//! [`HttpSurfaceHost`] replaces a hidden browser tab with an HTTP client that
//! walks the SSO handshake itself: it follows redirects, fills the login form
//! it discovers on the identity provider page, and posts SAML responses back
//! the way a browser would by script. Every loaded page is reported as
//! [`SurfaceEvent::NavigationCompleted`], so the flow observes the same event
//! sequence it would see from a browser.

use super::form;
use super::surface::{
    HiddenSurface, SurfaceEvent, SurfaceHandle, SurfaceHost, FORM_REJECTED_SIGNAL,
    UNAUTHORIZED_SIGNAL,
};
use crate::{AuthResult, Credential};
use async_trait::async_trait;
use reqwest::header::ACCEPT_LANGUAGE;
use reqwest::Client;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

/// Upper bound on page loads for one handshake.
pub const DEFAULT_MAX_HOPS: usize = 12;

const EVENT_BUFFER: usize = 32;

/// Opens [`HttpSurface`]s that share one HTTP client (and so one cookie jar).
#[derive(Debug, Clone)]
pub struct HttpSurfaceHost {
    client: Client,
    max_hops: usize,
}

impl HttpSurfaceHost {
    /// Use the same client as the service's transport so the session cookies
    /// established here are sent with later requests.
    pub fn from_client(client: Client) -> Self {
        Self {
            client,
            max_hops: DEFAULT_MAX_HOPS,
        }
    }

    pub fn with_max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = max_hops;
        self
    }
}

#[async_trait]
impl SurfaceHost for HttpSurfaceHost {
    async fn open(&self, enter: &Url, credential: Credential) -> AuthResult<SurfaceHandle> {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        let agent = Agent {
            client: self.client.clone(),
            events: tx,
            credential: Some(credential),
            max_hops: self.max_hops,
            surface_id: id.clone(),
        };
        let task = tokio::spawn(agent.run(enter.clone()));

        debug!(surface_id = %id, enter = %enter, "opened headless surface");

        Ok(SurfaceHandle {
            surface: Box::new(HttpSurface {
                id,
                task: Some(task),
            }),
            events: rx,
        })
    }
}

/// A running headless handshake.
pub struct HttpSurface {
    id: String,
    task: Option<JoinHandle<()>>,
}

impl HiddenSurface for HttpSurface {
    fn id(&self) -> &str {
        &self.id
    }

    fn close(&mut self) {
        if let Some(task) = self.task.take() {
            // Aborting drops the agent, and with it any unused credential.
            task.abort();
            debug!(surface_id = %self.id, "closed headless surface");
        }
    }
}

impl Drop for HttpSurface {
    fn drop(&mut self) {
        self.close();
    }
}

enum Navigation {
    Get(Url),
    Post { url: Url, fields: Vec<(String, String)> },
}

impl Navigation {
    fn url(&self) -> &Url {
        match self {
            Navigation::Get(url) => url,
            Navigation::Post { url, .. } => url,
        }
    }
}

struct Page {
    url: Url,
    body: String,
}

/// Stand-in for the in-page automation agent.
struct Agent {
    client: Client,
    events: mpsc::Sender<SurfaceEvent>,
    credential: Option<Credential>,
    max_hops: usize,
    surface_id: String,
}

impl Agent {
    async fn run(mut self, enter: Url) {
        let mut next = Navigation::Get(enter);
        let mut submitted_login = false;

        for hop in 0..self.max_hops {
            let page = match self.load(&next).await {
                Ok(page) => page,
                Err(reason) => {
                    warn!(surface_id = %self.surface_id, hop, %reason, "navigation failed");
                    self.emit(SurfaceEvent::NavigationFailed {
                        url: Some(next.url().clone()),
                        reason,
                    })
                    .await;
                    return;
                }
            };

            if !self
                .emit(SurfaceEvent::NavigationCompleted {
                    url: page.url.clone(),
                })
                .await
            {
                return;
            }

            if let Some(login) = form::find_login_form(&page.body) {
                if submitted_login {
                    let signal = if form::has_error_indicator(&page.body) {
                        UNAUTHORIZED_SIGNAL
                    } else {
                        FORM_REJECTED_SIGNAL
                    };
                    info!(surface_id = %self.surface_id, signal, "login form came back after submit");
                    self.emit(SurfaceEvent::AgentSignal {
                        error: signal.to_string(),
                    })
                    .await;
                    return;
                }

                let Some(credential) = self.credential.take() else {
                    return;
                };
                let url = match login.resolve_action(&page.url) {
                    Ok(url) => url,
                    Err(err) => {
                        self.fail(&page.url, format!("bad login form action: {}", err)).await;
                        return;
                    }
                };
                debug!(surface_id = %self.surface_id, action = %url, "submitting login form");
                let fields = login.fill(&credential);
                next = if login.is_post() {
                    Navigation::Post { url, fields }
                } else {
                    Navigation::Get(with_query(url, &fields))
                };
                submitted_login = true;
                continue;
            }

            if let Some(post_back) = form::find_post_back_form(&page.body) {
                let url = match post_back.resolve_action(&page.url) {
                    Ok(url) => url,
                    Err(err) => {
                        self.fail(&page.url, format!("bad post-back action: {}", err)).await;
                        return;
                    }
                };
                debug!(surface_id = %self.surface_id, action = %url, "posting back hidden form");
                next = Navigation::Post {
                    url,
                    fields: post_back.post_back_fields(),
                };
                continue;
            }

            // Nothing left to drive on this page.
            debug!(surface_id = %self.surface_id, url = %page.url, "agent idle");
            return;
        }

        warn!(surface_id = %self.surface_id, max_hops = self.max_hops, "hop limit reached");
        self.emit(SurfaceEvent::NavigationFailed {
            url: Some(next.url().clone()),
            reason: format!("more than {} page loads", self.max_hops),
        })
        .await;
    }

    async fn load(&self, navigation: &Navigation) -> Result<Page, String> {
        let request = match navigation {
            Navigation::Get(url) => self.client.get(url.clone()),
            Navigation::Post { url, fields } => self.client.post(url.clone()).form(fields),
        };
        let response = request
            .header(ACCEPT_LANGUAGE, "ja")
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let url = response.url().clone();
        let body = response.text().await.map_err(|e| e.to_string())?;
        Ok(Page { url, body })
    }

    async fn fail(&self, url: &Url, reason: String) {
        self.emit(SurfaceEvent::NavigationFailed {
            url: Some(url.clone()),
            reason,
        })
        .await;
    }

    /// Returns false once nobody is listening.
    async fn emit(&self, event: SurfaceEvent) -> bool {
        self.events.send(event).await.is_ok()
    }
}

fn with_query(mut url: Url, fields: &[(String, String)]) -> Url {
    url.query_pairs_mut()
        .clear()
        .extend_pairs(fields.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    url
}
