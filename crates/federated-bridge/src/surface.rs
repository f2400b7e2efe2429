//! The bridge surface: a task hosting the identity frame.
//!
//! The orchestrator talks to it only through channels. Each sign-in request
//! carries an id; the surface answers with a [`BridgeResponse`] carrying the
//! same id, and a dispatcher routes it to the waiting caller.
//!
//! ```text
//! request(id) ──► commands ──► SurfaceContext ──► listener task ──► responses ──► dispatcher ──► pending[id]
//! ```

use crate::frame::IdentityFrame;
use crate::protocol::{
    parse_frame_data, BridgeRequest, BridgeResponse, InitMessage, SurfaceReply,
};
use crate::{BridgeError, BridgeResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

pub const DEFAULT_FRAME_LOAD_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SURFACE_RESPONSE_TIMEOUT: Duration = Duration::from_secs(300);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceOptions {
    /// After this long the frame is treated as loaded even without a load signal.
    pub load_timeout: Duration,
    /// How long one request waits for the broker before answering `TimedOut`.
    pub response_timeout: Duration,
}

impl Default for SurfaceOptions {
    fn default() -> Self {
        Self {
            load_timeout: DEFAULT_FRAME_LOAD_TIMEOUT,
            response_timeout: DEFAULT_SURFACE_RESPONSE_TIMEOUT,
        }
    }
}

enum SurfaceCommand {
    SignIn(BridgeRequest),
    Shutdown,
}

type PendingReplies = Arc<Mutex<HashMap<u64, oneshot::Sender<SurfaceReply>>>>;

/// Handle to a running bridge surface.
pub struct BridgeSurface {
    id: String,
    commands: mpsc::Sender<SurfaceCommand>,
    pending: PendingReplies,
    next_id: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BridgeSurface {
    pub fn spawn(frame: Arc<dyn IdentityFrame>, options: SurfaceOptions) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let (commands, command_rx) = mpsc::channel(8);
        let (responses, response_rx) = mpsc::channel(8);
        let pending: PendingReplies = Arc::new(Mutex::new(HashMap::new()));

        let context = SurfaceContext {
            id: id.clone(),
            frame,
            options,
            responses,
        };
        let context_task = tokio::spawn(context.run(command_rx));
        let dispatcher = tokio::spawn(dispatch(response_rx, pending.clone()));
        info!(surface = %id, "bridge surface created");

        Self {
            id,
            commands,
            pending,
            next_id: AtomicU64::new(1),
            tasks: Mutex::new(vec![context_task, dispatcher]),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_alive(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Send a sign-in request and wait for its correlated reply.
    pub async fn request(&self, login_hint: &str, timeout: Duration) -> BridgeResult<SurfaceReply> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let request = BridgeRequest {
            id,
            login_hint: login_hint.to_string(),
        };
        if self.commands.send(SurfaceCommand::SignIn(request)).await.is_err() {
            self.pending.lock().remove(&id);
            return Err(BridgeError::SurfaceClosed);
        }
        debug!(surface = %self.id, request = id, "sign-in request sent");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(BridgeError::SurfaceClosed),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(BridgeError::Timeout(format!(
                    "no reply to request {} within {:?}",
                    id, timeout
                )))
            }
        }
    }

    /// Close the frame and stop the surface's tasks.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(SurfaceCommand::Shutdown).await;
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for mut task in tasks {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                warn!(surface = %self.id, "bridge surface task did not stop, aborting");
                task.abort();
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

impl Drop for BridgeSurface {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

async fn dispatch(mut responses: mpsc::Receiver<BridgeResponse>, pending: PendingReplies) {
    while let Some(response) = responses.recv().await {
        match pending.lock().remove(&response.id) {
            Some(tx) => {
                let _ = tx.send(response.reply);
            }
            None => debug!(request = response.id, "dropping reply nobody is waiting for"),
        }
    }
    // Wakes any remaining callers with `SurfaceClosed`.
    pending.lock().clear();
}

struct SurfaceContext {
    id: String,
    frame: Arc<dyn IdentityFrame>,
    options: SurfaceOptions,
    responses: mpsc::Sender<BridgeResponse>,
}

impl SurfaceContext {
    async fn run(self, mut commands: mpsc::Receiver<SurfaceCommand>) {
        let mut queued = Vec::new();
        {
            let ready = self.wait_until_ready();
            tokio::pin!(ready);
            loop {
                tokio::select! {
                    _ = &mut ready => break,
                    command = commands.recv() => match command {
                        Some(SurfaceCommand::SignIn(request)) => queued.push(request),
                        Some(SurfaceCommand::Shutdown) | None => {
                            self.frame.close().await;
                            return;
                        }
                    },
                }
            }
        }

        let mut listeners = JoinSet::new();
        for request in queued {
            listeners.spawn(self.listen(request));
        }
        while let Some(command) = commands.recv().await {
            match command {
                SurfaceCommand::SignIn(request) => {
                    listeners.spawn(self.listen(request));
                }
                SurfaceCommand::Shutdown => break,
            }
            while listeners.try_join_next().is_some() {}
        }

        listeners.abort_all();
        self.frame.close().await;
        info!(surface = %self.id, "bridge surface closed");
    }

    async fn wait_until_ready(&self) {
        match tokio::time::timeout(self.options.load_timeout, self.frame.load()).await {
            Ok(Ok(())) => debug!(surface = %self.id, "identity frame loaded"),
            Ok(Err(e)) => warn!(surface = %self.id, error = %e, "identity frame failed to load, continuing"),
            Err(_) => info!(surface = %self.id, "identity frame load timed out, assuming ready"),
        }
    }

    fn listen(&self, request: BridgeRequest) -> impl std::future::Future<Output = ()> + Send + 'static {
        let frame = self.frame.clone();
        let responses = self.responses.clone();
        let timeout = self.options.response_timeout;
        async move {
            let reply = await_broker_reply(frame.as_ref(), &request.login_hint, timeout).await;
            let _ = responses
                .send(BridgeResponse {
                    id: request.id,
                    reply,
                })
                .await;
        }
    }
}

/// Post the init message and wait for the first qualifying broker message.
async fn await_broker_reply(
    frame: &dyn IdentityFrame,
    login_hint: &str,
    timeout: Duration,
) -> SurfaceReply {
    let origin = frame.origin();
    let mut messages = frame.subscribe();
    if let Err(e) = frame.post_message(&InitMessage::new(login_hint), &origin).await {
        return SurfaceReply::FrameUnavailable {
            reason: e.to_string(),
        };
    }

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => {
                warn!("identity frame did not answer in time");
                return SurfaceReply::TimedOut;
            }
            received = messages.recv() => match received {
                Ok(message) if message.origin != origin => {
                    debug!(origin = %message.origin, "ignoring message from foreign origin");
                }
                Ok(message) => {
                    if let Some(data) = parse_frame_data(&message.data) {
                        return SurfaceReply::Payload { data };
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "identity frame listener lagged");
                }
                Err(RecvError::Closed) => {
                    return SurfaceReply::FrameUnavailable {
                        reason: "identity frame closed".to_string(),
                    };
                }
            },
        }
    }
}
