//! The cross-origin identity frame hosted by the bridge surface.

use crate::protocol::{FrameMessage, InitMessage};
use crate::BridgeResult;
use async_trait::async_trait;
use tokio::sync::broadcast;

/// A frame pointed at the identity broker.
///
/// Messages are delivered to every subscriber that exists when they arrive,
/// like a window `message` listener.
#[async_trait]
pub trait IdentityFrame: Send + Sync {
    /// Origin of the broker page, in ASCII serialization.
    fn origin(&self) -> String;

    /// Resolves once the broker page has loaded.
    async fn load(&self) -> BridgeResult<()>;

    async fn post_message(&self, message: &InitMessage, target_origin: &str) -> BridgeResult<()>;

    fn subscribe(&self) -> broadcast::Receiver<FrameMessage>;

    async fn close(&self);
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::BridgeError;
    use parking_lot::Mutex;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    pub const BROKER_ORIGIN: &str = "https://broker.example";

    #[derive(Clone, Copy)]
    pub enum LoadBehavior {
        Immediate,
        Never,
        Fail,
    }

    /// Frame driven by the test. Every posted init message is forwarded to
    /// `posted`, so a test knows when the surface is listening. With
    /// `auto_reply` set, every init is answered from the broker origin.
    pub struct FakeFrame {
        pub load_behavior: LoadBehavior,
        pub messages: broadcast::Sender<FrameMessage>,
        pub posted: mpsc::UnboundedSender<InitMessage>,
        pub closes: AtomicUsize,
        pub reject_posts: bool,
        pub auto_reply: Mutex<Option<Value>>,
    }

    impl FakeFrame {
        pub fn new(load_behavior: LoadBehavior) -> (Self, mpsc::UnboundedReceiver<InitMessage>) {
            let (posted, posted_rx) = mpsc::unbounded_channel();
            let (messages, _) = broadcast::channel(16);
            let frame = Self {
                load_behavior,
                messages,
                posted,
                closes: AtomicUsize::new(0),
                reject_posts: false,
                auto_reply: Mutex::new(None),
            };
            (frame, posted_rx)
        }

        pub fn emit(&self, origin: &str, data: Value) {
            let _ = self.messages.send(FrameMessage {
                origin: origin.to_string(),
                data,
            });
        }

        pub fn close_count(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl IdentityFrame for FakeFrame {
        fn origin(&self) -> String {
            BROKER_ORIGIN.to_string()
        }

        async fn load(&self) -> BridgeResult<()> {
            match self.load_behavior {
                LoadBehavior::Immediate => Ok(()),
                LoadBehavior::Never => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                }
                LoadBehavior::Fail => Err(BridgeError::FrameUnavailable("load failed".into())),
            }
        }

        async fn post_message(&self, message: &InitMessage, _target_origin: &str) -> BridgeResult<()> {
            if self.reject_posts {
                return Err(BridgeError::FrameUnavailable("frame detached".into()));
            }
            let _ = self.posted.send(message.clone());
            let reply = self.auto_reply.lock().clone();
            if let Some(data) = reply {
                self.emit(BROKER_ORIGIN, data);
            }
            Ok(())
        }

        fn subscribe(&self) -> broadcast::Receiver<FrameMessage> {
            self.messages.subscribe()
        }

        async fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}
