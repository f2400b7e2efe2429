//! Single-instance lifecycle of the bridge surface.

use crate::frame::IdentityFrame;
use crate::surface::{BridgeSurface, SurfaceOptions};
use crate::BridgeResult;
use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

/// Creates bridge surfaces.
#[async_trait]
pub trait BridgeHost: Send + Sync {
    async fn create(&self) -> BridgeResult<BridgeSurface>;
}

pub type FrameFactory = Arc<dyn Fn() -> BridgeResult<Arc<dyn IdentityFrame>> + Send + Sync>;

/// Host that spawns a [`BridgeSurface`] around a freshly built frame.
pub struct FrameBridgeHost {
    factory: FrameFactory,
    options: SurfaceOptions,
}

impl FrameBridgeHost {
    pub fn new(factory: FrameFactory, options: SurfaceOptions) -> Self {
        Self { factory, options }
    }
}

#[async_trait]
impl BridgeHost for FrameBridgeHost {
    async fn create(&self) -> BridgeResult<BridgeSurface> {
        let frame = (self.factory)()?;
        Ok(BridgeSurface::spawn(frame, self.options))
    }
}

type Creation = Shared<BoxFuture<'static, BridgeResult<Arc<BridgeSurface>>>>;

enum SurfaceSlot {
    Empty,
    Creating(Creation),
    Ready(Arc<BridgeSurface>),
}

/// Owns at most one bridge surface.
///
/// Concurrent [`ensure_exists`](Self::ensure_exists) calls made while a
/// creation is in flight await that same creation.
pub struct SurfaceManager {
    host: Arc<dyn BridgeHost>,
    slot: Mutex<SurfaceSlot>,
}

impl SurfaceManager {
    pub fn new(host: Arc<dyn BridgeHost>) -> Self {
        Self {
            host,
            slot: Mutex::new(SurfaceSlot::Empty),
        }
    }

    pub async fn ensure_exists(&self) -> BridgeResult<Arc<BridgeSurface>> {
        let creation = {
            let mut slot = self.slot.lock();
            match &*slot {
                SurfaceSlot::Ready(surface) if surface.is_alive() => return Ok(surface.clone()),
                SurfaceSlot::Creating(creation) => {
                    debug!("bridge surface creation in flight, waiting");
                    creation.clone()
                }
                _ => {
                    let host = self.host.clone();
                    let creation = async move { host.create().await.map(Arc::new) }
                        .boxed()
                        .shared();
                    *slot = SurfaceSlot::Creating(creation.clone());
                    creation
                }
            }
        };

        let result = creation.await;

        let mut slot = self.slot.lock();
        if let SurfaceSlot::Creating(_) = &*slot {
            *slot = match &result {
                Ok(surface) => SurfaceSlot::Ready(surface.clone()),
                Err(_) => SurfaceSlot::Empty,
            };
        }
        result
    }

    /// Close the current surface, if any.
    pub async fn teardown(&self) {
        self.detach().await;
    }

    /// Empty the slot now and return the future that closes whatever it held.
    ///
    /// The returned future owns the surface, so it can be spawned from a
    /// context that cannot await.
    pub fn detach(&self) -> BoxFuture<'static, ()> {
        let previous = std::mem::replace(&mut *self.slot.lock(), SurfaceSlot::Empty);
        async move {
            match previous {
                SurfaceSlot::Ready(surface) => {
                    info!(surface = %surface.id(), "tearing down bridge surface");
                    surface.shutdown().await;
                }
                SurfaceSlot::Creating(creation) => {
                    if let Ok(surface) = creation.await {
                        info!(surface = %surface.id(), "tearing down bridge surface");
                        surface.shutdown().await;
                    }
                }
                SurfaceSlot::Empty => {}
            }
        }
        .boxed()
    }

    pub fn has_surface(&self) -> bool {
        matches!(&*self.slot.lock(), SurfaceSlot::Ready(_) | SurfaceSlot::Creating(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BridgeError;
    use crate::frame::test_support::{FakeFrame, LoadBehavior};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingHost {
        creates: AtomicUsize,
        frames: Mutex<Vec<Arc<FakeFrame>>>,
        fail_first: bool,
    }

    #[async_trait]
    impl BridgeHost for CountingHost {
        async fn create(&self) -> BridgeResult<BridgeSurface> {
            let n = self.creates.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            if self.fail_first && n == 0 {
                return Err(BridgeError::Creation("document quota".into()));
            }
            let (frame, _) = FakeFrame::new(LoadBehavior::Immediate);
            let frame = Arc::new(frame);
            self.frames.lock().push(frame.clone());
            Ok(BridgeSurface::spawn(frame, SurfaceOptions::default()))
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_creation() {
        let host = Arc::new(CountingHost::default());
        let manager = SurfaceManager::new(host.clone());

        let (a, b) = tokio::join!(manager.ensure_exists(), manager.ensure_exists());
        let (a, b) = (a.unwrap(), b.unwrap());

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(host.creates.load(Ordering::SeqCst), 1);

        let c = manager.ensure_exists().await.unwrap();
        assert!(Arc::ptr_eq(&a, &c));
        assert_eq!(host.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_teardown_closes_and_allows_recreation() {
        let host = Arc::new(CountingHost::default());
        let manager = SurfaceManager::new(host.clone());

        manager.ensure_exists().await.unwrap();
        manager.teardown().await;
        assert!(!manager.has_surface());
        assert_eq!(host.frames.lock()[0].close_count(), 1);

        manager.ensure_exists().await.unwrap();
        assert_eq!(host.creates.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_creation_leaves_slot_empty() {
        let host = Arc::new(CountingHost {
            fail_first: true,
            ..CountingHost::default()
        });
        let manager = SurfaceManager::new(host.clone());

        let (a, b) = tokio::join!(manager.ensure_exists(), manager.ensure_exists());
        assert!(matches!(a, Err(BridgeError::Creation(_))));
        assert!(matches!(b, Err(BridgeError::Creation(_))));
        assert!(!manager.has_surface());

        manager.ensure_exists().await.unwrap();
        assert_eq!(host.creates.load(Ordering::SeqCst), 2);
    }
}
