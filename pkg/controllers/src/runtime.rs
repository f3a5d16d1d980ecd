use async_trait::async_trait;
use pkg_constants::controller::{CONFLICT_REQUEUE_MILLIS, DRAIN_TIMEOUT_SECS};
use pkg_state::{EventHandler, ObjectStore, Reflector, WatchEvent};
use pkg_types::{ObjectKey, Resource};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ReconcileError;
use crate::queue::WorkQueue;

/// What a successful reconcile asks of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    Done,
    After(Duration),
}

/// Drives one object kind toward its desired state, one key at a time.
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    type Object: Resource;

    fn name(&self) -> &'static str;

    /// `attempt` counts consecutive failed reconciles of `key`.
    async fn reconcile(&self, key: &ObjectKey, attempt: u32) -> Result<Requeue, ReconcileError>;
}

/// Reflector plus a fixed worker pool draining a keyed, rate-limited queue.
pub struct Controller<R: Reconciler> {
    store: ObjectStore,
    reconciler: Arc<R>,
    workers: usize,
    queue: WorkQueue<ObjectKey>,
}

impl<R: Reconciler> Controller<R> {
    pub fn new(store: ObjectStore, reconciler: Arc<R>, workers: usize) -> Self {
        Self {
            store,
            reconciler,
            workers: workers.max(1),
            queue: WorkQueue::new(),
        }
    }

    /// Handle to the controller's queue, for extra event sources.
    pub fn queue(&self) -> WorkQueue<ObjectKey> {
        self.queue.clone()
    }

    pub fn start(self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    async fn run(self, cancel: CancellationToken) {
        let name = self.reconciler.name();
        info!("{} started (workers={})", name, self.workers);

        let queue = self.queue.clone();
        let handler: Arc<dyn EventHandler<R::Object>> =
            Arc::new(move |event: &WatchEvent<R::Object>| queue.add(event.object.key()));
        let reflector = Reflector::<R::Object>::new(self.store.clone()).spawn(handler, cancel.clone());

        let mut workers = JoinSet::new();
        for _ in 0..self.workers {
            workers.spawn(worker(self.queue.clone(), self.reconciler.clone()));
        }

        cancel.cancelled().await;
        self.queue.shut_down();
        let drained = tokio::time::timeout(Duration::from_secs(DRAIN_TIMEOUT_SECS), async {
            while workers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("{} did not drain in time; aborting workers", name);
            workers.abort_all();
        }
        let _ = reflector.await;
        info!("{} stopped", name);
    }
}

async fn worker<R: Reconciler>(queue: WorkQueue<ObjectKey>, reconciler: Arc<R>) {
    let name = reconciler.name();
    while let Some(key) = queue.get().await {
        let attempt = queue.num_requeues(&key);
        // A panicking reconcile must not take the worker or the key down with it.
        let run = {
            let reconciler = reconciler.clone();
            let key = key.clone();
            tokio::spawn(async move { reconciler.reconcile(&key, attempt).await })
        };
        let result = match run.await {
            Ok(result) => result,
            Err(e) => {
                warn!("{} reconcile of {} aborted: {}", name, key, e);
                queue.add_rate_limited(key.clone());
                queue.done(&key);
                continue;
            }
        };
        match result {
            Ok(Requeue::Done) => queue.forget(&key),
            Ok(Requeue::After(delay)) => {
                queue.forget(&key);
                queue.add_after(key.clone(), delay);
            }
            Err(e) if e.is_conflict() => {
                debug!("{} conflict on {}: {}", name, key, e);
                queue.add_rate_limited_after(key.clone(), Duration::from_millis(CONFLICT_REQUEUE_MILLIS));
            }
            Err(e) if e.is_retryable() => {
                warn!("{} reconcile error for {} (attempt {}): {}", name, key, attempt + 1, e);
                queue.add_rate_limited(key.clone());
            }
            Err(e) => {
                warn!("{} dropping {}: {}", name, key, e);
                queue.forget(&key);
            }
        }
        queue.done(&key);
    }
}
