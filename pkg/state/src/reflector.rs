use parking_lot::RwLock;
use pkg_constants::state::{RELIST_BACKOFF_BASE_MILLIS, RELIST_BACKOFF_MAX_SECS};
use pkg_types::{ObjectKey, Resource};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::error::StoreError;
use crate::selector::LabelSelector;
use crate::store::ObjectStore;
use crate::watch::{EventType, WatchEvent};

/// Receives every change a reflector applies, after its cache reflects it.
/// Runs on the reflector's task, so events for one kind arrive one at a time
/// and in store order.
pub trait EventHandler<K>: Send + Sync + 'static {
    fn on_event(&self, event: &WatchEvent<K>);
}

impl<K, F> EventHandler<K> for F
where
    F: Fn(&WatchEvent<K>) + Send + Sync + 'static,
{
    fn on_event(&self, event: &WatchEvent<K>) {
        self(event)
    }
}

/// Read side of a reflector: the last observed state of every object.
#[derive(Clone)]
pub struct Cache<K> {
    items: Arc<RwLock<BTreeMap<ObjectKey, K>>>,
    synced: watch::Receiver<bool>,
}

impl<K: Resource> Cache<K> {
    pub fn get(&self, key: &ObjectKey) -> Option<K> {
        self.items.read().get(key).cloned()
    }

    pub fn list(&self) -> Vec<K> {
        self.items.read().values().cloned().collect()
    }

    pub fn list_namespace(&self, namespace: &str) -> Vec<K> {
        self.items
            .read()
            .values()
            .filter(|o| o.meta().namespace.as_deref() == Some(namespace))
            .cloned()
            .collect()
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.items.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// Whether the first list has been applied.
    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    pub async fn wait_synced(&self) {
        let mut rx = self.synced.clone();
        // A closed channel means the reflector is gone; nothing left to wait for.
        let _ = rx.wait_for(|synced| *synced).await;
    }
}

/// Keeps a [`Cache`] in step with the store by listing, then watching from
/// the list's resourceVersion, and relisting with backoff whenever the watch
/// fails or reports that its resume point expired.
pub struct Reflector<K> {
    store: ObjectStore,
    namespace: Option<String>,
    selector: Option<LabelSelector>,
    items: Arc<RwLock<BTreeMap<ObjectKey, K>>>,
    synced_tx: watch::Sender<bool>,
    synced_rx: watch::Receiver<bool>,
    backoff: Backoff,
}

impl<K: Resource> Reflector<K> {
    pub fn new(store: ObjectStore) -> Self {
        let (synced_tx, synced_rx) = watch::channel(false);
        Self {
            store,
            namespace: None,
            selector: None,
            items: Arc::new(RwLock::new(BTreeMap::new())),
            synced_tx,
            synced_rx,
            backoff: Backoff::new(
                Duration::from_millis(RELIST_BACKOFF_BASE_MILLIS),
                Duration::from_secs(RELIST_BACKOFF_MAX_SECS),
            ),
        }
    }

    pub fn with_selector(mut self, selector: LabelSelector) -> Self {
        self.selector = Some(selector);
        self
    }

    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    pub fn cache(&self) -> Cache<K> {
        Cache {
            items: self.items.clone(),
            synced: self.synced_rx.clone(),
        }
    }

    pub fn spawn(
        self,
        handler: Arc<dyn EventHandler<K>>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run(handler, cancel).await })
    }

    pub async fn run(self, handler: Arc<dyn EventHandler<K>>, cancel: CancellationToken) {
        info!("{} reflector started", K::KIND);
        let mut attempt = 0u32;
        loop {
            let err = match self.list_and_watch(handler.as_ref(), &cancel, &mut attempt).await {
                Ok(()) => break,
                Err(e) => e,
            };
            let delay = self.backoff.delay(attempt);
            attempt = attempt.saturating_add(1);
            match &err {
                StoreError::Expired(_) => {
                    debug!("{} reflector relisting: {}", K::KIND, err)
                }
                _ => warn!(
                    "{} reflector error: {}; relisting in {:?}",
                    K::KIND,
                    err,
                    delay
                ),
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        info!("{} reflector stopped", K::KIND);
    }

    /// Returns `Ok` only on cancellation.
    async fn list_and_watch(
        &self,
        handler: &dyn EventHandler<K>,
        cancel: &CancellationToken,
        attempt: &mut u32,
    ) -> Result<(), StoreError> {
        let (items, rv) = self
            .store
            .list::<K>(self.namespace.as_deref(), self.selector.as_ref())
            .await?;
        self.replace(items, handler);
        *attempt = 0;
        self.synced_tx.send_replace(true);

        let mut stream = self
            .store
            .watch::<K>(self.namespace.as_deref(), self.selector.clone(), rv)
            .await?;
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                next = stream.next() => next,
            };
            match next {
                Some(Ok(event)) => self.apply(event, handler),
                Some(Err(e)) => return Err(e),
                None => return Err(StoreError::Backend("watch stream closed".to_string())),
            }
        }
    }

    fn apply(&self, event: WatchEvent<K>, handler: &dyn EventHandler<K>) {
        let key = event.object.key();
        {
            let mut items = self.items.write();
            match event.event_type {
                EventType::Added | EventType::Modified => {
                    items.insert(key, event.object.clone());
                }
                EventType::Deleted => {
                    items.remove(&key);
                }
            }
        }
        handler.on_event(&event);
    }

    /// Swap in a fresh list, reporting the difference as events so handlers
    /// never miss a change that happened while the watch was down.
    fn replace(&self, fresh: Vec<K>, handler: &dyn EventHandler<K>) {
        let mut events = Vec::new();
        {
            let mut items = self.items.write();
            let mut next: BTreeMap<ObjectKey, K> = BTreeMap::new();
            for obj in fresh {
                let key = obj.key();
                match items.get(&key) {
                    None => events.push(WatchEvent::new(EventType::Added, obj.clone())),
                    Some(old) if old.meta().resource_version != obj.meta().resource_version => {
                        events.push(WatchEvent::new(EventType::Modified, obj.clone()))
                    }
                    Some(_) => {}
                }
                next.insert(key, obj);
            }
            for (key, old) in items.iter() {
                if !next.contains_key(key) {
                    events.push(WatchEvent::new(EventType::Deleted, old.clone()));
                }
            }
            *items = next;
        }
        for event in &events {
            handler.on_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pkg_types::cluster::ManagedCluster;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(EventType, String)>>,
    }

    impl EventHandler<ManagedCluster> for Recorder {
        fn on_event(&self, event: &WatchEvent<ManagedCluster>) {
            self.seen
                .lock()
                .push((event.event_type, event.object.metadata.name.clone()));
        }
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn cache_follows_store() {
        let store = ObjectStore::in_memory().await.unwrap();
        store.create(ManagedCluster::new("c1")).await.unwrap();

        let reflector = Reflector::<ManagedCluster>::new(store.clone());
        let cache = reflector.cache();
        let recorder = Arc::new(Recorder::default());
        let cancel = CancellationToken::new();
        let handle = reflector.spawn(recorder.clone(), cancel.clone());

        cache.wait_synced().await;
        assert!(cache.contains(&ObjectKey::new(None, "c1")));

        store.create(ManagedCluster::new("c2")).await.unwrap();
        store
            .delete::<ManagedCluster>(None, "c1", None)
            .await
            .unwrap();
        eventually(|| cache.len() == 1 && cache.contains(&ObjectKey::new(None, "c2"))).await;

        let seen = recorder.seen.lock().clone();
        assert_eq!(
            seen,
            vec![
                (EventType::Added, "c1".to_string()),
                (EventType::Added, "c2".to_string()),
                (EventType::Deleted, "c1".to_string()),
            ]
        );

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn relist_reports_the_difference() {
        let store = ObjectStore::in_memory().await.unwrap();
        let reflector = Reflector::<ManagedCluster>::new(store.clone());
        let recorder = Recorder::default();

        let mut stale = ManagedCluster::new("old");
        stale.metadata.resource_version = "1".into();
        let mut kept = ManagedCluster::new("kept");
        kept.metadata.resource_version = "2".into();
        reflector.replace(vec![stale, kept.clone()], &recorder);
        recorder.seen.lock().clear();

        let mut changed = kept.clone();
        changed.metadata.resource_version = "5".into();
        let mut fresh = ManagedCluster::new("new");
        fresh.metadata.resource_version = "6".into();
        reflector.replace(vec![changed, fresh], &recorder);

        let mut seen = recorder.seen.lock().clone();
        seen.sort_by(|a, b| a.1.cmp(&b.1));
        assert_eq!(
            seen,
            vec![
                (EventType::Modified, "kept".to_string()),
                (EventType::Added, "new".to_string()),
                (EventType::Deleted, "old".to_string()),
            ]
        );
        assert_eq!(reflector.cache().len(), 2);
    }
}
