use chrono::Utc;
use pkg_constants::state::{
    EVENT_BROADCAST_CAPACITY, EVENT_LOG_CAPACITY, REGISTRY_PREFIX, WATCH_CHANNEL_CAPACITY,
};
use pkg_types::validate::validate_object;
use pkg_types::{ObjectMeta, Resource, TypeMeta};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{RwLock, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::StateStore;
use crate::error::StoreError;
use crate::selector::LabelSelector;
use crate::watch::{EventLog, EventType, RawEvent, WatchEvent};

/// Stream of typed events; ends with `Err(Expired)` when the consumer fell
/// too far behind and must relist.
pub type WatchStream<K> = ReceiverStream<Result<WatchEvent<K>, StoreError>>;

/// Conditions a delete must satisfy against the stored object.
#[derive(Debug, Clone, Default)]
pub struct Preconditions {
    pub uid: Option<String>,
    pub resource_version: Option<String>,
}

#[derive(Deserialize)]
struct MetaOnly {
    #[serde(default)]
    metadata: ObjectMeta,
}

/// Typed, optimistic-concurrency store for declarative objects.
///
/// Writers are serialized so resourceVersions are minted in commit order and
/// every commit produces exactly one event. Lists share the lock with each
/// other so the returned resourceVersion covers exactly the listed state.
#[derive(Clone)]
pub struct ObjectStore {
    kv: StateStore,
    log: EventLog,
    lock: Arc<RwLock<()>>,
}

impl ObjectStore {
    /// Wrap a raw store, continuing the resourceVersion sequence from the
    /// highest version already persisted.
    pub async fn open(kv: StateStore) -> Result<Self, StoreError> {
        let entries = kv.list_prefix(REGISTRY_PREFIX).await?;
        let max_rv = entries
            .iter()
            .filter_map(|(_, v)| serde_json::from_slice::<MetaOnly>(v).ok())
            .map(|m| m.metadata.resource_version_u64())
            .max()
            .unwrap_or(0);
        info!(
            "Object store opened with {} objects at resourceVersion {}",
            entries.len(),
            max_rv
        );
        Ok(Self {
            kv,
            log: EventLog::new(EVENT_LOG_CAPACITY, EVENT_BROADCAST_CAPACITY, max_rv),
            lock: Arc::new(RwLock::new(())),
        })
    }

    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::open(StateStore::in_memory().await?).await
    }

    pub fn event_log(&self) -> &EventLog {
        &self.log
    }

    fn key_for<K: Resource>(namespace: Option<&str>, name: &str) -> String {
        match namespace {
            Some(ns) if K::NAMESPACED => format!("{}{}/{}/{}", REGISTRY_PREFIX, K::PLURAL, ns, name),
            _ => format!("{}{}/{}", REGISTRY_PREFIX, K::PLURAL, name),
        }
    }

    fn prefix_for<K: Resource>(namespace: Option<&str>) -> String {
        match namespace {
            Some(ns) if K::NAMESPACED => format!("{}{}/{}/", REGISTRY_PREFIX, K::PLURAL, ns),
            _ => format!("{}{}/", REGISTRY_PREFIX, K::PLURAL),
        }
    }

    fn display_name(namespace: Option<&str>, name: &str) -> String {
        match namespace {
            Some(ns) => format!("{}/{}", ns, name),
            None => name.to_string(),
        }
    }

    async fn read<K: Resource>(&self, key: &str) -> Result<Option<(K, Vec<u8>)>, StoreError> {
        match self.kv.get(key).await? {
            Some(bytes) => {
                let obj = serde_json::from_slice(&bytes)?;
                Ok(Some((obj, bytes)))
            }
            None => Ok(None),
        }
    }

    pub async fn get<K: Resource>(&self, namespace: Option<&str>, name: &str) -> Result<K, StoreError> {
        let key = Self::key_for::<K>(namespace, name);
        match self.read::<K>(&key).await? {
            Some((obj, _)) => Ok(obj),
            None => Err(StoreError::NotFound {
                kind: K::KIND,
                name: Self::display_name(namespace, name),
            }),
        }
    }

    /// List objects of a kind, optionally within one namespace and matching a
    /// selector, together with the resourceVersion the list reflects.
    pub async fn list<K: Resource>(
        &self,
        namespace: Option<&str>,
        selector: Option<&LabelSelector>,
    ) -> Result<(Vec<K>, u64), StoreError> {
        let _guard = self.lock.read().await;
        let prefix = Self::prefix_for::<K>(namespace);
        let entries = self.kv.list_prefix(&prefix).await?;
        let mut items = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            // A cluster-wide prefix of a namespaced kind also covers every namespace.
            match serde_json::from_slice::<K>(&value) {
                Ok(obj) => {
                    if selector.is_none_or(|s| s.matches(&obj.meta().labels)) {
                        items.push(obj);
                    }
                }
                Err(e) => warn!("Skipping undecodable {} at {}: {}", K::KIND, key, e),
            }
        }
        let rv = self.log.current_seq().await;
        Ok((items, rv))
    }

    pub async fn create<K: Resource>(&self, mut obj: K) -> Result<K, StoreError> {
        validate_object(&obj).map_err(|e| StoreError::Invalid(e.to_string()))?;
        let _guard = self.lock.write().await;

        let (ns, name) = (obj.meta().namespace.clone(), obj.meta().name.clone());
        let key = Self::key_for::<K>(ns.as_deref(), &name);
        if self.kv.get(&key).await?.is_some() {
            return Err(StoreError::AlreadyExists {
                kind: K::KIND,
                name: Self::display_name(ns.as_deref(), &name),
            });
        }

        let seq = self.log.next_seq().await;
        *obj.type_meta_mut() = TypeMeta::of::<K>();
        let meta = obj.meta_mut();
        meta.uid = Uuid::new_v4().to_string();
        meta.resource_version = seq.to_string();
        meta.generation = 1;
        meta.creation_timestamp = Some(Utc::now());
        meta.deletion_timestamp = None;

        let data = Arc::new(serde_json::to_vec(&obj)?);
        self.kv.put(&key, &data).await?;
        self.log.emit(EventType::Added, key, data, None).await;
        debug!("Created {} {} at rv {}", K::KIND, obj.key(), seq);
        Ok(obj)
    }

    /// Replace an object's spec and metadata. The stored status is kept for
    /// kinds with a status subresource.
    pub async fn update<K: Resource>(&self, mut obj: K) -> Result<K, StoreError> {
        validate_object(&obj).map_err(|e| StoreError::Invalid(e.to_string()))?;
        let _guard = self.lock.write().await;

        let (current, current_bytes) = self.current_for_write(&obj).await?;

        *obj.type_meta_mut() = TypeMeta::of::<K>();
        obj.copy_status_from(&current);
        {
            let cur = current.meta();
            let meta = obj.meta_mut();
            meta.uid = cur.uid.clone();
            meta.creation_timestamp = cur.creation_timestamp;
            meta.deletion_timestamp = cur.deletion_timestamp;
            meta.generation = cur.generation;
        }
        if obj == current {
            return Ok(current);
        }

        // Anything beyond metadata changing moves the generation.
        let mut probe = obj.clone();
        *probe.meta_mut() = current.meta().clone();
        if probe != current {
            obj.meta_mut().generation = current.meta().generation + 1;
        }

        self.commit(obj, current_bytes).await
    }

    /// Write only the status block of `obj` onto the stored object.
    pub async fn update_status<K: Resource>(&self, obj: K) -> Result<K, StoreError> {
        if !K::HAS_STATUS {
            return Err(StoreError::Invalid(format!("{} has no status", K::KIND)));
        }
        let _guard = self.lock.write().await;

        let (current, current_bytes) = self.current_for_write(&obj).await?;
        let mut next = current.clone();
        next.copy_status_from(&obj);
        if next == current {
            return Ok(current);
        }
        self.commit(next, current_bytes).await
    }

    async fn current_for_write<K: Resource>(&self, obj: &K) -> Result<(K, Vec<u8>), StoreError> {
        let meta = obj.meta();
        let key = Self::key_for::<K>(meta.namespace.as_deref(), &meta.name);
        let full_name = Self::display_name(meta.namespace.as_deref(), &meta.name);
        let Some((current, bytes)) = self.read::<K>(&key).await? else {
            return Err(StoreError::NotFound {
                kind: K::KIND,
                name: full_name,
            });
        };
        if current.meta().resource_version != meta.resource_version {
            return Err(StoreError::Conflict {
                kind: K::KIND,
                name: full_name,
                message: format!(
                    "resourceVersion {:?} does not match stored {}",
                    meta.resource_version,
                    current.meta().resource_version
                ),
            });
        }
        Ok((current, bytes))
    }

    async fn commit<K: Resource>(&self, mut obj: K, prev: Vec<u8>) -> Result<K, StoreError> {
        let seq = self.log.next_seq().await;
        obj.meta_mut().resource_version = seq.to_string();
        let key = Self::key_for::<K>(obj.meta().namespace.as_deref(), &obj.meta().name);
        let data = Arc::new(serde_json::to_vec(&obj)?);
        self.kv.put(&key, &data).await?;
        self.log
            .emit(EventType::Modified, key, data, Some(Arc::new(prev)))
            .await;
        debug!("Updated {} {} at rv {}", K::KIND, obj.key(), seq);
        Ok(obj)
    }

    /// Delete an object, returning its final state.
    pub async fn delete<K: Resource>(
        &self,
        namespace: Option<&str>,
        name: &str,
        preconditions: Option<Preconditions>,
    ) -> Result<K, StoreError> {
        let _guard = self.lock.write().await;
        let key = Self::key_for::<K>(namespace, name);
        let full_name = Self::display_name(namespace, name);
        let Some((mut obj, prev)) = self.read::<K>(&key).await? else {
            return Err(StoreError::NotFound {
                kind: K::KIND,
                name: full_name,
            });
        };

        if let Some(pre) = preconditions {
            let meta = obj.meta();
            let uid_ok = pre.uid.as_ref().is_none_or(|u| *u == meta.uid);
            let rv_ok = pre
                .resource_version
                .as_ref()
                .is_none_or(|rv| *rv == meta.resource_version);
            if !uid_ok || !rv_ok {
                return Err(StoreError::Conflict {
                    kind: K::KIND,
                    name: full_name,
                    message: "delete preconditions not met".to_string(),
                });
            }
        }

        let seq = self.log.next_seq().await;
        let meta = obj.meta_mut();
        meta.resource_version = seq.to_string();
        meta.deletion_timestamp = Some(Utc::now());
        let data = Arc::new(serde_json::to_vec(&obj)?);
        self.kv.delete(&key).await?;
        self.log
            .emit(EventType::Deleted, key, data, Some(Arc::new(prev)))
            .await;
        debug!("Deleted {} {} at rv {}", K::KIND, full_name, seq);
        Ok(obj)
    }

    /// Watch a kind from `since`. With `since == 0` the stream starts with a
    /// synthetic `Added` for every object visible now; otherwise it replays
    /// retained history after `since`, failing with `Expired` if that history
    /// is gone.
    pub async fn watch<K: Resource>(
        &self,
        namespace: Option<&str>,
        selector: Option<LabelSelector>,
        since: u64,
    ) -> Result<WatchStream<K>, StoreError> {
        let prefix = Self::prefix_for::<K>(namespace);
        // Subscribe before reading the starting point so nothing falls in between.
        let mut live = self.log.subscribe();

        let mut initial = Vec::new();
        let mut last_seq;
        if since == 0 {
            let (items, rv) = self.list::<K>(namespace, selector.as_ref()).await?;
            initial.extend(items.into_iter().map(|o| WatchEvent::new(EventType::Added, o)));
            last_seq = rv;
        } else {
            last_seq = since;
            for raw in self.log.events_since(since).await? {
                last_seq = last_seq.max(raw.seq);
                if let Some(ev) = translate::<K>(&raw, &prefix, selector.as_ref()) {
                    initial.push(ev);
                }
            }
        }

        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            for ev in initial {
                if tx.send(Ok(ev)).await.is_err() {
                    return;
                }
            }
            loop {
                let raw = tokio::select! {
                    _ = tx.closed() => return,
                    received = live.recv() => received,
                };
                match raw {
                    Ok(raw) => {
                        if raw.seq <= last_seq {
                            continue;
                        }
                        last_seq = raw.seq;
                        if let Some(ev) = translate::<K>(&raw, &prefix, selector.as_ref()) {
                            if tx.send(Ok(ev)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        let _ = tx
                            .send(Err(StoreError::Expired(format!(
                                "watcher of {} fell behind by {} events",
                                K::KIND,
                                missed
                            ))))
                            .await;
                        return;
                    }
                    Err(RecvError::Closed) => return,
                }
            }
        });
        Ok(ReceiverStream::new(rx))
    }
}

/// Turn a raw event into a typed one for a watcher, applying the selector:
/// an object moving into the selection is `Added`, one moving out is `Deleted`.
fn translate<K: Resource>(
    raw: &RawEvent,
    prefix: &str,
    selector: Option<&LabelSelector>,
) -> Option<WatchEvent<K>> {
    if !raw.key.starts_with(prefix) {
        return None;
    }
    let obj: K = match serde_json::from_slice(&raw.value) {
        Ok(obj) => obj,
        Err(e) => {
            warn!("Dropping undecodable {} event for {}: {}", K::KIND, raw.key, e);
            return None;
        }
    };
    let Some(selector) = selector else {
        return Some(WatchEvent::new(raw.event_type, obj));
    };
    let now = selector.matches(&obj.meta().labels);
    let event_type = match raw.event_type {
        EventType::Added | EventType::Deleted => now.then_some(raw.event_type)?,
        EventType::Modified => {
            let before = raw
                .prev
                .as_ref()
                .and_then(|p| serde_json::from_slice::<MetaOnly>(p).ok())
                .is_some_and(|m| selector.matches(&m.metadata.labels));
            match (before, now) {
                (true, true) => EventType::Modified,
                (false, true) => EventType::Added,
                (true, false) => EventType::Deleted,
                (false, false) => return None,
            }
        }
    };
    Some(WatchEvent::new(event_type, obj))
}
