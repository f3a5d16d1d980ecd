use parking_lot::RwLock;
use pkg_state::EventType;
use pkg_types::identity::UserInfo;
use pkg_types::permission::ClusterPermission;
use pkg_types::{ObjectKey, Resource};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::fields::{self, PermissionBinding};
use crate::index::{IndexDelta, SubjectIndex, keys_for};

/// The bindings of one `ClusterPermission`, with the cluster they apply to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionEntry {
    pub cluster: String,
    pub name: String,
    pub bindings: Vec<PermissionBinding>,
}

#[derive(Default)]
struct Inner {
    entries: BTreeMap<ObjectKey, Arc<PermissionEntry>>,
    index: SubjectIndex,
}

/// Parsed `ClusterPermission` objects plus their subject index.
///
/// Fed only by the ClusterPermission reflector's handler, which runs on a
/// single task, so mutations land one event at a time in store order. Both
/// maps change under one write lock and readers never see them disagree.
#[derive(Default)]
pub struct PermissionCache {
    inner: RwLock<Inner>,
}

impl PermissionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&self, event_type: EventType, perm: &ClusterPermission) -> IndexDelta {
        let key = perm.key();
        let delta = {
            let mut inner = self.inner.write();
            match event_type {
                EventType::Added | EventType::Modified => {
                    let entry = entry_of(perm);
                    let keys = keys_for(&entry.cluster, &entry.name, &entry.bindings);
                    let delta = inner.index.upsert(&key, keys);
                    inner.entries.insert(key.clone(), Arc::new(entry));
                    delta
                }
                EventType::Deleted => {
                    inner.entries.remove(&key);
                    inner.index.remove(&key)
                }
            }
        };
        debug!(
            "ClusterPermission {} {:?}: index +{} -{}",
            key, event_type, delta.added, delta.removed
        );
        delta
    }

    /// Entries whose bindings name the caller, ordered by cluster then name.
    pub fn for_caller(&self, user: &UserInfo) -> Vec<Arc<PermissionEntry>> {
        let inner = self.inner.read();
        inner
            .index
            .lookup_caller(user)
            .iter()
            .filter_map(|key| inner.entries.get(key).cloned())
            .collect()
    }

    pub fn get(&self, key: &ObjectKey) -> Option<Arc<PermissionEntry>> {
        self.inner.read().entries.get(key).cloned()
    }

    pub fn index_keys(&self) -> Vec<String> {
        self.inner.read().index.keys().map(str::to_string).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }
}

fn entry_of(perm: &ClusterPermission) -> PermissionEntry {
    PermissionEntry {
        cluster: perm.metadata.namespace.clone().unwrap_or_default(),
        name: perm.metadata.name.clone(),
        bindings: fields::bindings(perm),
    }
}
