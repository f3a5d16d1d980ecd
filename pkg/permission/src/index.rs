use pkg_types::ObjectKey;
use pkg_types::identity::UserInfo;
use pkg_types::rbac::SubjectKind;
use std::collections::{BTreeMap, BTreeSet};

use crate::fields::PermissionBinding;

/// `{namespace}/{name}/{subjectKind}/{subjectName}`
pub fn index_key(namespace: &str, name: &str, kind: SubjectKind, subject: &str) -> String {
    format!("{}/{}/{}/{}", namespace, name, kind, subject)
}

/// Inverse of [`index_key`]. The subject name keeps any further slashes.
pub fn split_key(key: &str) -> Option<(&str, &str, SubjectKind, &str)> {
    let mut parts = key.splitn(4, '/');
    let namespace = parts.next()?;
    let name = parts.next()?;
    let kind = SubjectKind::parse(parts.next()?)?;
    let subject = parts.next()?;
    Some((namespace, name, kind, subject))
}

/// Keys emitted by one object's bindings.
pub fn keys_for(namespace: &str, name: &str, bindings: &[PermissionBinding]) -> BTreeSet<String> {
    bindings
        .iter()
        .flat_map(|b| b.subjects.iter())
        .map(|s| index_key(namespace, name, s.kind, &s.name))
        .collect()
}

/// What an update changed in the index.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IndexDelta {
    pub added: usize,
    pub removed: usize,
}

/// Set-valued reverse map from binding subject to the `ClusterPermission`
/// objects that bind it.
#[derive(Debug, Default)]
pub struct SubjectIndex {
    by_object: BTreeMap<ObjectKey, BTreeSet<String>>,
    by_subject: BTreeMap<(SubjectKind, String), BTreeSet<ObjectKey>>,
}

impl SubjectIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the keys owned by `object`, inserting new ones and removing
    /// the ones that vanished.
    pub fn upsert(&mut self, object: &ObjectKey, keys: BTreeSet<String>) -> IndexDelta {
        let old = self.by_object.remove(object).unwrap_or_default();
        let mut delta = IndexDelta::default();
        for key in old.difference(&keys) {
            self.unlink(object, key);
            delta.removed += 1;
        }
        for key in keys.difference(&old) {
            if let Some((_, _, kind, subject)) = split_key(key) {
                self.by_subject
                    .entry((kind, subject.to_string()))
                    .or_default()
                    .insert(object.clone());
            }
            delta.added += 1;
        }
        if !keys.is_empty() {
            self.by_object.insert(object.clone(), keys);
        }
        delta
    }

    pub fn remove(&mut self, object: &ObjectKey) -> IndexDelta {
        self.upsert(object, BTreeSet::new())
    }

    fn unlink(&mut self, object: &ObjectKey, key: &str) {
        let Some((_, _, kind, subject)) = split_key(key) else {
            return;
        };
        let slot = (kind, subject.to_string());
        if let Some(objects) = self.by_subject.get_mut(&slot) {
            objects.remove(object);
            if objects.is_empty() {
                self.by_subject.remove(&slot);
            }
        }
    }

    pub fn lookup(&self, kind: SubjectKind, name: &str) -> BTreeSet<ObjectKey> {
        self.by_subject
            .get(&(kind, name.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Objects binding the caller by user name or any of its groups.
    pub fn lookup_caller(&self, user: &UserInfo) -> BTreeSet<ObjectKey> {
        let mut out = self.lookup(SubjectKind::User, &user.name);
        for group in &user.groups {
            out.extend(self.lookup(SubjectKind::Group, group));
        }
        out
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.by_object.values().flatten().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_object.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_object.is_empty()
    }
}
