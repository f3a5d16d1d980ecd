use parking_lot::RwLock;
use pkg_constants::api::LABEL_DISCOVERABLE;
use pkg_state::EventType;
use pkg_types::rbac::{ClusterRole, PolicyRule};
use std::collections::BTreeMap;
use tracing::debug;

pub fn is_discoverable(role: &ClusterRole) -> bool {
    role.metadata.labels.get(LABEL_DISCOVERABLE).map(String::as_str) == Some("true")
}

/// ClusterRoles labelled `discoverable=true`, by name, with their rules.
/// A role that loses the label drops out on the next event.
#[derive(Default)]
pub struct RoleCatalog {
    roles: RwLock<BTreeMap<String, Vec<PolicyRule>>>,
}

impl RoleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether the catalog changed.
    pub fn apply(&self, event_type: EventType, role: &ClusterRole) -> bool {
        let name = role.metadata.name.clone();
        let changed = {
            let mut roles = self.roles.write();
            match event_type {
                EventType::Added | EventType::Modified if is_discoverable(role) => {
                    roles.insert(name.clone(), role.rules.clone()).as_ref() != Some(&role.rules)
                }
                _ => roles.remove(&name).is_some(),
            }
        };
        if changed {
            debug!("Role catalog updated for ClusterRole {}", name);
        }
        changed
    }

    pub fn contains(&self, name: &str) -> bool {
        self.roles.read().contains_key(name)
    }

    pub fn rules(&self, name: &str) -> Option<Vec<PolicyRule>> {
        self.roles.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.roles.read().keys().cloned().collect()
    }
}
