use pkg_constants::rbac::KUBEVIRT_ROLES;
use pkg_types::identity::UserInfo;
use pkg_types::project::Project;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::cache::PermissionEntry;
use crate::fields::BindingTarget;

/// Project name standing for every namespace of a cluster.
pub const ALL_PROJECTS: &str = "*";

pub fn is_kubevirt_role(role: &str) -> bool {
    KUBEVIRT_ROLES.contains(&role)
}

/// Projects the caller can reach through KubeVirt roles, deduplicated and
/// sorted by cluster.
///
/// A cluster-wide KubeVirt binding yields the single project `*` for its
/// cluster and the object's namespaced bindings are not consulted.
pub fn projects_for(entries: &[Arc<PermissionEntry>], user: &UserInfo) -> Vec<Project> {
    let mut out = BTreeSet::new();
    for entry in entries {
        let cluster_wide = entry
            .bindings
            .iter()
            .any(|b| b.is_cluster_wide() && is_kubevirt_role(&b.role) && b.binds(user));
        if cluster_wide {
            out.insert(Project::new(&entry.cluster, ALL_PROJECTS));
            continue;
        }
        for binding in &entry.bindings {
            if let BindingTarget::Namespace(ns) = &binding.target {
                if is_kubevirt_role(&binding.role) && binding.binds(user) {
                    out.insert(Project::new(&entry.cluster, ns));
                }
            }
        }
    }
    out.into_iter().collect()
}
