use pkg_types::identity::UserInfo;
use pkg_types::userpermission::{BindingScope, ClusterBinding, UserPermission};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cache::PermissionEntry;
use crate::fields::BindingTarget;
use crate::roles::RoleCatalog;
use crate::synthetic::Grant;

/// Fold `binding` into the role's bindings for its cluster.
///
/// An existing cluster-scope binding absorbs the new one, a new cluster-scope
/// binding replaces a namespace-scope one, and two namespace-scope bindings
/// merge their namespace lists.
pub fn merge_or_append(bindings: &mut Vec<ClusterBinding>, binding: ClusterBinding) {
    let Some(i) = bindings.iter().position(|b| b.cluster == binding.cluster) else {
        bindings.push(binding);
        return;
    };
    let existing = &mut bindings[i];
    match (existing.scope, binding.scope) {
        (BindingScope::Cluster, _) => {}
        (BindingScope::Namespace, BindingScope::Cluster) => *existing = binding,
        (BindingScope::Namespace, BindingScope::Namespace) => {
            existing.namespaces.extend(binding.namespaces);
            existing.namespaces.sort();
            existing.namespaces.dedup();
        }
    }
}

/// Bindings per discoverable role from the caller's `ClusterPermission`
/// entries.
pub fn bindings_by_role(
    entries: &[Arc<PermissionEntry>],
    user: &UserInfo,
    catalog: &RoleCatalog,
) -> BTreeMap<String, Vec<ClusterBinding>> {
    let mut out: BTreeMap<String, Vec<ClusterBinding>> = BTreeMap::new();
    for entry in entries {
        for binding in &entry.bindings {
            if binding.role.is_empty() || !catalog.contains(&binding.role) || !binding.binds(user) {
                continue;
            }
            let cluster_binding = match &binding.target {
                BindingTarget::Cluster => ClusterBinding::cluster_wide(&entry.cluster),
                BindingTarget::Namespace(ns) => ClusterBinding::in_namespace(&entry.cluster, ns),
            };
            merge_or_append(out.entry(binding.role.clone()).or_default(), cluster_binding);
        }
    }
    out
}

/// Assemble the caller's UserPermission objects, sorted by role name.
///
/// Synthetic bindings merge into any same-named discoverable role; rules
/// come from the catalog first and the synthetic definition otherwise.
pub fn assemble(
    mut by_role: BTreeMap<String, Vec<ClusterBinding>>,
    synthetic: BTreeMap<&'static str, Vec<ClusterBinding>>,
    catalog: &RoleCatalog,
) -> Vec<UserPermission> {
    for (role, bindings) in synthetic {
        let slot = by_role.entry(role.to_string()).or_default();
        for binding in bindings {
            merge_or_append(slot, binding);
        }
    }
    by_role
        .into_iter()
        .filter_map(|(role, mut bindings)| {
            let rules = catalog
                .rules(&role)
                .or_else(|| Grant::from_role_name(&role).map(Grant::rules))?;
            bindings.sort_by(|a, b| a.cluster.cmp(&b.cluster));
            Some(UserPermission::new(&role, bindings, rules))
        })
        .collect()
}
