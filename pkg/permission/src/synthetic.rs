//! Synthetic `managedcluster:admin` / `managedcluster:view` roles, derived
//! from hub RBAC rather than from `ClusterPermission` objects.
//!
//! A caller is an admin of cluster `C` when a hub ClusterRoleBinding, or a
//! RoleBinding in namespace `C`, binds them to a ClusterRole allowing `create`
//! on both managed cluster actions and views. Create on views alone makes
//! them a viewer. Admin wins when both apply to the same cluster.

use pkg_constants::api::{ACTION_GROUP, VIEW_GROUP};
use pkg_constants::rbac::{
    ACTION_RESOURCE, MANAGED_CLUSTER_ADMIN_ROLE, MANAGED_CLUSTER_VIEW_ROLE, VIEW_RESOURCE,
};
use pkg_state::Cache;
use pkg_types::ObjectKey;
use pkg_types::cluster::ManagedCluster;
use pkg_types::identity::UserInfo;
use pkg_types::rbac::{
    ClusterRole, ClusterRoleBinding, PolicyRule, RoleBinding, RoleRef, Subject, SubjectKind,
};
use pkg_types::userpermission::ClusterBinding;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Grant {
    View,
    Admin,
}

impl Grant {
    pub fn role_name(self) -> &'static str {
        match self {
            Grant::Admin => MANAGED_CLUSTER_ADMIN_ROLE,
            Grant::View => MANAGED_CLUSTER_VIEW_ROLE,
        }
    }

    pub fn rules(self) -> Vec<PolicyRule> {
        match self {
            Grant::Admin => vec![PolicyRule::new(&["*"], &["*"], &["*"])],
            Grant::View => vec![PolicyRule::new(&["*"], &["*"], &["get", "list", "watch"])],
        }
    }

    pub fn from_role_name(name: &str) -> Option<Self> {
        match name {
            MANAGED_CLUSTER_ADMIN_ROLE => Some(Grant::Admin),
            MANAGED_CLUSTER_VIEW_ROLE => Some(Grant::View),
            _ => None,
        }
    }
}

pub fn grant_of(role: &ClusterRole) -> Option<Grant> {
    let actions = role.allows("create", ACTION_GROUP, ACTION_RESOURCE);
    let views = role.allows("create", VIEW_GROUP, VIEW_RESOURCE);
    match (actions, views) {
        (true, true) => Some(Grant::Admin),
        (false, true) => Some(Grant::View),
        _ => None,
    }
}

/// RBAC subject matching. Service accounts match the caller by their
/// `system:serviceaccount:<ns>:<name>` user name, defaulting the namespace
/// to the binding's own.
fn rbac_binds(subjects: &[Subject], user: &UserInfo, binding_ns: Option<&str>) -> bool {
    subjects.iter().any(|s| match s.kind {
        SubjectKind::User => s.name == user.name,
        SubjectKind::Group => user.in_group(&s.name),
        SubjectKind::ServiceAccount => {
            match s.namespace.as_deref().filter(|ns| !ns.is_empty()).or(binding_ns) {
                Some(ns) => user.name == format!("system:serviceaccount:{}:{}", ns, s.name),
                None => false,
            }
        }
    })
}

/// Read-only view over the hub RBAC caches.
#[derive(Clone)]
pub struct RbacReviewer {
    roles: Cache<ClusterRole>,
    cluster_role_bindings: Cache<ClusterRoleBinding>,
    role_bindings: Cache<RoleBinding>,
    clusters: Cache<ManagedCluster>,
}

impl RbacReviewer {
    pub fn new(
        roles: Cache<ClusterRole>,
        cluster_role_bindings: Cache<ClusterRoleBinding>,
        role_bindings: Cache<RoleBinding>,
        clusters: Cache<ManagedCluster>,
    ) -> Self {
        Self {
            roles,
            cluster_role_bindings,
            role_bindings,
            clusters,
        }
    }

    pub async fn wait_synced(&self) {
        self.roles.wait_synced().await;
        self.cluster_role_bindings.wait_synced().await;
        self.role_bindings.wait_synced().await;
        self.clusters.wait_synced().await;
    }

    pub fn has_synced(&self) -> bool {
        self.roles.has_synced()
            && self.cluster_role_bindings.has_synced()
            && self.role_bindings.has_synced()
            && self.clusters.has_synced()
    }

    // Only ClusterRole references resolve; namespaced Roles are not tracked.
    fn grant_for(&self, role_ref: &RoleRef) -> Option<Grant> {
        if role_ref.kind != "ClusterRole" {
            return None;
        }
        let role = self.roles.get(&ObjectKey::new(None, &role_ref.name))?;
        grant_of(&role)
    }

    /// The strongest synthetic grant the caller holds on each cluster.
    pub fn grants(&self, user: &UserInfo) -> BTreeMap<String, Grant> {
        let clusters: Vec<String> = self
            .clusters
            .list()
            .into_iter()
            .map(|c| c.metadata.name)
            .collect();
        let mut out: BTreeMap<String, Grant> = BTreeMap::new();
        let mut raise = |cluster: &str, grant: Grant| {
            let slot = out.entry(cluster.to_string()).or_insert(grant);
            *slot = (*slot).max(grant);
        };

        for crb in self.cluster_role_bindings.list() {
            if !rbac_binds(&crb.subjects, user, None) {
                continue;
            }
            if let Some(grant) = self.grant_for(&crb.role_ref) {
                for cluster in &clusters {
                    raise(cluster, grant);
                }
            }
        }

        for cluster in &clusters {
            for rb in self.role_bindings.list_namespace(cluster) {
                if !rbac_binds(&rb.subjects, user, Some(cluster)) {
                    continue;
                }
                if let Some(grant) = self.grant_for(&rb.role_ref) {
                    raise(cluster, grant);
                }
            }
        }
        out
    }

    /// Cluster-wide bindings per synthetic role name.
    pub fn synthetic_bindings(&self, user: &UserInfo) -> BTreeMap<&'static str, Vec<ClusterBinding>> {
        let mut out: BTreeMap<&'static str, Vec<ClusterBinding>> = BTreeMap::new();
        for (cluster, grant) in self.grants(user) {
            out.entry(grant.role_name())
                .or_default()
                .push(ClusterBinding::cluster_wide(&cluster));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_state::{EventHandler, ObjectStore, Reflector, WatchEvent};
    use pkg_types::Resource;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn start<K: Resource>(store: &ObjectStore, cancel: &CancellationToken) -> Cache<K> {
        let reflector = Reflector::<K>::new(store.clone());
        let cache = reflector.cache();
        let noop: Arc<dyn EventHandler<K>> = Arc::new(|_: &WatchEvent<K>| {});
        reflector.spawn(noop, cancel.clone());
        cache
    }

    async fn reviewer(store: &ObjectStore, cancel: &CancellationToken) -> RbacReviewer {
        let r = RbacReviewer::new(
            start(store, cancel),
            start(store, cancel),
            start(store, cancel),
            start(store, cancel),
        );
        r.wait_synced().await;
        r
    }

    fn actions_and_views() -> ClusterRole {
        ClusterRole::new(
            "fleet-operator",
            vec![
                PolicyRule::new(&[ACTION_GROUP], &[ACTION_RESOURCE], &["create"]),
                PolicyRule::new(&[VIEW_GROUP], &[VIEW_RESOURCE], &["create", "get"]),
            ],
        )
    }

    fn views_only() -> ClusterRole {
        ClusterRole::new(
            "fleet-viewer",
            vec![PolicyRule::new(&[VIEW_GROUP], &[VIEW_RESOURCE], &["create"])],
        )
    }

    #[test]
    fn grant_classification() {
        assert_eq!(grant_of(&actions_and_views()), Some(Grant::Admin));
        assert_eq!(grant_of(&views_only()), Some(Grant::View));
        let actions_only = ClusterRole::new(
            "a",
            vec![PolicyRule::new(&[ACTION_GROUP], &[ACTION_RESOURCE], &["create"])],
        );
        assert_eq!(grant_of(&actions_only), None);
        let wildcard = ClusterRole::new("w", vec![PolicyRule::new(&["*"], &["*"], &["*"])]);
        assert_eq!(grant_of(&wildcard), Some(Grant::Admin));
    }

    #[tokio::test]
    async fn admin_supersedes_view_per_cluster() {
        let store = ObjectStore::in_memory().await.unwrap();
        for c in ["c1", "c2"] {
            store.create(ManagedCluster::new(c)).await.unwrap();
        }
        store.create(actions_and_views()).await.unwrap();
        store.create(views_only()).await.unwrap();
        // fleet-wide viewer through a group
        store
            .create(ClusterRoleBinding::new(
                "viewers",
                "fleet-viewer",
                vec![Subject::group("devs")],
            ))
            .await
            .unwrap();
        // admin only on c2
        store
            .create(RoleBinding::new(
                "c2",
                "ops",
                "fleet-operator",
                vec![Subject::user("alice")],
            ))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let reviewer = reviewer(&store, &cancel).await;

        let got = reviewer.synthetic_bindings(&UserInfo::new("alice", &["devs"]));
        assert_eq!(
            got.get(MANAGED_CLUSTER_VIEW_ROLE),
            Some(&vec![ClusterBinding::cluster_wide("c1")])
        );
        assert_eq!(
            got.get(MANAGED_CLUSTER_ADMIN_ROLE),
            Some(&vec![ClusterBinding::cluster_wide("c2")])
        );

        assert!(reviewer.synthetic_bindings(&UserInfo::new("bob", &[])).is_empty());
        cancel.cancel();
    }

    #[tokio::test]
    async fn role_bindings_outside_cluster_namespaces_are_ignored() {
        let store = ObjectStore::in_memory().await.unwrap();
        store.create(ManagedCluster::new("c1")).await.unwrap();
        store.create(actions_and_views()).await.unwrap();
        store
            .create(RoleBinding::new(
                "default",
                "ops",
                "fleet-operator",
                vec![Subject::user("alice")],
            ))
            .await
            .unwrap();
        let mut dangling = RoleBinding::new("c1", "dangling", "missing-role", vec![Subject::user("alice")]);
        dangling.role_ref.kind = "ClusterRole".to_string();
        store.create(dangling).await.unwrap();

        let cancel = CancellationToken::new();
        let reviewer = reviewer(&store, &cancel).await;
        assert!(reviewer.grants(&UserInfo::new("alice", &[])).is_empty());
        cancel.cancel();
    }

    #[test]
    fn service_account_subjects() {
        let sa = Subject {
            kind: SubjectKind::ServiceAccount,
            name: "robot".to_string(),
            namespace: None,
        };
        let user = UserInfo::new("system:serviceaccount:c1:robot", &[]);
        assert!(rbac_binds(&[sa.clone()], &user, Some("c1")));
        assert!(!rbac_binds(&[sa.clone()], &user, Some("c2")));
        assert!(!rbac_binds(&[sa], &user, None));
    }
}
