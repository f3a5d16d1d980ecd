use parking_lot::Mutex;
use pkg_constants::controller::PERMISSION_CHANGE_CAPACITY;
use pkg_state::{Cache, EventHandler, EventType, ObjectStore, Reflector, WatchEvent};
use pkg_types::Resource;
use pkg_types::cluster::ManagedCluster;
use pkg_types::identity::UserInfo;
use pkg_types::permission::ClusterPermission;
use pkg_types::project::{PartialObjectMetadata, Project};
use pkg_types::rbac::{ClusterRole, ClusterRoleBinding, RoleBinding};
use pkg_types::userpermission::{UserPermission, UserPermissionList};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::PermissionCache;
use crate::error::PermissionError;
use crate::project::projects_for;
use crate::roles::RoleCatalog;
use crate::synthetic::{Grant, RbacReviewer};
use crate::userpermission::{assemble, bindings_by_role};

struct Reflectors {
    permissions: Reflector<ClusterPermission>,
    roles: Reflector<ClusterRole>,
    cluster_role_bindings: Reflector<ClusterRoleBinding>,
    role_bindings: Reflector<RoleBinding>,
    clusters: Reflector<ManagedCluster>,
}

/// Read-side engine behind the virtual `Project` and `UserPermission`
/// resources. Nothing it serves is persisted; every read is computed from
/// the caches for the calling identity.
pub struct PermissionAggregator {
    permissions: Arc<PermissionCache>,
    catalog: Arc<RoleCatalog>,
    rbac: RbacReviewer,
    permission_objects: Cache<ClusterPermission>,
    changes: broadcast::Sender<()>,
    reflectors: Mutex<Option<Reflectors>>,
}

impl PermissionAggregator {
    pub fn new(store: ObjectStore) -> Self {
        let reflectors = Reflectors {
            permissions: Reflector::new(store.clone()),
            roles: Reflector::new(store.clone()),
            cluster_role_bindings: Reflector::new(store.clone()),
            role_bindings: Reflector::new(store.clone()),
            clusters: Reflector::new(store),
        };
        let rbac = RbacReviewer::new(
            reflectors.roles.cache(),
            reflectors.cluster_role_bindings.cache(),
            reflectors.role_bindings.cache(),
            reflectors.clusters.cache(),
        );
        let (changes, _) = broadcast::channel(PERMISSION_CHANGE_CAPACITY);
        Self {
            permissions: Arc::new(PermissionCache::new()),
            catalog: Arc::new(RoleCatalog::new()),
            rbac,
            permission_objects: reflectors.permissions.cache(),
            changes,
            reflectors: Mutex::new(Some(reflectors)),
        }
    }

    /// Spawn one watch task per source. Each task is the only writer of its
    /// cache. A second call starts nothing.
    pub fn start(&self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let Some(r) = self.reflectors.lock().take() else {
            return Vec::new();
        };
        info!("Starting permission aggregator");

        let permissions = self.permissions.clone();
        let on_permission = notifying(self.changes.clone(), move |e: &WatchEvent<ClusterPermission>| {
            permissions.apply(e.event_type, &e.object);
        });
        let catalog = self.catalog.clone();
        let on_role = notifying(self.changes.clone(), move |e: &WatchEvent<ClusterRole>| {
            catalog.apply(e.event_type, &e.object);
        });

        vec![
            r.permissions.spawn(on_permission, cancel.clone()),
            r.roles.spawn(on_role, cancel.clone()),
            r.cluster_role_bindings
                .spawn(notifying(self.changes.clone(), |_: &WatchEvent<_>| {}), cancel.clone()),
            r.role_bindings
                .spawn(notifying(self.changes.clone(), |_: &WatchEvent<_>| {}), cancel.clone()),
            r.clusters
                .spawn(notifying(self.changes.clone(), |_: &WatchEvent<_>| {}), cancel),
        ]
    }

    pub async fn wait_synced(&self) {
        self.permission_objects.wait_synced().await;
        self.rbac.wait_synced().await;
    }

    pub fn has_synced(&self) -> bool {
        self.permission_objects.has_synced() && self.rbac.has_synced()
    }

    fn ready(&self) -> Result<(), PermissionError> {
        if self.has_synced() {
            Ok(())
        } else {
            Err(PermissionError::NotReady)
        }
    }

    pub fn list_projects(&self, user: &UserInfo) -> Result<Vec<Project>, PermissionError> {
        self.ready()?;
        Ok(projects_for(&self.permissions.for_caller(user), user))
    }

    pub fn list_user_permissions(&self, user: &UserInfo) -> Result<UserPermissionList, PermissionError> {
        self.ready()?;
        let by_role = bindings_by_role(&self.permissions.for_caller(user), user, &self.catalog);
        let synthetic = self.rbac.synthetic_bindings(user);
        Ok(UserPermissionList::new(assemble(by_role, synthetic, &self.catalog)))
    }

    /// One role's view for the caller; `NotFound` when the caller holds no
    /// binding to it.
    pub fn get_user_permission(&self, user: &UserInfo, role: &str) -> Result<UserPermission, PermissionError> {
        self.list_user_permissions(user)?
            .items
            .into_iter()
            .find(|p| p.metadata.name == role)
            .ok_or_else(|| PermissionError::NotFound {
                kind: "UserPermission",
                name: role.to_string(),
            })
    }

    /// The synthetic grant the caller holds on `cluster`, if any.
    pub fn cluster_grant(&self, user: &UserInfo, cluster: &str) -> Result<Option<Grant>, PermissionError> {
        self.ready()?;
        Ok(self.rbac.grants(user).remove(cluster))
    }

    /// Fires after any source cache applies an event.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.changes.subscribe()
    }

    /// Stream the caller's projects: the current set as `ADDED`, then the
    /// difference after every change as `ADDED` / `DELETED`. Ends when the
    /// receiver is dropped.
    pub fn watch_projects(&self, user: UserInfo) -> ReceiverStream<WatchEvent<PartialObjectMetadata>> {
        let (tx, rx) = mpsc::channel(PERMISSION_CHANGE_CAPACITY);
        let permissions = self.permissions.clone();
        let mut changes = self.changes.subscribe();
        tokio::spawn(async move {
            let mut known: BTreeSet<Project> = BTreeSet::new();
            loop {
                let current: BTreeSet<Project> =
                    projects_for(&permissions.for_caller(&user), &user).into_iter().collect();
                let gone = known.difference(&current).map(|p| (EventType::Deleted, p));
                let appeared = current.difference(&known).map(|p| (EventType::Added, p));
                for (event_type, project) in gone.chain(appeared) {
                    let event = WatchEvent {
                        event_type,
                        object: project.to_metadata(),
                    };
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
                known = current;

                tokio::select! {
                    _ = tx.closed() => return,
                    recv = changes.recv() => match recv {
                        Ok(()) => {}
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            debug!("Project watch for {} skipped {} notifications", user.name, n)
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    },
                }
            }
        });
        ReceiverStream::new(rx)
    }
}

fn notifying<K: Resource>(
    changes: broadcast::Sender<()>,
    apply: impl Fn(&WatchEvent<K>) + Send + Sync + 'static,
) -> Arc<dyn EventHandler<K>> {
    Arc::new(move |event: &WatchEvent<K>| {
        apply(event);
        let _ = changes.send(());
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_constants::api::{ACTION_GROUP, LABEL_DISCOVERABLE, VIEW_GROUP};
    use pkg_constants::rbac::{
        ACTION_RESOURCE, MANAGED_CLUSTER_ADMIN_ROLE, MANAGED_CLUSTER_VIEW_ROLE, VIEW_RESOURCE,
    };
    use pkg_types::rbac::{PolicyRule, Subject};
    use pkg_types::userpermission::ClusterBinding;
    use serde_json::json;
    use std::time::Duration;
    use tokio_stream::StreamExt;

    async fn started(store: &ObjectStore) -> (Arc<PermissionAggregator>, CancellationToken) {
        let agg = Arc::new(PermissionAggregator::new(store.clone()));
        let cancel = CancellationToken::new();
        agg.start(cancel.clone());
        agg.wait_synced().await;
        (agg, cancel)
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

    fn discoverable(name: &str) -> ClusterRole {
        let mut role = ClusterRole::new(name, vec![PolicyRule::new(&[""], &["pods"], &["get", "list"])]);
        role.metadata
            .labels
            .insert(LABEL_DISCOVERABLE.to_string(), "true".to_string());
        role
    }

    #[tokio::test]
    async fn not_ready_before_start() {
        let store = ObjectStore::in_memory().await.unwrap();
        let agg = PermissionAggregator::new(store);
        let user = UserInfo::new("alice", &[]);
        assert_eq!(agg.list_projects(&user), Err(PermissionError::NotReady));
        assert!(agg.start(CancellationToken::new()).len() == 5);
        assert!(agg.start(CancellationToken::new()).is_empty());
    }

    #[tokio::test]
    async fn projects_for_two_roles() {
        let store = ObjectStore::in_memory().await.unwrap();
        store
            .create(ClusterPermission::new(
                "c1",
                "vm-access",
                json!({
                    "roleBindings": [{
                        "subject": {"kind": "Group", "name": "g1"},
                        "roleRef": {"name": "kubevirt.io:edit"},
                        "namespace": "proj-a"
                    }]
                }),
            ))
            .await
            .unwrap();
        store
            .create(ClusterPermission::new(
                "c2",
                "vm-admin",
                json!({
                    "clusterRoleBinding": {
                        "subject": {"kind": "User", "name": "alice"},
                        "roleRef": {"name": "kubevirt.io:admin"}
                    }
                }),
            ))
            .await
            .unwrap();

        let (agg, cancel) = started(&store).await;
        let got = agg.list_projects(&UserInfo::new("alice", &["g1"])).unwrap();
        assert_eq!(got, vec![Project::new("c1", "proj-a"), Project::new("c2", "*")]);

        assert!(agg.list_projects(&UserInfo::new("bob", &[])).unwrap().is_empty());
        cancel.cancel();
    }

    #[tokio::test]
    async fn user_permission_aggregation() {
        let store = ObjectStore::in_memory().await.unwrap();
        store.create(discoverable("viewer")).await.unwrap();
        store
            .create(ClusterPermission::new(
                "c1",
                "p",
                json!({
                    "clusterRoleBindings": [{
                        "subject": {"kind": "User", "name": "alice"},
                        "roleRef": {"name": "viewer"}
                    }]
                }),
            ))
            .await
            .unwrap();
        store
            .create(ClusterPermission::new(
                "c2",
                "p",
                json!({
                    "roleBindings": [{
                        "subject": {"kind": "Group", "name": "devs"},
                        "roleRef": {"name": "viewer"},
                        "namespace": "ns1"
                    }]
                }),
            ))
            .await
            .unwrap();

        let (agg, cancel) = started(&store).await;
        let alice = UserInfo::new("alice", &["devs"]);
        let got = agg.get_user_permission(&alice, "viewer").unwrap();
        assert_eq!(
            got.status.bindings,
            vec![
                ClusterBinding::cluster_wide("c1"),
                ClusterBinding::in_namespace("c2", "ns1"),
            ]
        );
        assert_eq!(
            got.status.cluster_role_definition.rules,
            vec![PolicyRule::new(&[""], &["pods"], &["get", "list"])]
        );

        let err = agg.get_user_permission(&alice, "editor").unwrap_err();
        assert!(err.is_not_found());
        cancel.cancel();
    }

    #[tokio::test]
    async fn synthetic_roles_follow_hub_rbac() {
        let store = ObjectStore::in_memory().await.unwrap();
        store.create(ManagedCluster::new("c1")).await.unwrap();
        store
            .create(ClusterRole::new(
                "fleet-operator",
                vec![
                    PolicyRule::new(&[ACTION_GROUP], &[ACTION_RESOURCE], &["create"]),
                    PolicyRule::new(&[VIEW_GROUP], &[VIEW_RESOURCE], &["create"]),
                ],
            ))
            .await
            .unwrap();
        let (agg, cancel) = started(&store).await;
        let alice = UserInfo::new("alice", &[]);
        assert!(agg.list_user_permissions(&alice).unwrap().items.is_empty());

        store
            .create(RoleBinding::new("c1", "ops", "fleet-operator", vec![Subject::user("alice")]))
            .await
            .unwrap();
        eventually(|| agg.get_user_permission(&alice, MANAGED_CLUSTER_ADMIN_ROLE).is_ok()).await;
        let admin = agg.get_user_permission(&alice, MANAGED_CLUSTER_ADMIN_ROLE).unwrap();
        assert_eq!(admin.status.bindings, vec![ClusterBinding::cluster_wide("c1")]);
        assert!(agg.get_user_permission(&alice, MANAGED_CLUSTER_VIEW_ROLE).is_err());
        assert_eq!(agg.cluster_grant(&alice, "c1"), Ok(Some(Grant::Admin)));
        assert_eq!(agg.cluster_grant(&alice, "c2"), Ok(None));
        cancel.cancel();
    }

    #[tokio::test]
    async fn project_watch_streams_differences() {
        let store = ObjectStore::in_memory().await.unwrap();
        let (agg, cancel) = started(&store).await;
        let mut events = agg.watch_projects(UserInfo::new("alice", &[]));

        let perm = ClusterPermission::new(
            "c1",
            "p",
            json!({
                "roleBindings": [{
                    "subject": {"kind": "User", "name": "alice"},
                    "roleRef": {"name": "kubevirt.io:view"},
                    "namespace": "proj-a"
                }]
            }),
        );
        store.create(perm).await.unwrap();

        let added = tokio::time::timeout(Duration::from_secs(5), events.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(added.event_type, EventType::Added);
        assert_eq!(added.object.metadata.name, "proj-a");
        assert_eq!(added.object.metadata.labels["cluster"], "c1");

        store
            .delete::<ClusterPermission>(Some("c1"), "p", None)
            .await
            .unwrap();
        let deleted = tokio::time::timeout(Duration::from_secs(5), events.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(deleted.event_type, EventType::Deleted);
        assert_eq!(deleted.object.metadata.name, "proj-a");
        cancel.cancel();
    }
}
