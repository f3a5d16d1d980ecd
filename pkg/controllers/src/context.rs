use pkg_client::{ClientPool, ClusterClient, ResourceMapper};
use pkg_constants::api::{ANNOTATION_USER_GROUP, ANNOTATION_USER_IDENTITY};
use pkg_constants::controller::{DEFAULT_VIEW_INTERVAL_SECS, STATUS_CONFLICT_RETRIES};
use pkg_state::ObjectStore;
use pkg_types::{ObjectMeta, Resource};
use pkg_types::cluster::ManagedCluster;
use pkg_types::identity::UserInfo;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ReconcileError, reason};

/// Dependencies shared by the dispatcher's reconcilers.
#[derive(Clone)]
pub struct Context {
    pub store: ObjectStore,
    pub pool: Arc<ClientPool>,
    pub mapper: Arc<ResourceMapper>,
    /// Forward the requesting user recorded in annotations to target clusters.
    pub impersonation: bool,
    pub view_interval: Duration,
}

impl Context {
    pub fn new(store: ObjectStore, pool: Arc<ClientPool>) -> Self {
        Self {
            store,
            pool,
            mapper: Arc::new(ResourceMapper::default()),
            impersonation: false,
            view_interval: Duration::from_secs(DEFAULT_VIEW_INTERVAL_SECS),
        }
    }

    pub fn with_impersonation(mut self, enabled: bool) -> Self {
        self.impersonation = enabled;
        self
    }

    pub fn with_view_interval(mut self, interval: Duration) -> Self {
        self.view_interval = interval;
        self
    }

    /// The ManagedCluster named like `namespace`, if there is one.
    pub async fn cluster(&self, namespace: &str) -> Result<Option<ManagedCluster>, ReconcileError> {
        match self.store.get::<ManagedCluster>(None, namespace).await {
            Ok(cluster) => Ok(Some(cluster)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Apply `mutate` to a copy of `obj` and write its status, re-reading and
    /// reapplying when another writer got there first. `None` means the
    /// object is gone.
    pub async fn write_status<K, F>(&self, mut obj: K, mutate: F) -> Result<Option<K>, ReconcileError>
    where
        K: Resource,
        F: Fn(&mut K) + Send + Sync,
    {
        for _ in 0..STATUS_CONFLICT_RETRIES {
            let mut next = obj.clone();
            mutate(&mut next);
            match self.store.update_status(next).await {
                Ok(written) => return Ok(Some(written)),
                Err(e) if e.is_conflict() => {
                    let key = obj.key();
                    obj = match self.store.get::<K>(key.namespace(), &key.name).await {
                        Ok(latest) => latest,
                        Err(e) if e.is_not_found() => return Ok(None),
                        Err(e) => return Err(e.into()),
                    };
                }
                Err(e) if e.is_not_found() => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }
        Err(ReconcileError::conflict(format!(
            "status of {} {} kept changing underneath",
            K::KIND,
            obj.key()
        )))
    }

    pub fn client(
        &self,
        cluster: &ManagedCluster,
        meta: &ObjectMeta,
    ) -> Result<Arc<dyn ClusterClient>, ReconcileError> {
        let user = if self.impersonation {
            impersonated_user(meta)
        } else {
            None
        };
        self.pool
            .client_for(cluster, user.as_ref())
            .map_err(|e| ReconcileError::from_cluster(&e, reason::TRANSPORT))
    }
}

/// The user recorded on an object by the hub API at creation time.
pub fn impersonated_user(meta: &ObjectMeta) -> Option<UserInfo> {
    let name = meta
        .annotations
        .get(ANNOTATION_USER_IDENTITY)
        .and_then(|v| pkg_types::bytes::decode_str(v))
        .filter(|n| !n.is_empty())?;
    let groups = meta
        .annotations
        .get(ANNOTATION_USER_GROUP)
        .and_then(|v| pkg_types::bytes::decode_str(v))
        .map(|g| {
            g.split(',')
                .map(str::trim)
                .filter(|g| !g.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();
    Some(UserInfo { name, groups })
}
