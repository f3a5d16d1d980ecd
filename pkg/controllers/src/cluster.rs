use async_trait::async_trait;
use pkg_constants::api::CONDITION_CLUSTER_INFO_SYNCED;
use pkg_types::ObjectKey;
use pkg_types::cluster::ManagedCluster;
use pkg_types::clusterinfo::{ClusterInfo, ClusterInfoSpec};
use pkg_types::condition::{Condition, ConditionStatus, set_condition};
use pkg_types::namespace::Namespace;
use tracing::info;

use crate::context::Context;
use crate::error::{ReconcileError, reason};
use crate::gc::collect_cluster_namespace;
use crate::runtime::{Reconciler, Requeue};

/// Maintains the cluster namespace and the `ClusterInfo` beside every
/// accepted `ManagedCluster`, publishing the hub CA as the agent's logging
/// CA. Deleting the cluster collects its namespace.
pub struct ClusterInfoReconciler {
    ctx: Context,
    logging_ca: Vec<u8>,
}

impl ClusterInfoReconciler {
    pub fn new(ctx: Context, logging_ca: Vec<u8>) -> Self {
        Self { ctx, logging_ca }
    }

    async fn ensure_namespace(&self, name: &str) -> Result<(), ReconcileError> {
        match self.ctx.store.create(Namespace::new(name)).await {
            Ok(_) => {
                info!("Created namespace for cluster {}", name);
                Ok(())
            }
            Err(e) if matches!(e, pkg_state::StoreError::AlreadyExists { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn ensure_cluster_info(&self, cluster: &ManagedCluster) -> Result<ClusterInfo, ReconcileError> {
        let name = &cluster.metadata.name;
        let desired = ClusterInfoSpec {
            master_endpoint: cluster.api_url().unwrap_or_default().to_string(),
            logging_ca: self.logging_ca.clone(),
        };
        match self.ctx.store.get::<ClusterInfo>(Some(name), name).await {
            Ok(info) if info.spec == desired => Ok(info),
            Ok(mut info) => {
                info.spec = desired;
                Ok(self.ctx.store.update(info).await?)
            }
            Err(e) if e.is_not_found() => {
                let mut info = ClusterInfo::new(name);
                info.spec = desired;
                let info = self.ctx.store.create(info).await?;
                info!("Created ClusterInfo for cluster {}", name);
                Ok(info)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl ClusterInfoReconciler {
    /// A cluster that is no longer accepted loses its `ClusterInfo`, so its
    /// agent stops being handed the hub CA.
    async fn remove_cluster_info(&self, name: &str) -> Result<(), ReconcileError> {
        match self.ctx.store.delete::<ClusterInfo>(Some(name), name, None).await {
            Ok(_) => {
                info!("Removed ClusterInfo of cluster {} after it was no longer accepted", name);
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Reconciler for ClusterInfoReconciler {
    type Object = ManagedCluster;

    fn name(&self) -> &'static str {
        "ClusterInfoController"
    }

    async fn reconcile(&self, key: &ObjectKey, _attempt: u32) -> Result<Requeue, ReconcileError> {
        let name = key.name.as_str();
        let cluster = match self.ctx.store.get::<ManagedCluster>(None, name).await {
            Ok(cluster) => cluster,
            Err(e) if e.is_not_found() => {
                collect_cluster_namespace(&self.ctx.store, name).await?;
                self.ctx.pool.evict(name);
                return Ok(Requeue::Done);
            }
            Err(e) => return Err(e.into()),
        };
        if !cluster.spec.hub_accepts_client {
            self.remove_cluster_info(name).await?;
            return Ok(Requeue::Done);
        }

        self.ensure_namespace(name).await?;
        let info = self.ensure_cluster_info(&cluster).await?;
        self.ctx
            .write_status(info, |i: &mut ClusterInfo| {
                set_condition(
                    &mut i.status.conditions,
                    Condition::new(CONDITION_CLUSTER_INFO_SYNCED, ConditionStatus::True, reason::SYNCED, ""),
                );
            })
            .await?;
        Ok(Requeue::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{CLUSTER, setup};
    use pkg_types::action::{ActionType, ClusterAction, KubeWorkSpec};
    use pkg_types::condition::is_condition_true;

    const CA: &[u8] = b"-----BEGIN CERTIFICATE-----\nhub\n-----END CERTIFICATE-----\n";

    #[tokio::test]
    async fn publishes_hub_ca_for_accepted_clusters() {
        let (ctx, _, _) = setup().await;
        let r = ClusterInfoReconciler::new(ctx.clone(), CA.to_vec());
        let key = ObjectKey::new(None, CLUSTER);
        assert_eq!(r.reconcile(&key, 0).await.unwrap(), Requeue::Done);

        ctx.store.get::<Namespace>(None, CLUSTER).await.unwrap();
        let info = ctx.store.get::<ClusterInfo>(Some(CLUSTER), CLUSTER).await.unwrap();
        assert_eq!(info.spec.logging_ca, CA);
        assert_eq!(info.spec.master_endpoint, "https://cluster1:6443");
        assert!(is_condition_true(&info.status.conditions, CONDITION_CLUSTER_INFO_SYNCED));

        // Converged: a second pass changes nothing.
        r.reconcile(&key, 0).await.unwrap();
        let again = ctx.store.get::<ClusterInfo>(Some(CLUSTER), CLUSTER).await.unwrap();
        assert_eq!(again.metadata.resource_version, info.metadata.resource_version);
    }

    #[tokio::test]
    async fn follows_endpoint_changes() {
        let (ctx, _, _) = setup().await;
        let r = ClusterInfoReconciler::new(ctx.clone(), CA.to_vec());
        let key = ObjectKey::new(None, CLUSTER);
        r.reconcile(&key, 0).await.unwrap();

        let mut cluster = ctx.store.get::<ManagedCluster>(None, CLUSTER).await.unwrap();
        cluster.spec.client_configs[0].url = "https://moved:6443".into();
        ctx.store.update(cluster).await.unwrap();
        r.reconcile(&key, 0).await.unwrap();
        let info = ctx.store.get::<ClusterInfo>(Some(CLUSTER), CLUSTER).await.unwrap();
        assert_eq!(info.spec.master_endpoint, "https://moved:6443");
    }

    #[tokio::test]
    async fn skips_clusters_not_accepted() {
        let (ctx, _, _) = setup().await;
        let mut pending = ManagedCluster::new("pending");
        pending.spec.hub_accepts_client = false;
        ctx.store.create(pending).await.unwrap();
        let r = ClusterInfoReconciler::new(ctx.clone(), CA.to_vec());
        r.reconcile(&ObjectKey::new(None, "pending"), 0).await.unwrap();
        assert!(ctx.store.get::<ClusterInfo>(Some("pending"), "pending").await.is_err());
    }

    #[tokio::test]
    async fn revoking_acceptance_removes_cluster_info() {
        let (ctx, _, _) = setup().await;
        let r = ClusterInfoReconciler::new(ctx.clone(), CA.to_vec());
        let key = ObjectKey::new(None, CLUSTER);
        r.reconcile(&key, 0).await.unwrap();
        ctx.store.get::<ClusterInfo>(Some(CLUSTER), CLUSTER).await.unwrap();

        let mut cluster = ctx.store.get::<ManagedCluster>(None, CLUSTER).await.unwrap();
        cluster.spec.hub_accepts_client = false;
        ctx.store.update(cluster).await.unwrap();
        assert_eq!(r.reconcile(&key, 0).await.unwrap(), Requeue::Done);
        assert!(ctx.store.get::<ClusterInfo>(Some(CLUSTER), CLUSTER).await.is_err());
        // the namespace and its other objects stay until the cluster is deleted
        ctx.store.get::<Namespace>(None, CLUSTER).await.unwrap();

        // accepting again restores it
        let mut cluster = ctx.store.get::<ManagedCluster>(None, CLUSTER).await.unwrap();
        cluster.spec.hub_accepts_client = true;
        ctx.store.update(cluster).await.unwrap();
        r.reconcile(&key, 0).await.unwrap();
        let info = ctx.store.get::<ClusterInfo>(Some(CLUSTER), CLUSTER).await.unwrap();
        assert_eq!(info.spec.logging_ca, CA);
    }

    #[tokio::test]
    async fn deleting_the_cluster_cascades() {
        let (ctx, _, _) = setup().await;
        let r = ClusterInfoReconciler::new(ctx.clone(), CA.to_vec());
        let key = ObjectKey::new(None, CLUSTER);
        r.reconcile(&key, 0).await.unwrap();
        ctx.store
            .create(ClusterAction::new(CLUSTER, "a", ActionType::Create, KubeWorkSpec::default()))
            .await
            .unwrap();

        ctx.store.delete::<ManagedCluster>(None, CLUSTER, None).await.unwrap();
        r.reconcile(&key, 0).await.unwrap();
        assert!(ctx.store.get::<ClusterAction>(Some(CLUSTER), "a").await.is_err());
        assert!(ctx.store.get::<ClusterInfo>(Some(CLUSTER), CLUSTER).await.is_err());
        assert!(ctx.store.get::<Namespace>(None, CLUSTER).await.is_err());
    }
}
