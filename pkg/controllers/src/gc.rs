use pkg_state::{ObjectStore, StoreError};
use pkg_types::Resource;
use pkg_types::action::ClusterAction;
use pkg_types::clusterinfo::ClusterInfo;
use pkg_types::namespace::Namespace;
use pkg_types::permission::ClusterPermission;
use pkg_types::view::ManagedClusterView;
use tracing::info;

/// Delete every per-cluster object in `namespace`, then the namespace.
/// Returns how many objects were removed.
pub async fn collect_cluster_namespace(store: &ObjectStore, namespace: &str) -> Result<usize, StoreError> {
    let mut removed = 0;
    removed += delete_all::<ClusterAction>(store, namespace).await?;
    removed += delete_all::<ManagedClusterView>(store, namespace).await?;
    removed += delete_all::<ClusterPermission>(store, namespace).await?;
    removed += delete_all::<ClusterInfo>(store, namespace).await?;
    match store.delete::<Namespace>(None, namespace, None).await {
        Ok(_) => removed += 1,
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
    }
    if removed > 0 {
        info!("Collected {} objects of deleted cluster {}", removed, namespace);
    }
    Ok(removed)
}

async fn delete_all<K: Resource>(store: &ObjectStore, namespace: &str) -> Result<usize, StoreError> {
    let (items, _) = store.list::<K>(Some(namespace), None).await?;
    let mut removed = 0;
    for item in items {
        match store.delete::<K>(Some(namespace), &item.meta().name, None).await {
            Ok(_) => removed += 1,
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
    }
    Ok(removed)
}
