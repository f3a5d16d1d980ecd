use slatedb::Db;
use slatedb::object_store::ObjectStore as BlobStore;
use slatedb::object_store::local::LocalFileSystem;
use slatedb::object_store::memory::InMemory;
use slatedb::object_store::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::error::StoreError;

/// Raw key/value store backed by SlateDB.
/// Locally it sits on the filesystem; tests run it over an in-memory blob store.
#[derive(Clone)]
pub struct StateStore {
    db: Db,
}

impl StateStore {
    /// Open (or create) a state store rooted at `path` on the local filesystem.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        info!("Opening SlateDB state store at {}", path);

        std::fs::create_dir_all(path).map_err(|e| {
            StoreError::Backend(format!("failed to create data directory {}: {}", path, e))
        })?;

        let blobs = LocalFileSystem::new_with_prefix(path)
            .map_err(|e| StoreError::Backend(format!("failed to create local object store: {}", e)))?;
        Self::open(Arc::new(blobs)).await
    }

    /// Open a throwaway store kept entirely in memory.
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::open(Arc::new(InMemory::new())).await
    }

    async fn open(blobs: Arc<dyn BlobStore>) -> Result<Self, StoreError> {
        let db = Db::open(Path::from("/"), blobs)
            .await
            .map_err(|e| StoreError::Backend(format!("failed to open SlateDB: {}", e)))?;
        Ok(Self { db })
    }

    pub async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.db
            .put(key.as_bytes(), value)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::Backend(format!("SlateDB put failed: {}", e)))
    }

    /// Retrieve the value for a key, or `None` if it does not exist.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match self.db.get(key.as_bytes()).await {
            Ok(Some(bytes)) => Ok(Some(bytes.to_vec())),
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Backend(format!("SlateDB get failed: {}", e))),
        }
    }

    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.db
            .delete(key.as_bytes())
            .await
            .map(|_| ())
            .map_err(|e| StoreError::Backend(format!("SlateDB delete failed: {}", e)))
    }

    /// List all key-value pairs whose keys start with `prefix`, in key order.
    pub async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let mut results = Vec::new();
        let mut iter = self
            .db
            .scan_prefix(prefix.as_bytes())
            .await
            .map_err(|e| StoreError::Backend(format!("SlateDB scan_prefix failed: {}", e)))?;

        loop {
            match iter.next().await {
                Ok(Some(kv)) => {
                    let key = String::from_utf8_lossy(&kv.key).to_string();
                    results.push((key, kv.value.to_vec()));
                }
                Ok(None) => break,
                Err(e) => {
                    return Err(StoreError::Backend(format!("SlateDB scan failed: {}", e)));
                }
            }
        }
        Ok(results)
    }

    /// Gracefully close the state store.
    pub async fn close(self) -> Result<(), StoreError> {
        info!("Closing SlateDB state store");
        self.db
            .close()
            .await
            .map_err(|e| StoreError::Backend(format!("SlateDB close failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn prefix_scan_is_ordered_and_bounded() {
        let kv = StateStore::in_memory().await.unwrap();
        kv.put("/registry/clusterroles/b", b"2").await.unwrap();
        kv.put("/registry/clusterroles/a", b"1").await.unwrap();
        kv.put("/registry/clusterrolebindings/x", b"3").await.unwrap();

        let roles = kv.list_prefix("/registry/clusterroles/").await.unwrap();
        let keys: Vec<_> = roles.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["/registry/clusterroles/a", "/registry/clusterroles/b"]);

        kv.delete("/registry/clusterroles/a").await.unwrap();
        assert!(kv.get("/registry/clusterroles/a").await.unwrap().is_none());
    }
}
