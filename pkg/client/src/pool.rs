use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

use pkg_types::cluster::ManagedCluster;
use pkg_types::identity::UserInfo;

use crate::client::ClusterClient;
use crate::error::ClusterError;

/// What a client authenticates as: the cluster's bearer token, optionally
/// impersonating the user who asked for the work.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Credential {
    pub token: Option<String>,
    pub impersonate: Option<UserInfo>,
}

pub trait ClientFactory: Send + Sync {
    fn build(
        &self,
        cluster: &ManagedCluster,
        credential: &Credential,
    ) -> Result<Arc<dyn ClusterClient>, ClusterError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PoolKey {
    cluster: String,
    url: String,
    credential: Credential,
}

/// Caches one client per cluster, endpoint and credential. A changed
/// endpoint produces a fresh client; `evict` drops everything for a cluster.
pub struct ClientPool {
    factory: Arc<dyn ClientFactory>,
    tokens: BTreeMap<String, String>,
    clients: Mutex<HashMap<PoolKey, Arc<dyn ClusterClient>>>,
}

impl ClientPool {
    pub fn new(factory: Arc<dyn ClientFactory>, tokens: BTreeMap<String, String>) -> Self {
        Self {
            factory,
            tokens,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn client_for(
        &self,
        cluster: &ManagedCluster,
        impersonate: Option<&UserInfo>,
    ) -> Result<Arc<dyn ClusterClient>, ClusterError> {
        let name = &cluster.metadata.name;
        let key = PoolKey {
            cluster: name.clone(),
            url: cluster.api_url().unwrap_or_default().to_string(),
            credential: Credential {
                token: self.tokens.get(name).cloned(),
                impersonate: impersonate.cloned(),
            },
        };

        let mut clients = self.clients.lock();
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }
        clients.retain(|k, _| k.cluster != key.cluster || k.url == key.url);
        let client = self.factory.build(cluster, &key.credential)?;
        debug!("Built client for cluster {} at {}", name, key.url);
        clients.insert(key, client.clone());
        Ok(client)
    }

    pub fn evict(&self, cluster: &str) {
        self.clients.lock().retain(|k, _| k.cluster != cluster);
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
