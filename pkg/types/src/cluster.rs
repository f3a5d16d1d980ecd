use pkg_constants::api::{CLUSTER_GROUP, CLUSTER_VERSION};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::condition::Condition;
use crate::meta::{ObjectMeta, TypeMeta};

/// A remote cluster enrolled with the hub. Its name is also the hub
/// namespace holding every per-cluster object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedCluster {
    #[serde(flatten)]
    pub type_meta: TypeMeta,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ManagedClusterSpec,
    #[serde(default)]
    pub status: ManagedClusterStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterSpec {
    #[serde(default)]
    pub hub_accepts_client: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub client_configs: Vec<ClientConfig>,
}

/// How the hub reaches the cluster's API server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    pub url: String,
    #[serde(default, with = "crate::bytes", skip_serializing_if = "Vec::is_empty")]
    pub ca_bundle: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub capacity: BTreeMap<String, String>,
}

crate::impl_resource!(
    ManagedCluster,
    "ManagedCluster",
    CLUSTER_GROUP,
    CLUSTER_VERSION,
    "managedclusters",
    namespaced = false,
    status
);

impl ManagedCluster {
    pub fn new(name: &str) -> Self {
        Self {
            type_meta: TypeMeta::of::<Self>(),
            metadata: ObjectMeta::named(name),
            ..Default::default()
        }
    }

    /// URL of the first client config, if the cluster advertises one.
    pub fn api_url(&self) -> Option<&str> {
        self.spec.client_configs.first().map(|c| c.url.as_str())
    }
}
