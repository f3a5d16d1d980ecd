use chrono::{DateTime, Utc};
use pkg_constants::api::{INTERNAL_GROUP, INTERNAL_VERSION};
use serde::{Deserialize, Serialize};

use crate::condition::Condition;
use crate::meta::{ObjectMeta, TypeMeta};

/// Per-cluster companion of a `ManagedCluster`, living in the cluster
/// namespace under the cluster's own name.
///
/// `spec.logging_ca` is the authoritative client-CA bundle the cluster's
/// agent trusts for hub requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInfo {
    #[serde(flatten)]
    pub type_meta: TypeMeta,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ClusterInfoSpec,
    #[serde(default)]
    pub status: ClusterInfoStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInfoSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub master_endpoint: String,
    #[serde(
        default,
        rename = "loggingCA",
        with = "crate::bytes",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub logging_ca: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInfoStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    /// Base URL of the agent log server, reported by the agent.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub logging_endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_report_time: Option<DateTime<Utc>>,
}

crate::impl_resource!(
    ClusterInfo,
    "ClusterInfo",
    INTERNAL_GROUP,
    INTERNAL_VERSION,
    "clusterinfos",
    namespaced = true,
    status
);

impl ClusterInfo {
    pub fn new(cluster: &str) -> Self {
        Self {
            type_meta: TypeMeta::of::<Self>(),
            metadata: ObjectMeta::namespaced(cluster, cluster),
            ..Default::default()
        }
    }
}
