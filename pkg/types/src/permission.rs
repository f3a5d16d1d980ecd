use pkg_constants::api::{PERMISSION_GROUP, PERMISSION_VERSION};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::condition::Condition;
use crate::meta::{ObjectMeta, TypeMeta};

/// Permissions granted on the cluster named by the object's namespace.
///
/// The spec stays untyped: `clusterRoleBinding`, `clusterRoleBindings` and
/// `roleBindings` each carry either `subject` or `subjects`, and readers go
/// through field-path helpers rather than a fixed schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPermission {
    #[serde(flatten)]
    pub type_meta: TypeMeta,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: Value,
    #[serde(default)]
    pub status: ClusterPermissionStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPermissionStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

crate::impl_resource!(
    ClusterPermission,
    "ClusterPermission",
    PERMISSION_GROUP,
    PERMISSION_VERSION,
    "clusterpermissions",
    namespaced = true,
    status
);

impl ClusterPermission {
    pub fn new(namespace: &str, name: &str, spec: Value) -> Self {
        Self {
            type_meta: TypeMeta::of::<Self>(),
            metadata: ObjectMeta::namespaced(namespace, name),
            spec,
            status: ClusterPermissionStatus::default(),
        }
    }
}
