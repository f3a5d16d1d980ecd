use chrono::{DateTime, Utc};
use pkg_constants::api::{VIEW_GROUP, VIEW_VERSION};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::condition::Condition;
use crate::meta::{ObjectMeta, TypeMeta};

/// A continuously refreshed snapshot of one object on a managed cluster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterView {
    #[serde(flatten)]
    pub type_meta: TypeMeta,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ViewSpec,
    #[serde(default)]
    pub status: ViewStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewSpec {
    #[serde(default)]
    pub scope: ViewScope,
}

/// The viewed object, addressed either by `resource` or by group/version/kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewScope {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_group: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<DateTime<Utc>>,
}

crate::impl_resource!(
    ManagedClusterView,
    "ManagedClusterView",
    VIEW_GROUP,
    VIEW_VERSION,
    "managedclusterviews",
    namespaced = true,
    status
);

impl ManagedClusterView {
    pub fn new(namespace: &str, name: &str, scope: ViewScope) -> Self {
        Self {
            type_meta: TypeMeta::of::<Self>(),
            metadata: ObjectMeta::namespaced(namespace, name),
            spec: ViewSpec { scope },
            status: ViewStatus::default(),
        }
    }
}
