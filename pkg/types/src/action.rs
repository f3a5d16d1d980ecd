use pkg_constants::api::{ACTION_GROUP, ACTION_VERSION};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::condition::Condition;
use crate::meta::{ObjectMeta, TypeMeta};

/// A point-in-time request to create, replace or delete one object on the
/// cluster named by the action's namespace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterAction {
    #[serde(flatten)]
    pub type_meta: TypeMeta,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ActionSpec,
    #[serde(default)]
    pub status: ActionStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionSpec {
    #[serde(default)]
    pub action_type: ActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube: Option<KubeWorkSpec>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
    Create,
    Update,
    Delete,
    /// Missing or anything else a client wrote; rejected at reconcile time.
    #[default]
    #[serde(other)]
    Unknown,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionType::Create => "Create",
            ActionType::Update => "Update",
            ActionType::Delete => "Delete",
            ActionType::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Target of an action on the managed cluster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeWorkSpec {
    /// Resource type, e.g. `deployment`, `deployments` or `deployments.apps`.
    #[serde(default)]
    pub resource: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    /// Opaque response of the target cluster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

crate::impl_resource!(
    ClusterAction,
    "ClusterAction",
    ACTION_GROUP,
    ACTION_VERSION,
    "clusteractions",
    namespaced = true,
    status
);

impl ClusterAction {
    pub fn new(namespace: &str, name: &str, action_type: ActionType, kube: KubeWorkSpec) -> Self {
        Self {
            type_meta: TypeMeta::of::<Self>(),
            metadata: ObjectMeta::namespaced(namespace, name),
            spec: ActionSpec {
                action_type,
                kube: Some(kube),
            },
            status: ActionStatus::default(),
        }
    }
}
