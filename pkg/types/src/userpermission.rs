use pkg_constants::api::{CLUSTERVIEW_GROUP, USERPERMISSION_VERSION};
use serde::{Deserialize, Serialize};

use crate::meta::{ListMeta, ObjectMeta, TypeMeta};
use crate::rbac::PolicyRule;

/// Virtual, per-caller view of one ClusterRole: where across the fleet the
/// caller is bound to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPermission {
    #[serde(flatten)]
    pub type_meta: TypeMeta,
    pub metadata: ObjectMeta,
    pub status: UserPermissionStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPermissionStatus {
    pub bindings: Vec<ClusterBinding>,
    pub cluster_role_definition: ClusterRoleDefinition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BindingScope {
    Cluster,
    Namespace,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterBinding {
    pub cluster: String,
    pub scope: BindingScope,
    pub namespaces: Vec<String>,
}

impl ClusterBinding {
    pub fn cluster_wide(cluster: &str) -> Self {
        Self {
            cluster: cluster.to_string(),
            scope: BindingScope::Cluster,
            namespaces: vec!["*".to_string()],
        }
    }

    pub fn in_namespace(cluster: &str, namespace: &str) -> Self {
        Self {
            cluster: cluster.to_string(),
            scope: BindingScope::Namespace,
            namespaces: vec![namespace.to_string()],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterRoleDefinition {
    pub rules: Vec<PolicyRule>,
}

impl UserPermission {
    pub fn new(role: &str, bindings: Vec<ClusterBinding>, rules: Vec<PolicyRule>) -> Self {
        Self {
            type_meta: userpermission_type_meta("UserPermission"),
            metadata: ObjectMeta::named(role),
            status: UserPermissionStatus {
                bindings,
                cluster_role_definition: ClusterRoleDefinition { rules },
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPermissionList {
    #[serde(flatten)]
    pub type_meta: TypeMeta,
    #[serde(default)]
    pub metadata: ListMeta,
    pub items: Vec<UserPermission>,
}

impl UserPermissionList {
    pub fn new(items: Vec<UserPermission>) -> Self {
        Self {
            type_meta: userpermission_type_meta("UserPermissionList"),
            metadata: ListMeta::default(),
            items,
        }
    }
}

fn userpermission_type_meta(kind: &str) -> TypeMeta {
    TypeMeta {
        api_version: format!("{}/{}", CLUSTERVIEW_GROUP, USERPERMISSION_VERSION),
        kind: kind.to_string(),
    }
}
