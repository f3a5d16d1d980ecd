use pkg_constants::api::{RBAC_GROUP, RBAC_VERSION};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::meta::{ObjectMeta, TypeMeta};

// --- Policy rules ---

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRule {
    /// API groups this rule applies to ("" for core, "*" for all)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub api_groups: Vec<String>,
    /// Resource types ("pods", "managedclusteractions", "*" for all)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,
    /// Allowed verbs ("get", "create", "*" for all)
    #[serde(default)]
    pub verbs: Vec<String>,
}

impl PolicyRule {
    pub fn new(api_groups: &[&str], resources: &[&str], verbs: &[&str]) -> Self {
        let owned = |v: &[&str]| v.iter().map(|s| s.to_string()).collect();
        Self {
            api_groups: owned(api_groups),
            resources: owned(resources),
            verbs: owned(verbs),
        }
    }

    /// Whether this rule allows `verb` on `group/resource`.
    pub fn allows(&self, verb: &str, group: &str, resource: &str) -> bool {
        let matches = |list: &[String], want: &str| list.iter().any(|v| v == "*" || v == want);
        matches(&self.verbs, verb)
            && matches(&self.api_groups, group)
            && matches(&self.resources, resource)
    }
}

// --- ClusterRole ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRole {
    #[serde(flatten)]
    pub type_meta: TypeMeta,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

crate::impl_resource!(
    ClusterRole,
    "ClusterRole",
    RBAC_GROUP,
    RBAC_VERSION,
    "clusterroles",
    namespaced = false
);

impl ClusterRole {
    pub fn new(name: &str, rules: Vec<PolicyRule>) -> Self {
        Self {
            type_meta: TypeMeta::of::<Self>(),
            metadata: ObjectMeta::named(name),
            rules,
        }
    }

    pub fn allows(&self, verb: &str, group: &str, resource: &str) -> bool {
        self.rules.iter().any(|r| r.allows(verb, group, resource))
    }
}

// --- Subject ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SubjectKind {
    User,
    Group,
    ServiceAccount,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::User => "User",
            SubjectKind::Group => "Group",
            SubjectKind::ServiceAccount => "ServiceAccount",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "User" => Some(SubjectKind::User),
            "Group" => Some(SubjectKind::Group),
            "ServiceAccount" => Some(SubjectKind::ServiceAccount),
            _ => None,
        }
    }
}

impl fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub kind: SubjectKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl Subject {
    pub fn user(name: &str) -> Self {
        Self {
            kind: SubjectKind::User,
            name: name.to_string(),
            namespace: None,
        }
    }

    pub fn group(name: &str) -> Self {
        Self {
            kind: SubjectKind::Group,
            name: name.to_string(),
            namespace: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleRef {
    #[serde(default)]
    pub api_group: String,
    #[serde(default)]
    pub kind: String,
    pub name: String,
}

impl RoleRef {
    pub fn cluster_role(name: &str) -> Self {
        Self {
            api_group: RBAC_GROUP.to_string(),
            kind: "ClusterRole".to_string(),
            name: name.to_string(),
        }
    }
}

// --- Bindings ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRoleBinding {
    #[serde(flatten)]
    pub type_meta: TypeMeta,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub subjects: Vec<Subject>,
    pub role_ref: RoleRef,
}

crate::impl_resource!(
    ClusterRoleBinding,
    "ClusterRoleBinding",
    RBAC_GROUP,
    RBAC_VERSION,
    "clusterrolebindings",
    namespaced = false
);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleBinding {
    #[serde(flatten)]
    pub type_meta: TypeMeta,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub subjects: Vec<Subject>,
    pub role_ref: RoleRef,
}

crate::impl_resource!(
    RoleBinding,
    "RoleBinding",
    RBAC_GROUP,
    RBAC_VERSION,
    "rolebindings",
    namespaced = true
);

impl ClusterRoleBinding {
    pub fn new(name: &str, role: &str, subjects: Vec<Subject>) -> Self {
        Self {
            type_meta: TypeMeta::of::<Self>(),
            metadata: ObjectMeta::named(name),
            subjects,
            role_ref: RoleRef::cluster_role(role),
        }
    }
}

impl RoleBinding {
    pub fn new(namespace: &str, name: &str, role: &str, subjects: Vec<Subject>) -> Self {
        Self {
            type_meta: TypeMeta::of::<Self>(),
            metadata: ObjectMeta::namespaced(namespace, name),
            subjects,
            role_ref: RoleRef::cluster_role(role),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_wildcards() {
        let rule = PolicyRule::new(&["action.mcf.io"], &["*"], &["create"]);
        assert!(rule.allows("create", "action.mcf.io", "managedclusteractions"));
        assert!(!rule.allows("get", "action.mcf.io", "managedclusteractions"));
        assert!(!rule.allows("create", "view.mcf.io", "managedclusterviews"));

        let admin = PolicyRule::new(&["*"], &["*"], &["*"]);
        assert!(admin.allows("delete", "", "pods"));
    }

    #[test]
    fn subject_kind_parse() {
        assert_eq!(SubjectKind::parse("Group"), Some(SubjectKind::Group));
        assert_eq!(SubjectKind::parse("group"), None);
    }
}
