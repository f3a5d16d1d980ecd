//! Field-path access to the untyped `ClusterPermission` spec.
//!
//! A spec may carry a singular `clusterRoleBinding` map, a plural
//! `clusterRoleBindings` list and a `roleBindings` list. Every binding names
//! its role under `roleRef.name` and its subjects under either `subjects`
//! (preferred) or `subject`. Role bindings additionally carry the target
//! `namespace` on the managed cluster.

use pkg_types::identity::UserInfo;
use pkg_types::rbac::{Subject, SubjectKind};
use pkg_types::permission::ClusterPermission;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("{path}: not found")]
    Missing { path: String },
    #[error("{path}: expected {expected}")]
    WrongType { path: String, expected: &'static str },
    #[error("{path}: unknown subject kind {kind:?}")]
    UnknownKind { path: String, kind: String },
}

/// Where on the managed cluster a binding applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingTarget {
    Cluster,
    Namespace(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionBinding {
    pub target: BindingTarget,
    pub role: String,
    pub subjects: Vec<Subject>,
}

impl PermissionBinding {
    pub fn is_cluster_wide(&self) -> bool {
        self.target == BindingTarget::Cluster
    }

    /// Whether any subject names the caller, directly or through a group.
    pub fn binds(&self, user: &UserInfo) -> bool {
        self.subjects.iter().any(|s| is_bound(s, user))
    }
}

/// `User` subjects match by name and `Group` subjects by membership.
/// Other kinds never match a caller.
pub fn is_bound(subject: &Subject, user: &UserInfo) -> bool {
    match subject.kind {
        SubjectKind::User => subject.name == user.name,
        SubjectKind::Group => user.in_group(&subject.name),
        SubjectKind::ServiceAccount => false,
    }
}

pub fn nested<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |v, field| v.as_object()?.get(*field))
}

pub fn nested_str<'a>(value: &'a Value, path: &[&str]) -> Result<&'a str, FieldError> {
    match nested(value, path) {
        None | Some(Value::Null) => Err(FieldError::Missing { path: path.join(".") }),
        Some(v) => v.as_str().ok_or_else(|| FieldError::WrongType {
            path: path.join("."),
            expected: "string",
        }),
    }
}

/// `Ok(None)` when the field is absent; a present non-list is an error.
pub fn nested_slice<'a>(value: &'a Value, path: &[&str]) -> Result<Option<&'a [Value]>, FieldError> {
    match nested(value, path) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => Ok(Some(items.as_slice())),
        Some(_) => Err(FieldError::WrongType {
            path: path.join("."),
            expected: "list",
        }),
    }
}

/// Subjects of one binding. `subjects` wins over `subject`; a binding with
/// neither is an error.
pub fn subjects(binding: &Value) -> Result<Vec<Subject>, FieldError> {
    if let Some(list) = nested_slice(binding, &["subjects"])? {
        return list
            .iter()
            .enumerate()
            .map(|(i, s)| subject(s, &format!("subjects[{}]", i)))
            .collect();
    }
    match nested(binding, &["subject"]) {
        None | Some(Value::Null) => Err(FieldError::Missing {
            path: "subject".to_string(),
        }),
        Some(s) => Ok(vec![subject(s, "subject")?]),
    }
}

fn subject(value: &Value, path: &str) -> Result<Subject, FieldError> {
    let at = |field: &str| format!("{}.{}", path, field);
    let kind = nested_str(value, &["kind"]).map_err(|_| FieldError::Missing { path: at("kind") })?;
    let name = nested_str(value, &["name"]).map_err(|_| FieldError::Missing { path: at("name") })?;
    let kind = SubjectKind::parse(kind).ok_or_else(|| FieldError::UnknownKind {
        path: at("kind"),
        kind: kind.to_string(),
    })?;
    Ok(Subject {
        kind,
        name: name.to_string(),
        namespace: nested_str(value, &["namespace"]).ok().map(str::to_string),
    })
}

pub fn role_ref_name(binding: &Value) -> Result<&str, FieldError> {
    nested_str(binding, &["roleRef", "name"])
}

fn parse_binding(value: &Value, namespaced: bool) -> Result<PermissionBinding, FieldError> {
    let role = role_ref_name(value)?.to_string();
    let target = if namespaced {
        BindingTarget::Namespace(nested_str(value, &["namespace"])?.to_string())
    } else {
        BindingTarget::Cluster
    };
    Ok(PermissionBinding {
        target,
        role,
        subjects: subjects(value)?,
    })
}

/// Every well-formed binding of a spec, in field order: singular
/// `clusterRoleBinding`, then `clusterRoleBindings[]`, then `roleBindings[]`.
/// Malformed entries are reported through `on_error` and skipped.
pub fn bindings_of(spec: &Value, mut on_error: impl FnMut(String, FieldError)) -> Vec<PermissionBinding> {
    let mut out = Vec::new();

    match nested(spec, &["clusterRoleBinding"]) {
        None | Some(Value::Null) => {}
        Some(v @ Value::Object(_)) => match parse_binding(v, false) {
            Ok(b) => out.push(b),
            Err(e) => on_error("clusterRoleBinding".to_string(), e),
        },
        Some(_) => on_error(
            "clusterRoleBinding".to_string(),
            FieldError::WrongType {
                path: "clusterRoleBinding".to_string(),
                expected: "map",
            },
        ),
    }

    for (field, namespaced) in [("clusterRoleBindings", false), ("roleBindings", true)] {
        let items = match nested_slice(spec, &[field]) {
            Ok(Some(items)) => items,
            Ok(None) => continue,
            Err(e) => {
                on_error(field.to_string(), e);
                continue;
            }
        };
        for (i, item) in items.iter().enumerate() {
            match parse_binding(item, namespaced) {
                Ok(b) => out.push(b),
                Err(e) => on_error(format!("{}[{}]", field, i), e),
            }
        }
    }
    out
}

/// Bindings of a `ClusterPermission`, logging and skipping malformed entries.
pub fn bindings(perm: &ClusterPermission) -> Vec<PermissionBinding> {
    let ns = perm.metadata.namespace.as_deref().unwrap_or_default();
    let name = perm.metadata.name.as_str();
    bindings_of(&perm.spec, |field, err| {
        warn!("Invalid binding {} in ClusterPermission {}/{}: {}", field, ns, name, err)
    })
}
