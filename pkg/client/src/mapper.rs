use crate::client::ApiResource;
use crate::error::ClusterError;

/// Resolves the loose resource names users write (`deployment`,
/// `deployments`, `deployments.apps`, `Deployment`) to API resources.
#[derive(Debug, Clone)]
pub struct ResourceMapper {
    known: Vec<ApiResource>,
}

const BUILTIN: &[(&str, &str, &str, &str, bool)] = &[
    ("", "v1", "pods", "Pod", true),
    ("", "v1", "services", "Service", true),
    ("", "v1", "configmaps", "ConfigMap", true),
    ("", "v1", "secrets", "Secret", true),
    ("", "v1", "serviceaccounts", "ServiceAccount", true),
    ("", "v1", "persistentvolumeclaims", "PersistentVolumeClaim", true),
    ("", "v1", "events", "Event", true),
    ("", "v1", "endpoints", "Endpoints", true),
    ("", "v1", "namespaces", "Namespace", false),
    ("", "v1", "nodes", "Node", false),
    ("", "v1", "persistentvolumes", "PersistentVolume", false),
    ("apps", "v1", "deployments", "Deployment", true),
    ("apps", "v1", "replicasets", "ReplicaSet", true),
    ("apps", "v1", "statefulsets", "StatefulSet", true),
    ("apps", "v1", "daemonsets", "DaemonSet", true),
    ("batch", "v1", "jobs", "Job", true),
    ("batch", "v1", "cronjobs", "CronJob", true),
    ("networking.k8s.io", "v1", "ingresses", "Ingress", true),
    ("networking.k8s.io", "v1", "networkpolicies", "NetworkPolicy", true),
    ("rbac.authorization.k8s.io", "v1", "roles", "Role", true),
    ("rbac.authorization.k8s.io", "v1", "rolebindings", "RoleBinding", true),
    ("rbac.authorization.k8s.io", "v1", "clusterroles", "ClusterRole", false),
    ("rbac.authorization.k8s.io", "v1", "clusterrolebindings", "ClusterRoleBinding", false),
    ("apiextensions.k8s.io", "v1", "customresourcedefinitions", "CustomResourceDefinition", false),
];

impl Default for ResourceMapper {
    fn default() -> Self {
        Self {
            known: BUILTIN
                .iter()
                .map(|(g, v, r, k, ns)| ApiResource::new(g, v, r, k, *ns))
                .collect(),
        }
    }
}

impl ResourceMapper {
    /// Teach the mapper a resource it cannot infer, such as a custom resource.
    pub fn register(&mut self, api: ApiResource) {
        self.known.retain(|k| !(k.group == api.group && k.resource == api.resource));
        self.known.push(api);
    }

    /// Resolve `resource`, optionally qualified as `resource.group`. When the
    /// name is unknown, `api_version_hint` (typically a template's
    /// `apiVersion`) supplies group and version and the plural is inferred.
    pub fn resolve(
        &self,
        resource: &str,
        api_version_hint: Option<&str>,
    ) -> Result<ApiResource, ClusterError> {
        let resource = resource.trim();
        if resource.is_empty() {
            return Err(ClusterError::Invalid("resource must not be empty".to_string()));
        }
        let (name, group) = match resource.split_once('.') {
            Some((name, group)) => (name.to_ascii_lowercase(), Some(group)),
            None => (resource.to_ascii_lowercase(), None),
        };
        let hint = api_version_hint.map(split_api_version);
        let group = group.or(hint.as_ref().map(|(g, _)| g.as_str()));

        let found = self.known.iter().find(|k| {
            (k.resource == name || k.kind.to_ascii_lowercase() == name)
                && group.is_none_or(|g| g == k.group)
        });
        if let Some(api) = found {
            return Ok(api.clone());
        }

        match hint {
            Some((g, v)) if !v.is_empty() => Ok(ApiResource::new(
                &g,
                &v,
                &pluralize(&name),
                &capitalize(&name),
                true,
            )),
            _ => Err(ClusterError::Invalid(format!(
                "unknown resource '{}' and no apiVersion to infer it from",
                resource
            ))),
        }
    }

    /// Resolve by group, version and kind, as written in a view scope.
    pub fn resolve_kind(
        &self,
        group: &str,
        version: &str,
        kind: &str,
    ) -> Result<ApiResource, ClusterError> {
        if kind.is_empty() {
            return Err(ClusterError::Invalid("kind must not be empty".to_string()));
        }
        if let Some(api) = self
            .known
            .iter()
            .find(|k| k.kind.eq_ignore_ascii_case(kind) && k.group == group)
        {
            let mut api = api.clone();
            if !version.is_empty() {
                api.version = version.to_string();
            }
            return Ok(api);
        }
        if version.is_empty() {
            return Err(ClusterError::Invalid(format!(
                "unknown kind '{}' in group '{}' without a version",
                kind, group
            )));
        }
        Ok(ApiResource::new(
            group,
            version,
            &pluralize(&kind.to_ascii_lowercase()),
            kind,
            true,
        ))
    }
}

fn split_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

fn pluralize(singular: &str) -> String {
    if singular.ends_with('s') {
        return singular.to_string();
    }
    if let Some(stem) = singular.strip_suffix('y') {
        if !stem.ends_with(['a', 'e', 'i', 'o', 'u']) {
            return format!("{}ies", stem);
        }
    }
    format!("{}s", singular)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}
