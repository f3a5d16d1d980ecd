use anyhow::{Result, bail};
use pkg_constants::api::RBAC_GROUP;

use crate::meta::Resource;

/// Validate a Kubernetes-style resource name.
/// Rules: lowercase `[a-z0-9-.]`, max 253 chars, alphanumeric at both ends.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("name must not be empty");
    }
    if name.len() > 253 {
        bail!("name '{}' exceeds 253 characters (got {})", name, name.len());
    }
    let edge_ok = |c: Option<char>| c.is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
    if !edge_ok(name.chars().next()) || !edge_ok(name.chars().last()) {
        bail!("name '{}' must start and end with a lowercase letter or digit", name);
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
    {
        bail!(
            "name '{}' must contain only lowercase letters, digits, '-' and '.'",
            name
        );
    }
    Ok(())
}

/// RBAC objects only need a valid path segment, so `system:masters` and
/// `kubevirt.io:admin` are accepted.
pub fn validate_path_segment_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("name must not be empty");
    }
    if name == "." || name == ".." || name.contains('/') || name.contains('%') {
        bail!("name '{}' may not be '.', '..' or contain '/' or '%'", name);
    }
    Ok(())
}

/// Validate a namespace name: a DNS label, max 63 chars, no dots.
pub fn validate_namespace(name: &str) -> Result<()> {
    validate_name(name)?;
    if name.len() > 63 || name.contains('.') {
        bail!("namespace '{}' must be a DNS label of at most 63 characters", name);
    }
    Ok(())
}

/// Check the metadata shape a kind requires before it is stored.
pub fn validate_object<K: Resource>(obj: &K) -> Result<()> {
    let meta = obj.meta();
    if K::GROUP == RBAC_GROUP {
        validate_path_segment_name(&meta.name)?;
    } else {
        validate_name(&meta.name)?;
    }
    match (K::NAMESPACED, meta.namespace.as_deref()) {
        (true, Some(ns)) => validate_namespace(ns),
        (true, None) => bail!("{} '{}' requires a namespace", K::KIND, meta.name),
        (false, Some(ns)) => bail!(
            "{} '{}' is cluster-scoped but has namespace '{}'",
            K::KIND,
            meta.name,
            ns
        ),
        (false, None) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionType, ClusterAction, KubeWorkSpec};
    use crate::cluster::ManagedCluster;
    use crate::rbac::ClusterRole;

    #[test]
    fn valid_names() {
        assert!(validate_name("nginx").is_ok());
        assert!(validate_name("my-app").is_ok());
        assert!(validate_name("app-123").is_ok());
        assert!(validate_name("a").is_ok());
        assert!(validate_name("kubevirt.io").is_ok());
    }

    #[test]
    fn invalid_names() {
        assert!(validate_name("").is_err());
        assert!(validate_name("My-App").is_err());
        assert!(validate_name("my_app").is_err());
        assert!(validate_name("-leading").is_err());
        assert!(validate_name("trailing-").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name(&"a".repeat(254)).is_err());
        assert!(validate_namespace(&"a".repeat(64)).is_err());
        assert!(validate_namespace("with.dot").is_err());
    }

    #[test]
    fn rbac_names_allow_colons() {
        let role = ClusterRole::new("kubevirt.io:admin", vec![]);
        assert!(validate_object(&role).is_ok());
        assert!(validate_object(&ClusterRole::new("a/b", vec![])).is_err());
        assert!(validate_object(&ClusterRole::new("..", vec![])).is_err());
        assert!(validate_name("kubevirt.io:admin").is_err());
    }

    #[test]
    fn scope_must_match_kind() {
        let action = ClusterAction::new("cluster1", "a", ActionType::Create, KubeWorkSpec::default());
        assert!(validate_object(&action).is_ok());

        let mut orphan = action.clone();
        orphan.metadata.namespace = None;
        assert!(validate_object(&orphan).is_err());

        let mut cluster = ManagedCluster::new("cluster1");
        assert!(validate_object(&cluster).is_ok());
        cluster.metadata.namespace = Some("default".into());
        assert!(validate_object(&cluster).is_err());
    }
}
