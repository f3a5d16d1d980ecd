use pkg_constants::api::{CLUSTERVIEW_GROUP, LABEL_CLUSTER, PROJECT_VERSION};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::meta::{ListMeta, ObjectMeta, TypeMeta};

/// A namespace (or `*` for every namespace) on a managed cluster in which the
/// caller holds a KubeVirt role.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Project {
    pub cluster: String,
    pub name: String,
}

impl Project {
    pub fn new(cluster: &str, name: &str) -> Self {
        Self {
            cluster: cluster.to_string(),
            name: name.to_string(),
        }
    }

    pub fn to_metadata(&self) -> PartialObjectMetadata {
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_CLUSTER.to_string(), self.cluster.clone());
        PartialObjectMetadata {
            type_meta: project_type_meta("Project"),
            metadata: ObjectMeta {
                name: self.name.clone(),
                labels,
                ..Default::default()
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialObjectMetadata {
    #[serde(flatten)]
    pub type_meta: TypeMeta,
    pub metadata: ObjectMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialObjectMetadataList {
    #[serde(flatten)]
    pub type_meta: TypeMeta,
    #[serde(default)]
    pub metadata: ListMeta,
    pub items: Vec<PartialObjectMetadata>,
}

impl PartialObjectMetadataList {
    pub fn from_projects(projects: &[Project]) -> Self {
        Self {
            type_meta: project_type_meta("PartialObjectMetadataList"),
            metadata: ListMeta::default(),
            items: projects.iter().map(Project::to_metadata).collect(),
        }
    }
}

fn project_type_meta(kind: &str) -> TypeMeta {
    TypeMeta {
        api_version: format!("{}/{}", CLUSTERVIEW_GROUP, PROJECT_VERSION),
        kind: kind.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_carries_cluster_label() {
        let list = PartialObjectMetadataList::from_projects(&[Project::new("c1", "proj-a")]);
        let v = serde_json::to_value(&list).unwrap();
        assert_eq!(v["kind"], "PartialObjectMetadataList");
        assert_eq!(v["items"][0]["metadata"]["name"], "proj-a");
        assert_eq!(v["items"][0]["metadata"]["labels"]["cluster"], "c1");
    }
}
