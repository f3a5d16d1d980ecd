use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
}

impl TypeMeta {
    pub fn of<K: Resource>() -> Self {
        Self {
            api_version: K::api_version(),
            kind: K::KIND.to_string(),
        }
    }
}

/// Metadata carried by every declarative object.
///
/// `resource_version` is minted by the store on every write and is opaque to
/// callers; they only hand it back on updates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_version: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub generation: i64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

impl ObjectMeta {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
            ..Default::default()
        }
    }

    /// The store's resourceVersion as a number; 0 when unset or foreign.
    pub fn resource_version_u64(&self) -> u64 {
        self.resource_version.parse().unwrap_or(0)
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }
}

/// Primary key of an object within one kind: `(namespace, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: Option<&str>, name: &str) -> Self {
        Self {
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_version: String,
}

/// Wire shape of a list response: `{apiVersion, kind: <Kind>List, metadata, items}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectList<T> {
    #[serde(flatten)]
    pub type_meta: TypeMeta,
    #[serde(default)]
    pub metadata: ListMeta,
    pub items: Vec<T>,
}

impl<T: Resource> ObjectList<T> {
    pub fn new(items: Vec<T>, resource_version: u64) -> Self {
        Self {
            type_meta: TypeMeta {
                api_version: T::api_version(),
                kind: format!("{}List", T::KIND),
            },
            metadata: ListMeta {
                resource_version: resource_version.to_string(),
            },
            items,
        }
    }
}

/// A declarative kind known to the store.
pub trait Resource:
    Serialize + DeserializeOwned + Clone + PartialEq + fmt::Debug + Send + Sync + 'static
{
    const KIND: &'static str;
    const GROUP: &'static str;
    const VERSION: &'static str;
    /// Lowercase plural used in store keys and URLs.
    const PLURAL: &'static str;
    const NAMESPACED: bool;
    /// Whether the kind has a status subresource written separately from spec.
    const HAS_STATUS: bool = true;

    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;
    fn type_meta_mut(&mut self) -> &mut TypeMeta;

    /// Overwrite this object's status with `other`'s.
    fn copy_status_from(&mut self, _other: &Self) {}

    fn api_version() -> String {
        if Self::GROUP.is_empty() {
            Self::VERSION.to_string()
        } else {
            format!("{}/{}", Self::GROUP, Self::VERSION)
        }
    }

    fn key(&self) -> ObjectKey {
        self.meta().key()
    }
}

/// Implements [`Resource`] for a struct with `type_meta`, `metadata` and,
/// optionally, `status` fields.
#[macro_export]
macro_rules! impl_resource {
    ($ty:ty, $kind:expr, $group:expr, $version:expr, $plural:expr, namespaced = $ns:expr) => {
        impl $crate::meta::Resource for $ty {
            const KIND: &'static str = $kind;
            const GROUP: &'static str = $group;
            const VERSION: &'static str = $version;
            const PLURAL: &'static str = $plural;
            const NAMESPACED: bool = $ns;
            const HAS_STATUS: bool = false;

            fn meta(&self) -> &$crate::meta::ObjectMeta {
                &self.metadata
            }
            fn meta_mut(&mut self) -> &mut $crate::meta::ObjectMeta {
                &mut self.metadata
            }
            fn type_meta_mut(&mut self) -> &mut $crate::meta::TypeMeta {
                &mut self.type_meta
            }
        }
    };
    ($ty:ty, $kind:expr, $group:expr, $version:expr, $plural:expr, namespaced = $ns:expr, status) => {
        impl $crate::meta::Resource for $ty {
            const KIND: &'static str = $kind;
            const GROUP: &'static str = $group;
            const VERSION: &'static str = $version;
            const PLURAL: &'static str = $plural;
            const NAMESPACED: bool = $ns;

            fn meta(&self) -> &$crate::meta::ObjectMeta {
                &self.metadata
            }
            fn meta_mut(&mut self) -> &mut $crate::meta::ObjectMeta {
                &mut self.metadata
            }
            fn type_meta_mut(&mut self) -> &mut $crate::meta::TypeMeta {
                &mut self.type_meta
            }
            fn copy_status_from(&mut self, other: &Self) {
                self.status = other.status.clone();
            }
        }
    };
}
