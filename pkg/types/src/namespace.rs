use serde::{Deserialize, Serialize};

use crate::meta::{ObjectMeta, TypeMeta};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Namespace {
    #[serde(flatten)]
    pub type_meta: TypeMeta,
    #[serde(default)]
    pub metadata: ObjectMeta,
}

crate::impl_resource!(Namespace, "Namespace", "", "v1", "namespaces", namespaced = false);

impl Namespace {
    pub fn new(name: &str) -> Self {
        Self {
            type_meta: TypeMeta::of::<Self>(),
            metadata: ObjectMeta::named(name),
        }
    }
}
