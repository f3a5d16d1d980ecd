use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermissionError {
    #[error("{kind} \"{name}\" not found")]
    NotFound { kind: &'static str, name: String },
    #[error("permission caches are not synced yet")]
    NotReady,
}

impl PermissionError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, PermissionError::NotFound { .. })
    }
}
