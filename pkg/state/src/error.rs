use thiserror::Error;

/// Errors surfaced verbatim by the object store; nothing here retries.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("{kind} \"{name}\" not found")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} \"{name}\" already exists")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("operation on {kind} \"{name}\" conflicted: {message}")]
    Conflict {
        kind: &'static str,
        name: String,
        message: String,
    },

    #[error("invalid object: {0}")]
    Invalid(String),

    /// The resume point of a watch is older than the retained history.
    #[error("too old resource version: {0}")]
    Expired(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    /// Whether repeating the same call may succeed. Invalid objects and
    /// missing objects need caller action first.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Conflict { .. } | StoreError::Expired(_) | StoreError::Backend(_)
        )
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}
