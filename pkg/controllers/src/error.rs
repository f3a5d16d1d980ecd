use pkg_client::ClusterError;
use pkg_state::StoreError;
use thiserror::Error;

/// Stable reason tokens written into conditions.
pub mod reason {
    pub const INVALID: &str = "Invalid";
    pub const TARGET_MISSING: &str = "TargetMissing";
    pub const CONFLICT: &str = "Conflict";
    pub const AUTH_FAILURE: &str = "AuthFailure";
    pub const TRANSPORT: &str = "Transport";
    pub const NO_SUCH_CLUSTER: &str = "NoSuchCluster";
    pub const ACTION_TYPE_INVALID: &str = "ActionTypeInvalid";
    pub const CREATE_FAILED: &str = "CreateResourceFailed";
    pub const UPDATE_FAILED: &str = "UpdateResourceFailed";
    pub const DELETE_FAILED: &str = "DeleteResourceFailed";
    pub const RESOURCE_NAME_INVALID: &str = "ResourceNameInvalid";
    pub const RESOURCE_TYPE_INVALID: &str = "ResourceTypeInvalid";
    pub const GET_FAILED: &str = "GetResourceFailed";
    pub const DONE: &str = "Done";
    pub const SYNCED: &str = "Synced";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The object itself is malformed; retrying cannot help.
    Validation,
    NotFound,
    Conflict,
    Auth,
    Transport,
}

#[derive(Debug, Clone, Error)]
#[error("{reason}: {message}")]
pub struct ReconcileError {
    pub class: ErrorClass,
    pub reason: &'static str,
    pub message: String,
}

impl ReconcileError {
    pub fn new(class: ErrorClass, reason: &'static str, message: impl Into<String>) -> Self {
        Self {
            class,
            reason,
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Validation, reason::INVALID, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Conflict, reason::CONFLICT, message)
    }

    pub fn is_conflict(&self) -> bool {
        self.class == ErrorClass::Conflict
    }

    pub fn is_retryable(&self) -> bool {
        self.class != ErrorClass::Validation
    }

    /// Classify a failed call against a target cluster; `failed` is the
    /// operation-specific reason used when nothing more precise applies.
    pub fn from_cluster(err: &ClusterError, failed: &'static str) -> Self {
        let message = err.to_string();
        match err {
            ClusterError::NotFound(_) => Self::new(ErrorClass::NotFound, reason::TARGET_MISSING, message),
            ClusterError::AlreadyExists(_) => Self::new(ErrorClass::Validation, failed, message),
            ClusterError::Invalid(_) => Self::new(ErrorClass::Validation, reason::INVALID, message),
            ClusterError::Conflict(_) => Self::conflict(message),
            ClusterError::Unauthorized(_) | ClusterError::Forbidden(_) => {
                Self::new(ErrorClass::Auth, reason::AUTH_FAILURE, message)
            }
            ClusterError::Timeout(_) | ClusterError::Transport(_) | ClusterError::Server { .. } => {
                Self::new(ErrorClass::Transport, failed, message)
            }
        }
    }
}

impl From<StoreError> for ReconcileError {
    fn from(err: StoreError) -> Self {
        let message = err.to_string();
        match err {
            StoreError::NotFound { .. } => Self::new(ErrorClass::NotFound, reason::TARGET_MISSING, message),
            StoreError::Conflict { .. } | StoreError::AlreadyExists { .. } => Self::conflict(message),
            StoreError::Invalid(_) | StoreError::Serialization(_) => Self::invalid(message),
            StoreError::Expired(_) | StoreError::Backend(_) => {
                Self::new(ErrorClass::Transport, reason::TRANSPORT, message)
            }
        }
    }
}
