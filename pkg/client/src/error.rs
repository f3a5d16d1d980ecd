use serde::Deserialize;
use thiserror::Error;

/// Failure of a call against a managed cluster.
#[derive(Debug, Clone, Error)]
pub enum ClusterError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("server error ({code}): {message}")]
    Server { code: u16, message: String },
}

#[derive(Deserialize)]
struct StatusBody {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

impl ClusterError {
    /// Map an HTTP error response to an error, using the `Status` body's
    /// reason where it disambiguates (409 covers both conflicts and duplicates).
    pub fn from_response(code: u16, body: &str) -> Self {
        let status: Option<StatusBody> = serde_json::from_str(body).ok();
        let message = status
            .as_ref()
            .map(|s| s.message.clone())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| body.trim().to_string());
        let reason = status.map(|s| s.reason).unwrap_or_default();
        match code {
            401 => ClusterError::Unauthorized(message),
            403 => ClusterError::Forbidden(message),
            404 => ClusterError::NotFound(message),
            409 if reason == "AlreadyExists" => ClusterError::AlreadyExists(message),
            409 => ClusterError::Conflict(message),
            400 | 422 => ClusterError::Invalid(message),
            408 | 504 => ClusterError::Timeout(message),
            _ => ClusterError::Server { code, message },
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, ClusterError::Unauthorized(_) | ClusterError::Forbidden(_))
    }

    /// Network-level failures that say nothing about the request itself.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ClusterError::Transport(_) | ClusterError::Timeout(_) | ClusterError::Server { .. }
        )
    }
}

impl From<reqwest::Error> for ClusterError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ClusterError::Timeout(e.to_string())
        } else if e.is_decode() {
            ClusterError::Invalid(e.to_string())
        } else {
            ClusterError::Transport(e.to_string())
        }
    }
}
