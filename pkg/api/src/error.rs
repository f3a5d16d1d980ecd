use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use pkg_permission::PermissionError;
use pkg_state::StoreError;
use pkg_types::status::Status;
use thiserror::Error;
use tracing::warn;

/// Every failure a hub handler can return. Rendered as a `Status` body.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Permission(#[from] PermissionError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    BadGateway(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Store(e) => match e {
                StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
                StoreError::AlreadyExists { .. } | StoreError::Conflict { .. } => StatusCode::CONFLICT,
                StoreError::Invalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
                StoreError::Expired(_) => StatusCode::GONE,
                StoreError::Serialization(_) | StoreError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Permission(PermissionError::NotFound { .. }) => StatusCode::NOT_FOUND,
            ApiError::Permission(PermissionError::NotReady) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Machine-readable reason token of the `Status` body.
    pub fn reason(&self) -> &'static str {
        match self {
            ApiError::Store(e) => match e {
                StoreError::NotFound { .. } => "NotFound",
                StoreError::AlreadyExists { .. } => "AlreadyExists",
                StoreError::Conflict { .. } => "Conflict",
                StoreError::Invalid(_) => "Invalid",
                StoreError::Expired(_) => "Expired",
                StoreError::Serialization(_) | StoreError::Backend(_) => "InternalError",
            },
            ApiError::Permission(PermissionError::NotFound { .. }) => "NotFound",
            ApiError::Permission(PermissionError::NotReady) => "ServiceUnavailable",
            ApiError::BadRequest(_) => "BadRequest",
            ApiError::Unauthorized(_) => "Unauthorized",
            ApiError::Forbidden(_) => "Forbidden",
            ApiError::Unavailable(_) => "ServiceUnavailable",
            ApiError::BadGateway(_) => "BadGateway",
        }
    }

    pub fn to_status(&self) -> Status {
        Status::failure(self.status_code().as_u16(), self.reason(), self.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.status_code();
        if code.is_server_error() {
            warn!("Request failed: {}", self);
        }
        (code, Json(self.to_status())).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
