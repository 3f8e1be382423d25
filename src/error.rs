use std::io;
use std::path::{Path, PathBuf};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// A settings field rejected its input. The previously stored value stays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error("invalid IP address: {0:?}")]
    InvalidAddress(String),

    #[error("filesystem error on {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("corrupt marker block in {}: {reason}", path.display())]
    CorruptMarker { path: PathBuf, reason: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("store error: {0}")]
    Store(String),
}

impl GuardError {
    pub fn filesystem(path: &Path, source: io::Error) -> Self {
        GuardError::Filesystem {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for GuardError {
    fn from(err: serde_json::Error) -> Self {
        GuardError::Store(err.to_string())
    }
}

#[derive(Debug)]
pub enum AppError {
    Unauthorized(&'static str),
    BadRequest(String),
    Forbidden(String),
    Conflict(String),
    Unavailable(String),
    Internal(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.to_string()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Unavailable(msg) => {
                tracing::warn!("Enforcement unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, msg.clone())
            }
            AppError::Internal(err) => {
                tracing::error!("Internal error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, message).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

impl From<GuardError> for AppError {
    fn from(err: GuardError) -> Self {
        match err {
            GuardError::InvalidAddress(_) | GuardError::Validation(_) => {
                AppError::BadRequest(err.to_string())
            }
            GuardError::CorruptMarker { .. } => AppError::Conflict(err.to_string()),
            GuardError::Filesystem { .. } | GuardError::Store(_) => {
                AppError::Unavailable(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_names_field() {
        let err = ValidationError::new("allowed_attempts", "must be between 1 and 100");
        assert_eq!(err.to_string(), "allowed_attempts: must be between 1 and 100");
    }

    #[test]
    fn test_status_mapping() {
        let resp = AppError::from(GuardError::InvalidAddress("x".into())).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = AppError::from(GuardError::CorruptMarker {
            path: PathBuf::from(".htaccess"),
            reason: "missing END".into(),
        })
        .into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = AppError::from(GuardError::filesystem(
            Path::new(".htaccess"),
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        ))
        .into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_panicked_task_is_internal_error() {
        let join_err = tokio::task::spawn_blocking::<_, ()>(|| panic!("boom"))
            .await
            .unwrap_err();
        let resp = AppError::from(anyhow::Error::from(join_err)).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
