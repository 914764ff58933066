use crate::services::object_store::StoreError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::{fmt, io};
use thiserror::Error;

/// Failures surfaced by the blob helper operations.
#[derive(Debug, Error)]
pub enum HelperError {
    #[error("could not find the blob: {bucket}/{key}")]
    NoSuchBlob { bucket: String, key: String },

    #[error("malformed download URL `{0}`")]
    MalformedUrl(String),

    #[error("no file extension is registered for MIME type `{0}`")]
    UnknownMimeType(String),

    /// The copy step of a move failed; the source is untouched.
    #[error("failed to copy `{src}` to `{dst}`: {source}")]
    CopyFailed {
        src: String,
        dst: String,
        #[source]
        source: StoreError,
    },

    /// The copy landed but the source could not be removed, so the object
    /// now exists under both keys.
    #[error("copied `{src}` to `{dst}` but failed to delete the source: {reason}")]
    PostCopyDeleteFailed {
        src: String,
        dst: String,
        reason: String,
    },

    #[error("cannot derive a local file name from `{0}`")]
    InvalidFilename(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type HelperResult<T> = Result<T, HelperError>;

/// A lightweight wrapper for HTTP-facing errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::BucketNotFound(_) | StoreError::ObjectNotFound { .. } => {
                AppError::not_found(err.to_string())
            }
            StoreError::InvalidBucketName { .. } | StoreError::InvalidObjectKey(_) => {
                AppError::new(StatusCode::BAD_REQUEST, err.to_string())
            }
            other => AppError::internal(other.to_string()),
        }
    }
}

impl From<HelperError> for AppError {
    fn from(err: HelperError) -> Self {
        match err {
            HelperError::NoSuchBlob { .. } => AppError::not_found(err.to_string()),
            HelperError::MalformedUrl(_) | HelperError::InvalidFilename(_) => {
                AppError::new(StatusCode::BAD_REQUEST, err.to_string())
            }
            HelperError::Store(store) => store.into(),
            other => AppError::internal(other.to_string()),
        }
    }
}
