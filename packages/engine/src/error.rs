//! HTTP error envelope and the §7 error taxonomy.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// The error surfaced to an HTTP caller, carrying the `{error, code}` envelope.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("no file provided")]
    MissingFile,

    #[error("file exceeds the 10 MiB upload limit")]
    FileTooLarge,

    #[error("missing or invalid credential")]
    Unauthorized,

    #[error("credential lacks required scope")]
    Forbidden,

    #[error("resource not found")]
    NotFound,

    #[error("{0}")]
    Duplicate(String),

    #[error("rate limit exceeded")]
    RateLimited {
        retry_after_secs: u64,
        limit: u32,
        remaining: u32,
    },

    #[error("object store rejected the upload: {0}")]
    UploadError(String),

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::InvalidState(_) => "INVALID_STATE",
            ApiError::MissingFile => "MISSING_FILE",
            ApiError::FileTooLarge => "FILE_TOO_LARGE",
            ApiError::Unauthorized => "UNAUTHORIZED",
            ApiError::Forbidden => "FORBIDDEN",
            ApiError::NotFound => "NOT_FOUND",
            ApiError::Duplicate(_) => "DUPLICATE",
            ApiError::RateLimited { .. } => "RATE_LIMITED",
            ApiError::UploadError(_) => "UPLOAD_ERROR",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_)
            | ApiError::InvalidState(_)
            | ApiError::MissingFile
            | ApiError::FileTooLarge => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Duplicate(_) => StatusCode::CONFLICT,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::UploadError(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        if let ApiError::Internal(ref msg) = self {
            tracing::error!(error = %msg, "internal error");
        }

        let mut response = (
            status,
            Json(ErrorBody {
                error: self.to_string(),
                code,
            }),
        )
            .into_response();

        if let ApiError::RateLimited {
            retry_after_secs,
            limit,
            remaining,
        } = self
        {
            let headers = response.headers_mut();
            headers.insert("Retry-After", retry_after_secs.into());
            headers.insert("X-RateLimit-Limit", limit.into());
            headers.insert("X-RateLimit-Remaining", remaining.into());
        }

        response
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<crate::kernel::queue::QueueError> for ApiError {
    fn from(err: crate::kernel::queue::QueueError) -> Self {
        match err {
            crate::kernel::queue::QueueError::NotFound => ApiError::NotFound,
            crate::kernel::queue::QueueError::InvalidTransition => {
                ApiError::InvalidState("invalid job status transition".into())
            }
            crate::kernel::queue::QueueError::Db(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<crate::kernel::agents::AgentError> for ApiError {
    fn from(err: crate::kernel::agents::AgentError) -> Self {
        match err {
            crate::kernel::agents::AgentError::Duplicate => {
                ApiError::Duplicate("agent package_name already registered".into())
            }
            crate::kernel::agents::AgentError::Db(e) => ApiError::Internal(e.to_string()),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
