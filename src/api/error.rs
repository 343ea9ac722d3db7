use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use tracing::error;

use crate::errors::Error;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Conflict(String),
    NotFound(String),
    Unauthorized(String),
    Forbidden(String),
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn bad_request<S: Into<String>>(msg: S) -> Self {
        ApiError::BadRequest(msg.into())
    }

    pub fn unauthorized<S: Into<String>>(msg: S) -> Self {
        ApiError::Unauthorized(msg.into())
    }

    pub fn forbidden<S: Into<String>>(msg: S) -> Self {
        ApiError::Forbidden(msg.into())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let (error_kind, message) = match self {
            ApiError::BadRequest(msg) => ("bad_request", msg),
            ApiError::Conflict(msg) => ("conflict", msg),
            ApiError::NotFound(msg) => ("not_found", msg),
            ApiError::Unauthorized(msg) => ("unauthorized", msg),
            ApiError::Forbidden(msg) => ("forbidden", msg),
            ApiError::Internal(msg) => ("internal_error", msg),
        };

        (status, Json(ErrorBody { error: error_kind, message })).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Validation { message, .. } | Error::InvalidArgument { message } => {
                ApiError::BadRequest(message)
            }
            Error::Unauthorized { message } => ApiError::Unauthorized(message),
            Error::Forbidden { message } => ApiError::Forbidden(message),
            Error::NotFound { .. } => ApiError::NotFound(err.to_string()),
            Error::Conflict { message, .. } => ApiError::Conflict(message),
            other => {
                // Details stay in the log.
                error!(error = %other, "Request failed with an internal error");
                ApiError::Internal("Internal server error".to_string())
            }
        }
    }
}
