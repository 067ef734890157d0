//! Error responses returned by the HTTP surface.

use agentloop_core::error::{Error, ErrorKind};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use tracing::error;

pub const INTERNAL_ERROR_MESSAGE: &str = "An unexpected error occurred. Please try again later.";
pub const UNPROCESSABLE_FILES_MESSAGE: &str = "Files can't be processed.";

/// JSON body of every non-2xx response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
    /// RFC 3339
    pub timestamp: String,
    pub status: u16,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn unprocessable_files() -> Self {
        Self::bad_request(UNPROCESSABLE_FILES_MESSAGE)
    }

    pub fn internal() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: INTERNAL_ERROR_MESSAGE.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        match e.kind() {
            ErrorKind::InvalidArgument => Self::bad_request(e.to_string()),
            _ => {
                error!(error = %e, "Internal server error");
                Self::internal()
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            message: self.message,
            timestamp: chrono::Utc::now().to_rfc3339(),
            status: self.status.as_u16(),
        };
        (self.status, Json(body)).into_response()
    }
}
