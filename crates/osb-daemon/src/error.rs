//! HTTP error taxonomy.
//!
//! Engine sentinels are translated into `{code, message}` bodies here; raw
//! runtime or store messages only surface through `INTERNAL_ERROR`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;

use osb_engine::EngineError;

/// Wire-level error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    BadRequest,
    NotFound,
    Conflict,
    Unauthorized,
    Timeout,
    InternalError,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorCode::BadRequest, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, ErrorCode::NotFound, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, ErrorCode::Unauthorized, message)
    }

    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::InternalError,
            err.to_string(),
        )
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let message = err.to_string();
        match &err {
            EngineError::BadRequest(_) | EngineError::ImageNotFound(_) => {
                ApiError::bad_request(message)
            }
            EngineError::NotFound
            | EngineError::CommandNotFound
            | EngineError::ImageNotFoundById => ApiError::not_found(message),
            err if err.is_conflict() => {
                ApiError::new(StatusCode::CONFLICT, ErrorCode::Conflict, message)
            }
            EngineError::Timeout => {
                ApiError::new(StatusCode::REQUEST_TIMEOUT, ErrorCode::Timeout, message)
            }
            EngineError::NoWorkers => ApiError::internal(message),
            EngineError::Runtime(_) | EngineError::Store(_) => ApiError::internal(message),
            _ => ApiError::internal(message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(status = %self.status, message = %self.message, "api error");
        let body = Json(ErrorBody {
            code: self.code,
            message: self.message,
        });
        (self.status, body).into_response()
    }
}
