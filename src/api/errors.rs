use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::services::gating::AdvanceError;
use crate::services::retake::RetakeError;

#[derive(Debug, Serialize)]
struct ErrorResponse {
    status: u16,
    detail: String,
}

/// The error taxonomy at the API boundary. Internals return typed results;
/// nothing is thrown across the proctoring/state-machine seam.
#[derive(Debug)]
pub(crate) enum ApiError {
    Unauthorized(&'static str),
    Forbidden(&'static str),
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl ApiError {
    /// Log the underlying error with context and return an `Internal` variant.
    pub(crate) fn internal(err: impl std::fmt::Display, context: &str) -> Self {
        tracing::error!(error = %err, "{context}");
        Self::Internal(context.to_string())
    }
}

impl From<AdvanceError> for ApiError {
    fn from(err: AdvanceError) -> Self {
        match err {
            AdvanceError::UnknownVideo => {
                ApiError::BadRequest("Unknown section or video index for this course".to_string())
            }
            AdvanceError::WrongSection => {
                ApiError::BadRequest("Video is not in the learner's current section".to_string())
            }
            AdvanceError::NotCurrentVideo => {
                ApiError::BadRequest("Video is not the learner's current video".to_string())
            }
            AdvanceError::SectionLocked => {
                ApiError::BadRequest("Section is not yet accessible".to_string())
            }
        }
    }
}

impl From<RetakeError> for ApiError {
    fn from(err: RetakeError) -> Self {
        match err {
            RetakeError::NotFound => ApiError::NotFound("Progress not found".to_string()),
            RetakeError::NotOwner => {
                ApiError::Forbidden("Only the owning learner can retake this course")
            }
            RetakeError::Conflict(message) => ApiError::Conflict(message.to_string()),
            RetakeError::Snapshot(err) => ApiError::internal(err, "Failed to archive progress"),
            RetakeError::Database(err) => ApiError::internal(err, "Failed to process retake"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(message) => {
                let status = StatusCode::UNAUTHORIZED;
                let mut response = (
                    status,
                    Json(ErrorResponse { status: status.as_u16(), detail: message.to_string() }),
                )
                    .into_response();
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
                response
            }
            ApiError::Forbidden(message) => {
                let status = StatusCode::FORBIDDEN;
                (
                    status,
                    Json(ErrorResponse { status: status.as_u16(), detail: message.to_string() }),
                )
                    .into_response()
            }
            ApiError::BadRequest(message) => {
                let status = StatusCode::BAD_REQUEST;
                (status, Json(ErrorResponse { status: status.as_u16(), detail: message }))
                    .into_response()
            }
            ApiError::NotFound(message) => {
                let status = StatusCode::NOT_FOUND;
                (status, Json(ErrorResponse { status: status.as_u16(), detail: message }))
                    .into_response()
            }
            ApiError::Conflict(message) => {
                let status = StatusCode::CONFLICT;
                (status, Json(ErrorResponse { status: status.as_u16(), detail: message }))
                    .into_response()
            }
            ApiError::Internal(message) => {
                tracing::error!(error = %message, "Internal server error");
                let status = StatusCode::INTERNAL_SERVER_ERROR;
                (status, Json(ErrorResponse { status: status.as_u16(), detail: message }))
                    .into_response()
            }
        }
    }
}
