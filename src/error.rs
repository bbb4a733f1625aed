//! 统一的 API 错误类型与 JSON 响应转换。

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json as JsonResponse, Response};
use serde::Serialize;

use crate::ingest::{IngestError, Rejection};

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    PayloadTooLarge(String),
    Internal(String),
}

#[derive(Serialize)]
pub(crate) struct MessageBody {
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, JsonResponse(MessageBody { message })).into_response()
    }
}

impl From<Rejection> for ApiError {
    fn from(rejection: Rejection) -> Self {
        let message = rejection.message().to_string();
        match rejection {
            Rejection::TooLarge => ApiError::PayloadTooLarge(message),
            Rejection::InvalidContentType | Rejection::DisallowedType | Rejection::NoFile => {
                ApiError::BadRequest(message)
            }
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(error: IngestError) -> Self {
        ApiError::Internal(format!("Internal server error: {error}"))
    }
}
