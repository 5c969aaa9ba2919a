use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::BAD_REQUEST, message: msg.into() }
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::FORBIDDEN, message: msg.into() }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::NOT_FOUND, message: msg.into() }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::INTERNAL_SERVER_ERROR, message: msg.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

impl From<qm_store::StoreError> for ApiError {
    fn from(e: qm_store::StoreError) -> Self {
        ApiError::internal(e.to_string())
    }
}

impl From<qm_allocator::AllocatorError> for ApiError {
    fn from(e: qm_allocator::AllocatorError) -> Self {
        match e {
            qm_allocator::AllocatorError::AlreadyReserved(_) => ApiError::forbidden(e.to_string()),
            qm_allocator::AllocatorError::ResourceNotFound(_) => ApiError::not_found(e.to_string()),
            qm_allocator::AllocatorError::Store(e) => ApiError::from(e),
        }
    }
}
