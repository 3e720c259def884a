use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::warn;

use glint_types::CoreError;

pub type ApiResult<T> = Result<T, ApiError>;

/// A `CoreError` on its way out of an HTTP handler.
#[derive(Debug)]
pub struct ApiError(pub CoreError);

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Forbidden => StatusCode::FORBIDDEN,
            CoreError::InsufficientBalance { .. } => StatusCode::PAYMENT_REQUIRED,
            CoreError::AlreadyMember | CoreError::DuplicateConversation => StatusCode::CONFLICT,
            CoreError::TransientStoreFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::NotLive
            | CoreError::SelfRequest
            | CoreError::SelfGift
            | CoreError::HostUnavailable
            | CoreError::InvalidGift
            | CoreError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if self.0.is_retryable() {
            warn!("Request failed: {}", self.0);
        }

        let body = Json(json!({
            "code": self.0.code(),
            "message": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}
