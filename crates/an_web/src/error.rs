use an_core::Error;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Turns a core error into an HTTP response that never leaks backend details.
pub struct AppError(pub Error);

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        AppError(err)
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::InvalidArgument(_) | Error::Parse(_) => StatusCode::BAD_REQUEST,
            Error::Provider(_) | Error::Completion(_) | Error::Embedding(_) => {
                StatusCode::BAD_GATEWAY
            }
            Error::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {:?}", self.0);
        } else {
            tracing::debug!("Rejected request: {}", self.0);
        }
        let body = Json(json!({ "error": self.0.user_message() }));
        (status, body).into_response()
    }
}
