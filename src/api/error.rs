use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::error::{ErrorKind, ViewError};
use crate::Located;

#[derive(Debug)]
pub struct ApiError(pub ViewError);

impl From<ViewError> for ApiError {
    fn from(error: ViewError) -> Self {
        Self(error)
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorKind,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let kind = self.0.kind();
        let status = match kind {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::StoreUnavailable => {
                tracing::error!(error = %self.0, location = %self.0.location(), "view store is unavailable");
                StatusCode::SERVICE_UNAVAILABLE
            }
        };

        let content = ErrorResponse {
            error: kind,
            message: self.0.to_string(),
        };

        (status, Json(content)).into_response()
    }
}
