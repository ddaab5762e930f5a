mod device;
mod sim;
mod spools;

use std::sync::Arc;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use spoolscale_firmware::{ScaleError, TagError};

use crate::AppState;

/// Build the API router
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/spools", spools::router())
        .nest("/device", device::router())
        .nest("/sim", sim::router())
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Tag(#[from] TagError),

    #[error(transparent)]
    Scale(#[from] ScaleError),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Tag(TagError::Busy) => StatusCode::CONFLICT,
            ApiError::Tag(_) | ApiError::Scale(ScaleError::SensorNotFound) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Scale(ScaleError::InvalidCalibration { .. }) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ApiError::Scale(_) | ApiError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
