use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::aqi::EstimateError;
use crate::fanout::Cancelled;
use crate::heatmap::HeatmapError;
use crate::models::ApiError;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to build GPX document: {0}")]
    Gpx(#[from] gpx::errors::GpxError),
}

/// Failures surfaced by the HTTP handlers.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Heatmap(#[from] HeatmapError),
    #[error(transparent)]
    Estimate(#[from] EstimateError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_)
            | AppError::Estimate(EstimateError::InvalidCoordinate { .. }) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Heatmap(HeatmapError::Cancelled(_)) | AppError::Cancelled(_) => {
                StatusCode::REQUEST_TIMEOUT
            }
            AppError::Heatmap(_) => StatusCode::BAD_REQUEST,
            AppError::Estimate(EstimateError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Export(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("request failed: {self}");
        } else {
            tracing::debug!("request rejected ({status}): {self}");
        }
        (
            status,
            Json(ApiError {
                message: self.to_string(),
            }),
        )
            .into_response()
    }
}
