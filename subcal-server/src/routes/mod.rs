pub mod feed;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;

/// JSON error envelope
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub title: String,
}

/// Errors reported to the caller as JSON instead of a calendar
#[derive(Debug)]
pub enum AppError {
    MissingParameters,
    InvalidParameters,
    InvalidApiKey,
    MethodNotAllowed,
    Internal(anyhow::Error),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::MissingParameters | AppError::InvalidParameters => StatusCode::BAD_REQUEST,
            AppError::InvalidApiKey => StatusCode::UNAUTHORIZED,
            AppError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn title(&self) -> &'static str {
        match self {
            AppError::MissingParameters => "Missing parameters",
            AppError::InvalidParameters => "Invalid parameters",
            AppError::InvalidApiKey => "Invalid API key",
            AppError::MethodNotAllowed => "Invalid request method",
            // Details stay in the log
            AppError::Internal(_) => "Internal server error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::Internal(ref e) = self {
            error!(error = %e, "Request failed");
        }

        let status = self.status();
        let body = Json(ErrorResponse {
            success: false,
            title: self.title().to_string(),
        });

        let mut response = (status, body).into_response();
        if status == StatusCode::METHOD_NOT_ALLOWED {
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static("GET, HEAD"));
        }
        response
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::Internal(err.into())
    }
}
