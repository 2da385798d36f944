//! HTTP error mapping.
//!
//! Every failure leaves the server as `{ "error": <kind>, "message": <text> }`
//! with the status `ProgramError::http_status` assigns.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use partner_hub_core::error::ProgramError;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

#[derive(Debug)]
pub enum AppError {
    Program(ProgramError),
    /// Missing or invalid bearer token.
    Unauthorized(String),
}

impl From<ProgramError> for AppError {
    fn from(e: ProgramError) -> Self {
        Self::Program(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::Unauthorized(message) => (
                StatusCode::UNAUTHORIZED,
                ErrorBody {
                    error: "unauthorized".into(),
                    message,
                },
            ),
            AppError::Program(e) => {
                let status = StatusCode::from_u16(e.http_status())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                let message = if let ProgramError::Internal(inner) = &e {
                    tracing::error!(error = ?inner, "internal error");
                    "internal server error".to_string()
                } else {
                    e.to_string()
                };
                (
                    status,
                    ErrorBody {
                        error: e.kind().into(),
                        message,
                    },
                )
            }
        };
        (status, Json(body)).into_response()
    }
}
