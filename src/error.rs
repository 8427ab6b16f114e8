use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::response::{ApiResponse, Meta};
use crate::status::InvalidTransition;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not Found")]
    NotFound,

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("Payment temporarily unavailable")]
    Processor(String),

    #[error("Forbidden")]
    Forbidden,

    #[error("Database error")]
    DbError(#[from] sqlx::Error),

    #[error("ORM error")]
    OrmError(#[from] sea_orm::DbErr),

    #[error("Internal Server Error")]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorData {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidTransition(_) => StatusCode::CONFLICT,
            AppError::Processor(detail) => {
                // Processor details are operational data, not user data.
                tracing::error!(detail = %detail, "payment processor failure");
                StatusCode::BAD_GATEWAY
            }
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::DbError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::OrmError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Raw store errors must never reach end users.
        let message = match &self {
            AppError::DbError(_) | AppError::OrmError(_) | AppError::Internal(_) => {
                "Internal Server Error".to_string()
            }
            other => other.to_string(),
        };

        let body = ApiResponse {
            message: message.clone(),
            data: Some(ErrorData { error: message }),
            meta: Some(Meta::empty()),
        };

        (status, axum::Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
