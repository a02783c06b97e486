use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::ingest::RemoveError;
use crate::ingest::pipeline::PipelineError;
use crate::ingest::validate::IntakeError;
use crate::quota::QuotaError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("rate limit exceeded")]
    RateLimited,

    #[error(transparent)]
    Intake(#[from] IntakeError),

    #[error(transparent)]
    Remove(#[from] RemoveError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Quota(#[from] QuotaError),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::Intake(e) => intake_status(e),
            AppError::Remove(e) => match e {
                RemoveError::NotFound(_) => StatusCode::NOT_FOUND,
                RemoveError::NotOwner(_) => StatusCode::FORBIDDEN,
                RemoveError::InProgress(_) => StatusCode::CONFLICT,
                RemoveError::Io(_) | RemoveError::Db(_) | RemoveError::Quota(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            AppError::Pipeline(e) => match e {
                PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
                PipelineError::AlreadyProcessed { .. } => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Quota(e) => quota_status(e),
            AppError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn intake_status(e: &IntakeError) -> StatusCode {
    match e {
        IntakeError::SizeExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        IntakeError::InvalidType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        IntakeError::Unreadable => StatusCode::BAD_REQUEST,
        IntakeError::Duplicate { .. } => StatusCode::CONFLICT,
        IntakeError::Quota(q) => quota_status(q),
        IntakeError::SeriesNotFound(_) => StatusCode::NOT_FOUND,
        IntakeError::Io(_) | IntakeError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn quota_status(e: &QuotaError) -> StatusCode {
    match e {
        QuotaError::UploadNotAllowed(_) | QuotaError::StorageExceeded { .. } => {
            StatusCode::FORBIDDEN
        }
        QuotaError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        QuotaError::DailyLimitReached { .. } => StatusCode::TOO_MANY_REQUESTS,
        QuotaError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Internal details stay in the log.
        let message = if status.is_server_error() {
            tracing::error!("Request failed: {self}");
            "internal error".to_string()
        } else {
            self.to_string()
        };
        (
            status,
            axum::Json(serde_json::json!({ "success": false, "error": message })),
        )
            .into_response()
    }
}
