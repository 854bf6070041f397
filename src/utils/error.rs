use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::services::{AdmissionError, Rejection, TicketError};
use crate::store::StoreError;
use crate::utils::response::error as error_response;

const INVALID_TICKET_MESSAGE: &str = "Invalid ticket code";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Business-rule violation with enough structure for a specific UI message.
    #[error("Conflict: {message}")]
    Conflict {
        code: &'static str,
        message: String,
        details: Value,
    },

    /// Signature, unknown, replayed or revoked ticket. The reason is logged only.
    #[error("Invalid ticket: {0}")]
    SecurityInvalid(&'static str),

    #[error("Ticket expired")]
    Expired,

    #[error("Database error")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Internal server error")]
    InternalServerError(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::AuthError(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::SecurityInvalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Expired => StatusCode::GONE,
            AppError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidRequest(_) => "INVALID_REQUEST",
            AppError::AuthError(_) => "AUTH_ERROR",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict { code, .. } => *code,
            AppError::SecurityInvalid(_) => "INVALID_TICKET",
            AppError::Expired => "TICKET_EXPIRED",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    fn log(&self) {
        match self {
            AppError::InvalidRequest(msg) | AppError::Forbidden(msg) | AppError::AuthError(msg) => {
                info!(code = self.code(), message = %msg, "Request rejected");
            }
            AppError::Conflict { message, .. } => {
                info!(code = self.code(), message = %message, "Business rule violation");
            }
            AppError::Expired => info!("Expired ticket presented"),
            AppError::SecurityInvalid(reason) => {
                warn!(reason = %reason, "Ticket failed security validation");
            }
            AppError::NotFound(msg) => warn!(message = %msg, "Resource not found"),
            AppError::InternalServerError(msg) => {
                error!(error = ?self, message = %msg, "Application error");
            }
            AppError::DatabaseError(e) => {
                error!(error = ?e, "Database error");
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        // Log internal details
        self.log();

        // Only expose high-level message to the client
        let (public_message, details) = match self {
            AppError::InvalidRequest(msg)
            | AppError::AuthError(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg) => (msg, None),
            AppError::Conflict {
                message, details, ..
            } => (message, Some(details)),
            AppError::SecurityInvalid(_) => (INVALID_TICKET_MESSAGE.to_string(), None),
            AppError::Expired => (
                "This ticket has expired, please request a new one".to_string(),
                None,
            ),
            AppError::DatabaseError(_) => ("A database error occurred".to_string(), None),
            AppError::InternalServerError(_) => ("An internal error occurred".to_string(), None),
        };

        error_response(code, public_message, details, status)
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Database(e) => AppError::DatabaseError(e),
            other => AppError::InternalServerError(other.to_string()),
        }
    }
}

impl From<AdmissionError> for AppError {
    fn from(err: AdmissionError) -> Self {
        let message = err.to_string();
        match err {
            AdmissionError::InvalidRequest(msg) => AppError::InvalidRequest(msg),
            AdmissionError::DuplicateEnrollment { activity_id } => AppError::Conflict {
                code: "DUPLICATE_ENROLLMENT",
                message,
                details: json!({ "activity_id": activity_id }),
            },
            AdmissionError::TimeConflict { first, second } => AppError::Conflict {
                code: "TIME_CONFLICT",
                message,
                details: json!({ "activity_ids": [first, second] }),
            },
            AdmissionError::CapacityExceeded {
                activity_id,
                capacity,
            } => AppError::Conflict {
                code: "CAPACITY_EXCEEDED",
                message,
                details: json!({ "activity_id": activity_id, "capacity": capacity }),
            },
            AdmissionError::NotFound(_) => AppError::NotFound(message),
            AdmissionError::Forbidden(_) => AppError::Forbidden(message),
            AdmissionError::Store(e) => e.into(),
        }
    }
}

impl From<TicketError> for AppError {
    fn from(err: TicketError) -> Self {
        let message = err.to_string();
        match err {
            TicketError::Rejected(Rejection::Expired) => AppError::Expired,
            TicketError::Rejected(reason) => AppError::SecurityInvalid(reason.as_str()),
            TicketError::UserNotFound(_)
            | TicketError::ActivityNotFound(_)
            | TicketError::EnrollmentNotFound { .. } => AppError::NotFound(message),
            TicketError::ActivityNotPublished(_) | TicketError::InvalidRequest(_) => {
                AppError::InvalidRequest(message)
            }
            TicketError::Codec(e) => AppError::InternalServerError(e.to_string()),
            TicketError::Store(e) => e.into(),
        }
    }
}
