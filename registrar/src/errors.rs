use crate::db::errors::DbError;
use crate::registration::errors::{FieldError, RegistrationError};
use crate::webhooks::DeliveryRetryError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error as ThisError;
use utoipa::ToSchema;

#[derive(ThisError, Debug)]
pub enum Error {
    /// No identity header on a route that needs one
    #[error("Not authenticated")]
    Unauthenticated { message: Option<String> },

    /// Authenticated, but not allowed to do this
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    /// Invalid request data
    #[error("{message}")]
    BadRequest { message: String },

    /// Unknown id, or one the caller may not see
    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    /// A named step failed; details stay in the logs
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Refused registration or cancellation
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    /// Refused manual webhook retry
    #[error(transparent)]
    DeliveryRetry(#[from] DeliveryRetryError),

    /// Raw repository error not mapped by a service
    #[error(transparent)]
    Database(#[from] DbError),

    /// Anything else, logged with its context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// JSON body of every error response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Stable machine-readable code, e.g. `ticket_sold_out`
    pub code: String,
    pub message: String,
    /// Whether repeating the same request may succeed
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Error::Forbidden { .. } => StatusCode::FORBIDDEN,
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Registration(e) => e.status_code(),
            Error::DeliveryRetry(e) => match e {
                DeliveryRetryError::NotFound => StatusCode::NOT_FOUND,
                DeliveryRetryError::Ineligible { .. } => StatusCode::CONFLICT,
                DeliveryRetryError::Database(_) | DeliveryRetryError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Database(db_err) => match db_err {
                DbError::NotFound => StatusCode::NOT_FOUND,
                DbError::UniqueViolation { .. } => StatusCode::CONFLICT,
                DbError::SerializationFailure { .. } => StatusCode::CONFLICT,
                DbError::ForeignKeyViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::CheckViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Error::Unauthenticated { .. } => "unauthenticated",
            Error::Forbidden { .. } => "forbidden",
            Error::BadRequest { .. } => "bad_request",
            Error::NotFound { .. } => "not_found",
            Error::Registration(e) => e.code(),
            Error::DeliveryRetry(DeliveryRetryError::NotFound) => "delivery_not_found",
            Error::DeliveryRetry(DeliveryRetryError::Ineligible { .. }) => "delivery_not_retryable",
            Error::Database(DbError::NotFound) => "not_found",
            Error::Database(DbError::UniqueViolation { .. }) => "already_exists",
            Error::Database(DbError::SerializationFailure { .. }) => "transaction_conflict",
            Error::Database(DbError::ForeignKeyViolation { .. } | DbError::CheckViolation { .. }) => "invalid_data",
            Error::Internal { .. } | Error::DeliveryRetry(_) | Error::Database(DbError::Other(_)) | Error::Other(_) => "internal",
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Registration(e) => e.is_retryable(),
            Error::Database(DbError::SerializationFailure { .. }) => true,
            _ => false,
        }
    }

    /// Message safe to show to the caller. Server-side failures get a generic text.
    pub fn user_message(&self) -> String {
        match self {
            Error::Unauthenticated { message } => message.clone().unwrap_or_else(|| "Authentication required".to_string()),
            Error::Forbidden { message } => message.clone(),
            Error::BadRequest { message } => message.clone(),
            Error::NotFound { resource, id } => {
                format!("{resource} with ID {id} not found")
            }
            Error::Registration(RegistrationError::Internal(_)) => "Internal server error".to_string(),
            Error::Registration(e) => e.to_string(),
            Error::DeliveryRetry(e @ (DeliveryRetryError::NotFound | DeliveryRetryError::Ineligible { .. })) => e.to_string(),
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "Resource not found".to_string(),
                DbError::UniqueViolation { .. } => "Resource already exists".to_string(),
                DbError::SerializationFailure { .. } => "Request conflicted with a concurrent request, please retry".to_string(),
                DbError::ForeignKeyViolation { .. } => "Invalid reference to related resource".to_string(),
                DbError::CheckViolation { .. } => "Invalid data provided".to_string(),
                DbError::Other(_) => "Database error occurred".to_string(),
            },
            Error::Internal { .. } | Error::DeliveryRetry(_) | Error::Other(_) => "Internal server error".to_string(),
        }
    }

    fn body(&self) -> ErrorBody {
        let errors = match self {
            Error::Registration(RegistrationError::FormValidationFailed { errors }) => Some(errors.clone()),
            _ => None,
        };

        ErrorBody {
            code: self.code().to_string(),
            message: self.user_message(),
            retryable: self.is_retryable(),
            errors,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // 5xx at error, refusals the caller can act on at lower levels
        if status.is_server_error() {
            tracing::error!(code = self.code(), "Request failed: {:#}", self);
        } else {
            match &self {
                Error::Unauthenticated { .. } | Error::Forbidden { .. } => {
                    tracing::info!(code = self.code(), "Access refused: {}", self);
                }
                Error::Registration(e) if e.is_retryable() => {
                    tracing::info!(code = self.code(), "Retryable refusal: {}", self);
                }
                Error::Database(_) => {
                    tracing::warn!(code = self.code(), "Database constraint refused request: {}", self);
                }
                _ => {
                    tracing::debug!(code = self.code(), "Request refused: {}", self);
                }
            }
        }

        (status, Json(self.body())).into_response()
    }
}

/// Result type returned by handlers and services.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_conflict_is_only_retryable_registration_error() {
        let conflict = Error::from(RegistrationError::TransactionConflict);
        assert_eq!(conflict.status_code(), StatusCode::CONFLICT);
        assert!(conflict.body().retryable);

        let sold_out = Error::from(RegistrationError::TicketSoldOut);
        assert_eq!(sold_out.status_code(), StatusCode::CONFLICT);
        assert!(!sold_out.body().retryable);
        assert_eq!(sold_out.body().code, "ticket_sold_out");
    }

    #[test]
    fn test_form_errors_are_listed() {
        let err = Error::from(RegistrationError::FormValidationFailed {
            errors: vec![FieldError::new("company", "is required")],
        });
        let body = serde_json::to_value(err.body()).unwrap();

        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["code"], "form_validation_failed");
        assert_eq!(body["errors"][0]["field"], "company");
    }

    #[test]
    fn test_internal_details_are_hidden() {
        let err = Error::from(RegistrationError::Internal(anyhow::anyhow!("connection reset by peer")));
        let body = serde_json::to_value(err.body()).unwrap();

        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Internal server error");
        assert!(body.get("errors").is_none());
    }

    #[test]
    fn test_delivery_retry_mapping() {
        assert_eq!(Error::from(DeliveryRetryError::NotFound).status_code(), StatusCode::NOT_FOUND);

        let ineligible = Error::from(DeliveryRetryError::Ineligible {
            reason: "delivery already delivered".to_string(),
        });
        assert_eq!(ineligible.status_code(), StatusCode::CONFLICT);
        assert!(ineligible.user_message().contains("already delivered"));
    }
}
