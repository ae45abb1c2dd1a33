use axum::http::StatusCode;
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::db::errors::DbError;
use crate::db::handlers::registrations::ACTIVE_EMAIL_UNIQUE_INDEX;

/// A single form field that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Every way a registration or cancellation can be refused.
///
/// Invitation code failures are deliberately coarse: the gate's reason
/// (expired, wrong ticket, ...) is logged but never surfaced.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("Event not found")]
    EventNotFound,

    #[error("Event is not open for registration")]
    EventNotActive,

    #[error("Ticket not found")]
    TicketNotFound,

    #[error("Ticket is not on sale")]
    TicketNotOnSale,

    #[error("Ticket is sold out")]
    TicketSoldOut,

    #[error("Already registered for this event")]
    AlreadyRegistered,

    /// The unique index caught a duplicate that slipped past the explicit checks.
    #[error("A registration with this email already exists for this event")]
    DuplicateEmail,

    #[error("An invitation code is required for this ticket")]
    InvitationCodeRequired,

    #[error("Invitation code is not valid")]
    InvitationCodeInvalid,

    #[error("Invitation code has been fully redeemed")]
    InvitationCodeExhausted,

    #[error("Phone verification is required for this ticket")]
    SmsVerificationRequired,

    #[error("Referral code is not valid")]
    ReferralCodeInvalid,

    #[error("Form validation failed")]
    FormValidationFailed { errors: Vec<FieldError> },

    /// Lost a serialization race against a concurrent transaction.
    #[error("Registration conflicted with a concurrent request, please retry")]
    TransactionConflict,

    #[error("Registration not found")]
    RegistrationNotFound,

    #[error("Registration is already cancelled")]
    AlreadyCancelled,

    #[error("Registration is not confirmed")]
    RegistrationNotConfirmed,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl RegistrationError {
    /// Stable machine-readable code for API clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::EventNotFound => "event_not_found",
            Self::EventNotActive => "event_not_active",
            Self::TicketNotFound => "ticket_not_found",
            Self::TicketNotOnSale => "ticket_not_on_sale",
            Self::TicketSoldOut => "ticket_sold_out",
            Self::AlreadyRegistered => "already_registered",
            Self::DuplicateEmail => "duplicate_email",
            Self::InvitationCodeRequired => "invitation_code_required",
            Self::InvitationCodeInvalid => "invitation_code_invalid",
            Self::InvitationCodeExhausted => "invitation_code_exhausted",
            Self::SmsVerificationRequired => "sms_verification_required",
            Self::ReferralCodeInvalid => "referral_code_invalid",
            Self::FormValidationFailed { .. } => "form_validation_failed",
            Self::TransactionConflict => "transaction_conflict",
            Self::RegistrationNotFound => "registration_not_found",
            Self::AlreadyCancelled => "already_cancelled",
            Self::RegistrationNotConfirmed => "registration_not_confirmed",
            Self::Internal(_) => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::AlreadyRegistered
            | Self::TicketSoldOut
            | Self::InvitationCodeExhausted
            | Self::DuplicateEmail
            | Self::TransactionConflict
            | Self::AlreadyCancelled
            | Self::RegistrationNotConfirmed => StatusCode::CONFLICT,
            Self::TicketNotOnSale
            | Self::InvitationCodeRequired
            | Self::InvitationCodeInvalid
            | Self::ReferralCodeInvalid
            | Self::EventNotActive => StatusCode::BAD_REQUEST,
            Self::FormValidationFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::SmsVerificationRequired => StatusCode::FORBIDDEN,
            Self::EventNotFound | Self::TicketNotFound | Self::RegistrationNotFound => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Only a lost serialization race is worth retrying unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransactionConflict)
    }

    /// Label for the `registrar_registrations_total` counter.
    pub fn outcome(&self) -> &'static str {
        self.code()
    }
}

impl From<DbError> for RegistrationError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::SerializationFailure { .. } => Self::TransactionConflict,
            e if e.is_unique_violation_of(ACTIVE_EMAIL_UNIQUE_INDEX) => Self::DuplicateEmail,
            DbError::Other(e) => Self::Internal(e),
            other => Self::Internal(anyhow::Error::new(other)),
        }
    }
}

impl From<sqlx::Error> for RegistrationError {
    fn from(err: sqlx::Error) -> Self {
        DbError::from(err).into()
    }
}
