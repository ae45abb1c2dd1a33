//! Invitation code evaluation.
//!
//! [`evaluate`] is a pure function over a loaded code row so the ordering of
//! checks can be tested without a database. [`apply_policy`] turns the result
//! into the caller-facing decision given whether the ticket requires a code.

use chrono::{DateTime, Utc};
use tracing::debug;

use super::errors::RegistrationError;
use crate::db::models::invitation_codes::InvitationCode;
use crate::types::{InvitationCodeId, TicketId};

/// Why a code was (not) accepted. Checks run in declaration order and the
/// first failing one wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeValidation {
    NotFound,
    Inactive,
    NotYetValid,
    Expired,
    WrongTicket,
    UsageExhausted,
    Valid,
}

impl CodeValidation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Inactive => "inactive",
            Self::NotYetValid => "not_yet_valid",
            Self::Expired => "expired",
            Self::WrongTicket => "wrong_ticket",
            Self::UsageExhausted => "usage_exhausted",
            Self::Valid => "valid",
        }
    }
}

pub fn evaluate(code: Option<&InvitationCode>, ticket_id: TicketId, now: DateTime<Utc>) -> CodeValidation {
    let Some(code) = code else {
        return CodeValidation::NotFound;
    };

    if !code.is_active {
        CodeValidation::Inactive
    } else if code.valid_from.is_some_and(|from| now < from) {
        CodeValidation::NotYetValid
    } else if code.valid_until.is_some_and(|until| now > until) {
        CodeValidation::Expired
    } else if code.ticket_id != ticket_id {
        CodeValidation::WrongTicket
    } else if code.is_exhausted() {
        CodeValidation::UsageExhausted
    } else {
        CodeValidation::Valid
    }
}

/// What the coordinator should do with the submitted code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeDecision {
    /// Consume this code inside the transaction.
    Consume(InvitationCodeId),
    /// Proceed without touching any code.
    Skip,
}

/// Apply the ticket's code policy to a validation result.
///
/// `supplied` is false when the registrant did not send a code at all. When
/// the ticket does not require a code, a bad bonus code is dropped rather than
/// failing the registration.
pub fn apply_policy(
    require_invite_code: bool,
    supplied: bool,
    validation: CodeValidation,
    code_id: Option<InvitationCodeId>,
) -> Result<CodeDecision, RegistrationError> {
    match (validation, code_id) {
        (CodeValidation::Valid, Some(id)) => Ok(CodeDecision::Consume(id)),
        _ if !require_invite_code => {
            if supplied {
                debug!(reason = validation.as_str(), "Ignoring invalid invitation code on ticket that does not require one");
            }
            Ok(CodeDecision::Skip)
        }
        _ if !supplied => Err(RegistrationError::InvitationCodeRequired),
        (CodeValidation::UsageExhausted, _) => Err(RegistrationError::InvitationCodeExhausted),
        _ => {
            debug!(reason = validation.as_str(), "Rejected invitation code");
            Err(RegistrationError::InvitationCodeInvalid)
        }
    }
}
