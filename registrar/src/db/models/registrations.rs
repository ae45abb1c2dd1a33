//! Database model for registrations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use crate::types::{EventId, InvitationCodeId, RegistrationId, TicketId};

/// Lifecycle of a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl RegistrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RegistrationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Unknown registration status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Registration {
    pub id: RegistrationId,
    pub event_id: EventId,
    pub ticket_id: TicketId,
    pub invitation_code_id: Option<InvitationCodeId>,
    pub email: String,
    pub status: String,
    pub form_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Registration {
    /// Get the parsed registration status.
    pub fn registration_status(&self) -> RegistrationStatus {
        self.status.parse().unwrap_or(RegistrationStatus::Pending)
    }
}

/// Insert request for a new registration row.
#[derive(Debug, Clone)]
pub struct RegistrationCreateDBRequest {
    pub event_id: EventId,
    pub ticket_id: TicketId,
    pub invitation_code_id: Option<InvitationCodeId>,
    pub email: String,
    pub status: RegistrationStatus,
    pub form_data: serde_json::Value,
}
