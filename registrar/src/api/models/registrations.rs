//! API models for registrations and referral codes.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::db::models::referrals::Referral;
use crate::db::models::registrations::{Registration, RegistrationStatus};
use crate::types::{EventId, InvitationCodeId, RegistrationId, TicketId};

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RegistrationResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: RegistrationId,
    #[schema(value_type = String, format = "uuid")]
    pub event_id: EventId,
    #[schema(value_type = String, format = "uuid")]
    pub ticket_id: TicketId,
    pub email: String,
    pub status: RegistrationStatus,
    /// Set when an invitation code was redeemed for this registration
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>, format = "uuid")]
    pub invitation_code_id: Option<InvitationCodeId>,
    #[schema(value_type = Object)]
    pub form_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl From<Registration> for RegistrationResponse {
    fn from(registration: Registration) -> Self {
        Self {
            status: registration.registration_status(),
            id: registration.id,
            event_id: registration.event_id,
            ticket_id: registration.ticket_id,
            email: registration.email,
            invitation_code_id: registration.invitation_code_id,
            form_data: registration.form_data,
            created_at: registration.created_at,
            cancelled_at: registration.cancelled_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ReferralResponse {
    /// Code to share; new registrants pass it as `referral_code`
    pub code: String,
    #[schema(value_type = String, format = "uuid")]
    pub registration_id: RegistrationId,
    #[schema(value_type = String, format = "uuid")]
    pub event_id: EventId,
    pub created_at: DateTime<Utc>,
}

impl From<Referral> for ReferralResponse {
    fn from(referral: Referral) -> Self {
        Self {
            code: referral.code,
            registration_id: referral.registration_id,
            event_id: referral.event_id,
            created_at: referral.created_at,
        }
    }
}
