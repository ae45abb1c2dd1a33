//! Database models for referral codes and their usages.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::types::{EventId, ReferralId, RegistrationId};

/// The shareable referral code owned by one registration.
#[derive(Debug, Clone, FromRow)]
pub struct Referral {
    pub id: ReferralId,
    pub event_id: EventId,
    pub registration_id: RegistrationId,
    pub code: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Attribution of one new registration to a referral. Never mutated.
#[derive(Debug, Clone, FromRow)]
pub struct ReferralUsage {
    pub id: Uuid,
    pub referral_id: ReferralId,
    pub registration_id: RegistrationId,
    pub event_id: EventId,
    pub created_at: DateTime<Utc>,
}
