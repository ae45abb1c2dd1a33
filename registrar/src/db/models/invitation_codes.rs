//! Database model for invitation codes.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::types::{EventId, InvitationCodeId, TicketId};

/// An invitation code scoped to one event and one ticket type.
///
/// `usage_limit = None` means the code can be redeemed any number of times.
#[derive(Debug, Clone, FromRow)]
pub struct InvitationCode {
    pub id: InvitationCodeId,
    pub event_id: EventId,
    pub ticket_id: TicketId,
    pub code: String,
    pub usage_limit: Option<i32>,
    pub used_count: i32,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InvitationCode {
    pub fn is_exhausted(&self) -> bool {
        self.usage_limit.is_some_and(|limit| self.used_count >= limit)
    }
}
