//! Database model for events.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::types::EventId;

/// An event that tickets are sold for.
///
/// `form_schema` holds the registration form definition as a JSON array of
/// field objects; see [`crate::registration::form`] for the accepted shape.
#[derive(Debug, Clone, FromRow)]
pub struct Event {
    pub id: EventId,
    pub name: String,
    pub slug: String,
    pub is_active: bool,
    pub form_schema: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
