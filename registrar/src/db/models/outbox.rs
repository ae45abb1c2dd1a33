//! Database model for the notification outbox.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::types::{EventId, OutboxId, RegistrationId};

/// Which side effect an outbox row stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxKind {
    /// Confirmation or cancellation email to the registrant
    Email,
    /// Fan-out into one webhook delivery per subscribed endpoint
    Webhook,
}

impl OutboxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Webhook => "webhook",
        }
    }
}

impl std::str::FromStr for OutboxKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(Self::Email),
            "webhook" => Ok(Self::Webhook),
            _ => Err(format!("Unknown outbox kind: {}", s)),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct OutboxMessage {
    pub id: OutboxId,
    pub kind: String,
    pub registration_id: RegistrationId,
    pub event_id: EventId,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub attempts: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl OutboxMessage {
    pub fn outbox_kind(&self) -> Result<OutboxKind, String> {
        self.kind.parse()
    }
}

#[derive(Debug, Clone)]
pub struct OutboxCreateDBRequest {
    pub kind: OutboxKind,
    pub registration_id: RegistrationId,
    pub event_id: EventId,
    pub event_type: String,
    pub payload: serde_json::Value,
}
