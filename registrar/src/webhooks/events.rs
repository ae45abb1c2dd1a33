//! Webhook event types and payload builders.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::notifications::RegistrationSnapshot;
use crate::types::{EventId, RegistrationId, TicketId};

/// Registration lifecycle events that subscribers can receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventType {
    /// A registration was committed
    RegistrationConfirmed,
    /// A confirmed registration was cancelled
    RegistrationCancelled,
}

impl WebhookEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RegistrationConfirmed => "registration_confirmed",
            Self::RegistrationCancelled => "registration_cancelled",
        }
    }
}

impl std::fmt::Display for WebhookEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WebhookEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "registration_confirmed" => Ok(Self::RegistrationConfirmed),
            "registration_cancelled" => Ok(Self::RegistrationCancelled),
            _ => Err(format!("Unknown event type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegistrationData {
    #[schema(value_type = String, format = "uuid")]
    pub id: RegistrationId,
    pub status: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TicketData {
    #[schema(value_type = String, format = "uuid")]
    pub id: TicketId,
    pub name: String,
    #[schema(value_type = String)]
    pub price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EventData {
    #[schema(value_type = String, format = "uuid")]
    pub id: EventId,
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegistrationEventData {
    pub registration: RegistrationData,
    pub ticket: TicketData,
    pub event: EventData,
}

/// Complete webhook event payload, serialized as the request body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookEvent {
    /// Event type (e.g., "registration_confirmed")
    #[serde(rename = "type")]
    pub event_type: WebhookEventType,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    pub data: RegistrationEventData,
}

impl WebhookEvent {
    pub fn registration(event_type: WebhookEventType, snapshot: &RegistrationSnapshot<'_>) -> Self {
        let RegistrationSnapshot {
            registration,
            ticket,
            event,
        } = snapshot;

        Self {
            event_type,
            timestamp: Utc::now(),
            data: RegistrationEventData {
                registration: RegistrationData {
                    id: registration.id,
                    status: registration.status.clone(),
                    email: registration.email.clone(),
                    created_at: registration.created_at,
                },
                ticket: TicketData {
                    id: ticket.id,
                    name: ticket.name.clone(),
                    price: ticket.price,
                },
                event: EventData {
                    id: event.id,
                    name: event.name.clone(),
                    slug: event.slug.clone(),
                },
            },
        }
    }
}
