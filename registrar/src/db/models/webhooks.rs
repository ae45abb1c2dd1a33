//! Database models for webhook endpoints and delivery tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use crate::types::{DeliveryId, EndpointId, EventId, RegistrationId};
use crate::webhooks::WebhookEventType;

/// A subscriber endpoint configured for one event.
#[derive(Debug, Clone, FromRow)]
pub struct WebhookEndpoint {
    pub id: EndpointId,
    pub event_id: EventId,
    pub url: String,
    pub auth_header: Option<String>,
    pub event_types: Option<serde_json::Value>,
    pub is_active: bool,
    pub consecutive_failure_periods: i32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookEndpoint {
    /// Whether a new delivery of `event_type` should be queued for this endpoint.
    ///
    /// `event_types` filters by name when it is a JSON array. A missing or
    /// malformed filter subscribes the endpoint to everything.
    pub fn accepts_event(&self, event_type: WebhookEventType) -> bool {
        if !self.is_active {
            return false;
        }

        match self.event_types.as_ref().and_then(serde_json::Value::as_array) {
            Some(subscribed) => subscribed.iter().filter_map(serde_json::Value::as_str).any(|name| name == event_type.as_str()),
            None => true,
        }
    }
}

/// Lifecycle of one delivery row. Stored as lowercase text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// Not attempted yet
    Pending,
    /// Endpoint answered 2xx
    Delivered,
    /// Last attempt failed, another is scheduled
    Failed,
    /// No further automatic attempts
    Exhausted,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Exhausted => "exhausted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Exhausted)
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "delivered" => Ok(Self::Delivered),
            "failed" => Ok(Self::Failed),
            "exhausted" => Ok(Self::Exhausted),
            other => Err(format!("not a delivery status: {other}")),
        }
    }
}

/// Database model for a webhook delivery and its attempt history.
#[derive(Debug, Clone, FromRow)]
pub struct WebhookDelivery {
    pub id: DeliveryId,
    pub endpoint_id: EndpointId,
    pub event_id: EventId,
    pub registration_id: RegistrationId,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub retry_count: i32,
    pub next_retry_at: DateTime<Utc>,
    pub last_status_code: Option<i32>,
    pub last_error: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookDelivery {
    pub fn delivery_status(&self) -> DeliveryStatus {
        self.status.parse().unwrap_or(DeliveryStatus::Pending)
    }
}

/// A delivery claimed for sending, joined with its endpoint.
///
/// The endpoint columns are `None` when the endpoint row no longer exists.
#[derive(Debug, Clone, FromRow)]
pub struct ClaimedDelivery {
    pub id: DeliveryId,
    pub endpoint_id: EndpointId,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub retry_count: i32,
    pub endpoint_url: Option<String>,
    pub endpoint_auth_header: Option<String>,
    pub endpoint_active: Option<bool>,
}

impl ClaimedDelivery {
    pub fn delivery_status(&self) -> DeliveryStatus {
        self.status.parse().unwrap_or(DeliveryStatus::Pending)
    }
}

/// Row inserted by fan-out, one per subscribed endpoint.
#[derive(Debug, Clone)]
pub struct WebhookDeliveryCreateDBRequest {
    pub endpoint_id: EndpointId,
    pub event_id: EventId,
    pub registration_id: RegistrationId,
    pub event_type: String,
    pub payload: serde_json::Value,
}

/// Result of recording a failed attempt against a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureRecord {
    pub status: DeliveryStatus,
    /// True when this attempt moved the delivery from retryable into `exhausted`.
    pub became_exhausted: bool,
}
