//! API models for webhook delivery administration.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::db::models::webhooks::{WebhookDelivery, WebhookEndpoint};
use crate::types::{DeliveryId, EndpointId, EventId, RegistrationId};

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WebhookDeliveryResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: DeliveryId,
    #[schema(value_type = String, format = "uuid")]
    pub endpoint_id: EndpointId,
    #[schema(value_type = String, format = "uuid")]
    pub registration_id: RegistrationId,
    pub event_type: String,
    /// `failed` (will be retried) or `exhausted` (given up)
    pub status: String,
    pub retry_count: i32,
    pub next_retry_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_status_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<WebhookDelivery> for WebhookDeliveryResponse {
    fn from(delivery: WebhookDelivery) -> Self {
        Self {
            id: delivery.id,
            endpoint_id: delivery.endpoint_id,
            registration_id: delivery.registration_id,
            event_type: delivery.event_type,
            status: delivery.status,
            retry_count: delivery.retry_count,
            next_retry_at: delivery.next_retry_at,
            last_status_code: delivery.last_status_code,
            last_error: delivery.last_error,
            created_at: delivery.created_at,
        }
    }
}

/// Endpoint state after an operator action. The auth header is never returned.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WebhookEndpointResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: EndpointId,
    #[schema(value_type = String, format = "uuid")]
    pub event_id: EventId,
    pub url: String,
    pub is_active: bool,
    pub consecutive_failure_periods: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl From<WebhookEndpoint> for WebhookEndpointResponse {
    fn from(endpoint: WebhookEndpoint) -> Self {
        Self {
            id: endpoint.id,
            event_id: endpoint.event_id,
            url: endpoint.url,
            is_active: endpoint.is_active,
            consecutive_failure_periods: endpoint.consecutive_failure_periods,
            last_failure_at: endpoint.last_failure_at,
        }
    }
}
