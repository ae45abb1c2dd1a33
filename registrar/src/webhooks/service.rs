//! Webhook operations outside the background loop: fan-out of new events into
//! deliveries, and the operator-facing retry, listing and re-enable actions.

use std::time::Duration;

use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use thiserror::Error;
use tracing::{info, instrument};
use utoipa::ToSchema;

use super::delivery::{self, SendOutcome};
use super::events::WebhookEventType;
use super::retry::RetryPolicy;
use crate::config::WebhookConfig;
use crate::db::errors::DbError;
use crate::db::handlers::Webhooks;
use crate::db::models::webhooks::{DeliveryStatus, WebhookDelivery, WebhookDeliveryCreateDBRequest, WebhookEndpoint};
use crate::types::{DeliveryId, EndpointId, EventId, RegistrationId, abbrev_uuid};

#[derive(Debug, Error)]
pub enum DeliveryRetryError {
    #[error("Webhook delivery not found")]
    NotFound,

    #[error("Webhook delivery cannot be retried: {reason}")]
    Ineligible { reason: String },

    #[error(transparent)]
    Database(#[from] DbError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<sqlx::Error> for DeliveryRetryError {
    fn from(err: sqlx::Error) -> Self {
        DbError::from(err).into()
    }
}

/// Result of one manual retry attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct RetryOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Create one pending delivery per active endpoint of `event_id` subscribed to
/// `event_type`. Runs on the caller's connection so it can share a transaction.
#[instrument(skip(conn, payload), fields(event_id = %abbrev_uuid(&event_id), registration_id = %abbrev_uuid(&registration_id)), err)]
pub async fn fan_out(
    conn: &mut PgConnection,
    event_id: EventId,
    registration_id: RegistrationId,
    event_type: WebhookEventType,
    payload: &serde_json::Value,
) -> Result<Vec<WebhookDelivery>, DbError> {
    let mut repo = Webhooks::new(conn);
    let endpoints = repo.list_active_endpoints_for_event(event_id, event_type.as_str()).await?;

    let mut deliveries = Vec::with_capacity(endpoints.len());
    for endpoint in endpoints.iter().filter(|e| e.accepts_event(event_type)) {
        let delivery = repo
            .create_delivery(&WebhookDeliveryCreateDBRequest {
                endpoint_id: endpoint.id,
                event_id,
                registration_id,
                event_type: event_type.as_str().to_string(),
                payload: payload.clone(),
            })
            .await?;
        deliveries.push(delivery);
    }

    Ok(deliveries)
}

/// Operator actions on deliveries and endpoints.
#[derive(Clone)]
pub struct WebhookDeliveryService {
    pool: PgPool,
    http_client: reqwest::Client,
    policy: RetryPolicy,
    circuit_breaker_threshold: i32,
    claim_timeout: Duration,
}

impl WebhookDeliveryService {
    pub fn new(pool: PgPool, config: &WebhookConfig) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            pool,
            http_client,
            policy: RetryPolicy::from_config(config),
            circuit_breaker_threshold: config.circuit_breaker_threshold,
            claim_timeout: config.claim_timeout,
        })
    }

    /// Make one immediate attempt at a failed or exhausted delivery.
    #[instrument(skip(self), fields(delivery_id = %abbrev_uuid(&id)), err)]
    pub async fn retry_delivery(&self, id: DeliveryId) -> Result<RetryOutcome, DeliveryRetryError> {
        let mut conn = self.pool.acquire().await?;

        let claimed = Webhooks::new(&mut conn).claim_for_manual_retry(id, self.claim_timeout).await?;
        let Some(claimed) = claimed else {
            return Err(self.explain_ineligible(&mut conn, id).await?);
        };

        let request = delivery::build_request(&claimed).map_err(|unsendable| DeliveryRetryError::Ineligible {
            reason: unsendable.reason().to_string(),
        })?;

        let outcome = delivery::send_once(&self.http_client, &request).await;
        delivery::record_outcome(&mut conn, &self.policy, self.circuit_breaker_threshold, &request, &outcome).await?;

        info!(
            delivery_id = %abbrev_uuid(&id),
            endpoint_id = %abbrev_uuid(&request.endpoint_id),
            success = matches!(outcome, SendOutcome::Success { .. }),
            "Manual webhook retry attempted"
        );

        Ok(match outcome {
            SendOutcome::Success { status_code } => RetryOutcome {
                success: true,
                status_code: Some(status_code),
                error: None,
            },
            SendOutcome::Failure { status_code, error } => RetryOutcome {
                success: false,
                status_code,
                error: Some(error),
            },
        })
    }

    async fn explain_ineligible(&self, conn: &mut PgConnection, id: DeliveryId) -> Result<DeliveryRetryError, DeliveryRetryError> {
        let Some(existing) = Webhooks::new(conn).get_delivery(id).await? else {
            return Ok(DeliveryRetryError::NotFound);
        };

        let reason = match existing.delivery_status() {
            DeliveryStatus::Delivered => "delivery already succeeded",
            DeliveryStatus::Pending => "delivery has not been attempted yet",
            DeliveryStatus::Failed | DeliveryStatus::Exhausted => "endpoint is disabled",
        };

        Ok(DeliveryRetryError::Ineligible {
            reason: reason.to_string(),
        })
    }

    /// Failed and exhausted deliveries for an event, newest first, with the total count.
    #[instrument(skip(self), fields(event_id = %abbrev_uuid(&event_id)), err)]
    pub async fn list_failed_for_event(&self, event_id: EventId, skip: i64, limit: i64) -> Result<(Vec<WebhookDelivery>, i64), DbError> {
        let mut conn = self.pool.acquire().await?;
        let mut repo = Webhooks::new(&mut conn);

        let deliveries = repo.list_failed_for_event(event_id, skip, limit).await?;
        let total = repo.count_failed_for_event(event_id).await?;

        Ok((deliveries, total))
    }

    /// Re-enable an endpoint and reset its circuit breaker.
    #[instrument(skip(self), fields(endpoint_id = %abbrev_uuid(&id)), err)]
    pub async fn enable_endpoint(&self, id: EndpointId) -> Result<Option<WebhookEndpoint>, DbError> {
        let mut conn = self.pool.acquire().await?;
        let endpoint = Webhooks::new(&mut conn).enable_endpoint(id).await?;

        if endpoint.is_some() {
            info!(endpoint_id = %abbrev_uuid(&id), "Webhook endpoint re-enabled");
        }

        Ok(endpoint)
    }
}
