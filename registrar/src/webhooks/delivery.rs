//! Building, sending, and recording a single delivery attempt.
//!
//! Shared by the background [`super::WebhookDispatcher`] and the operator
//! triggered [`super::WebhookDeliveryService::retry_delivery`].

use chrono::Utc;
use metrics::counter;
use sqlx::PgConnection;
use tracing::{debug, warn};

use super::retry::RetryPolicy;
use crate::db::errors::Result;
use crate::db::handlers::Webhooks;
use crate::db::models::webhooks::{ClaimedDelivery, DeliveryStatus};
use crate::types::{DeliveryId, EndpointId, abbrev_uuid};

/// A fully built webhook HTTP request ready to send.
#[derive(Debug)]
pub(crate) struct WebhookSendRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub delivery_id: DeliveryId,
    pub endpoint_id: EndpointId,
    pub status: DeliveryStatus,
    pub retry_count: i32,
}

/// Outcome of a single HTTP send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SendOutcome {
    Success { status_code: u16 },
    Failure { status_code: Option<u16>, error: String },
}

/// Why a claimed delivery cannot be attempted at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Unsendable {
    EndpointMissing,
    EndpointDisabled,
    BadPayload,
}

impl Unsendable {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::EndpointMissing => "endpoint no longer exists",
            Self::EndpointDisabled => "endpoint is disabled",
            Self::BadPayload => "payload could not be serialized",
        }
    }
}

/// Turn a claimed row into a request.
pub(crate) fn build_request(delivery: &ClaimedDelivery) -> std::result::Result<WebhookSendRequest, Unsendable> {
    let (Some(url), Some(active)) = (&delivery.endpoint_url, delivery.endpoint_active) else {
        return Err(Unsendable::EndpointMissing);
    };
    if !active {
        return Err(Unsendable::EndpointDisabled);
    }

    let body = serde_json::to_string(&delivery.payload).map_err(|_| Unsendable::BadPayload)?;

    let mut headers = vec![
        ("Content-Type".to_string(), "application/json".to_string()),
        ("webhook-id".to_string(), delivery.id.to_string()),
        ("webhook-timestamp".to_string(), Utc::now().timestamp().to_string()),
    ];
    if let Some(auth) = &delivery.endpoint_auth_header {
        headers.push(("Authorization".to_string(), auth.clone()));
    }

    Ok(WebhookSendRequest {
        url: url.clone(),
        headers,
        body,
        delivery_id: delivery.id,
        endpoint_id: delivery.endpoint_id,
        status: delivery.delivery_status(),
        retry_count: delivery.retry_count,
    })
}

/// POST the request once. Any 2xx is success; everything else, including
/// timeouts and connection errors, is a failure.
pub(crate) async fn send_once(client: &reqwest::Client, request: &WebhookSendRequest) -> SendOutcome {
    let mut req_builder = client.post(&request.url);
    for (name, value) in &request.headers {
        req_builder = req_builder.header(name, value);
    }

    match req_builder.body(request.body.clone()).send().await {
        Ok(response) => {
            let status_code = response.status().as_u16();
            if response.status().is_success() {
                SendOutcome::Success { status_code }
            } else {
                SendOutcome::Failure {
                    status_code: Some(status_code),
                    error: format!("HTTP {}", status_code),
                }
            }
        }
        Err(e) => SendOutcome::Failure {
            status_code: None,
            error: e.to_string(),
        },
    }
}

/// Persist the outcome of an attempt, including circuit breaker bookkeeping.
///
/// Returns the delivery's new status, or `None` if the row was already
/// delivered or deleted by the time the result arrived.
pub(crate) async fn record_outcome(
    conn: &mut PgConnection,
    policy: &RetryPolicy,
    circuit_breaker_threshold: i32,
    request: &WebhookSendRequest,
    outcome: &SendOutcome,
) -> Result<Option<DeliveryStatus>> {
    let mut repo = Webhooks::new(conn);

    match outcome {
        SendOutcome::Success { status_code } => {
            counter!("registrar_webhook_deliveries_total", "outcome" => "delivered").increment(1);
            let delivered = repo.mark_delivered(request.delivery_id, i32::from(*status_code)).await?;
            repo.reset_failures(request.endpoint_id).await?;
            debug!(
                delivery_id = %abbrev_uuid(&request.delivery_id),
                endpoint_id = %abbrev_uuid(&request.endpoint_id),
                status = status_code,
                "Webhook delivered"
            );
            Ok(delivered.map(|_| DeliveryStatus::Delivered))
        }
        SendOutcome::Failure { status_code, error } => {
            let record = policy.on_failure(request.status, request.retry_count);
            let next_retry_at = Utc::now() + policy.backoff_delay(request.retry_count + 1);

            let updated = repo
                .mark_failed(
                    request.delivery_id,
                    record.status,
                    next_retry_at,
                    status_code.map(i32::from),
                    error,
                )
                .await?;

            if updated.is_none() {
                debug!(delivery_id = %abbrev_uuid(&request.delivery_id), "Delivery settled while attempt was in flight");
                return Ok(None);
            }

            counter!("registrar_webhook_deliveries_total", "outcome" => record.status.as_str()).increment(1);
            warn!(
                delivery_id = %abbrev_uuid(&request.delivery_id),
                endpoint_id = %abbrev_uuid(&request.endpoint_id),
                status_code = ?status_code,
                error = %error,
                new_status = record.status.as_str(),
                "Webhook delivery failed"
            );

            if record.became_exhausted {
                // None: endpoint deleted while the delivery was in flight
                if let Some(endpoint) = repo.record_failure_period(request.endpoint_id, circuit_breaker_threshold).await?
                    && !endpoint.is_active
                {
                    warn!(
                        endpoint_id = %abbrev_uuid(&endpoint.id),
                        failure_periods = endpoint.consecutive_failure_periods,
                        "Webhook endpoint disabled after repeated exhausted deliveries"
                    );
                }
            }

            Ok(Some(record.status))
        }
    }
}
