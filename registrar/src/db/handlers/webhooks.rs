//! Database repository for webhook endpoints and delivery tracking.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tracing::instrument;

use crate::db::errors::Result;
use crate::db::models::webhooks::{
    ClaimedDelivery, DeliveryStatus, WebhookDelivery, WebhookDeliveryCreateDBRequest, WebhookEndpoint,
};
use crate::types::{DeliveryId, EndpointId, EventId, abbrev_uuid};

/// Repository for webhook operations.
pub struct Webhooks<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Webhooks<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    // ===== Endpoint methods =====

    #[instrument(skip(self), fields(endpoint_id = %abbrev_uuid(&id)), err)]
    pub async fn get_endpoint(&mut self, id: EndpointId) -> Result<Option<WebhookEndpoint>> {
        let endpoint = sqlx::query_as::<_, WebhookEndpoint>("SELECT * FROM webhook_endpoints WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(endpoint)
    }

    /// Active endpoints of an event subscribed to `event_type` (or to everything).
    #[instrument(skip(self), fields(event_id = %abbrev_uuid(&event_id)), err)]
    pub async fn list_active_endpoints_for_event(&mut self, event_id: EventId, event_type: &str) -> Result<Vec<WebhookEndpoint>> {
        let endpoints = sqlx::query_as::<_, WebhookEndpoint>(
            r#"
            SELECT * FROM webhook_endpoints
            WHERE event_id = $1
              AND is_active = true
              AND (
                  event_types IS NULL
                  OR event_types @> $2::jsonb
              )
            ORDER BY created_at ASC
            "#,
        )
        .bind(event_id)
        .bind(serde_json::json!([event_type]))
        .fetch_all(&mut *self.db)
        .await?;

        Ok(endpoints)
    }

    /// Operator re-enable: reactivate and clear the circuit breaker state.
    #[instrument(skip(self), fields(endpoint_id = %abbrev_uuid(&id)), err)]
    pub async fn enable_endpoint(&mut self, id: EndpointId) -> Result<Option<WebhookEndpoint>> {
        let endpoint = sqlx::query_as::<_, WebhookEndpoint>(
            r#"
            UPDATE webhook_endpoints
            SET is_active = true,
                consecutive_failure_periods = 0,
                last_failure_at = NULL
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(endpoint)
    }

    /// Count one more failure period and trip the breaker at `threshold`.
    ///
    /// Returns `None` if the endpoint was deleted while a delivery was in flight.
    #[instrument(skip(self), fields(endpoint_id = %abbrev_uuid(&id)), err)]
    pub async fn record_failure_period(&mut self, id: EndpointId, threshold: i32) -> Result<Option<WebhookEndpoint>> {
        let endpoint = sqlx::query_as::<_, WebhookEndpoint>(
            r#"
            UPDATE webhook_endpoints
            SET
                consecutive_failure_periods = consecutive_failure_periods + 1,
                last_failure_at = now(),
                is_active = CASE
                    WHEN consecutive_failure_periods + 1 >= $2 THEN false
                    ELSE is_active
                END
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(threshold)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(endpoint)
    }

    /// Reset consecutive failure periods on successful delivery.
    #[instrument(skip(self), fields(endpoint_id = %abbrev_uuid(&id)), err)]
    pub async fn reset_failures(&mut self, id: EndpointId) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE webhook_endpoints
            SET consecutive_failure_periods = 0
            WHERE id = $1 AND consecutive_failure_periods <> 0
            "#,
        )
        .bind(id)
        .execute(&mut *self.db)
        .await?;

        Ok(())
    }

    // ===== Delivery methods =====

    /// Create a new delivery record, due immediately.
    #[instrument(skip(self, request), fields(endpoint_id = %abbrev_uuid(&request.endpoint_id)), err)]
    pub async fn create_delivery(&mut self, request: &WebhookDeliveryCreateDBRequest) -> Result<WebhookDelivery> {
        let delivery = sqlx::query_as::<_, WebhookDelivery>(
            r#"
            INSERT INTO webhook_deliveries (endpoint_id, event_id, registration_id, event_type, payload)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(request.endpoint_id)
        .bind(request.event_id)
        .bind(request.registration_id)
        .bind(&request.event_type)
        .bind(&request.payload)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(delivery)
    }

    #[instrument(skip(self), fields(delivery_id = %abbrev_uuid(&id)), err)]
    pub async fn get_delivery(&mut self, id: DeliveryId) -> Result<Option<WebhookDelivery>> {
        let delivery = sqlx::query_as::<_, WebhookDelivery>("SELECT * FROM webhook_deliveries WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(delivery)
    }

    /// Claim deliveries whose `next_retry_at` has elapsed.
    ///
    /// Claimed rows have `next_retry_at` pushed forward by `claim_timeout`, so
    /// other replicas skip them and a crashed sender's work becomes due again
    /// once the timeout passes.
    #[instrument(skip(self), err)]
    pub async fn claim_due_deliveries(&mut self, limit: i64, claim_timeout: Duration) -> Result<Vec<ClaimedDelivery>> {
        let deliveries = sqlx::query_as::<_, ClaimedDelivery>(
            r#"
            WITH due AS (
                SELECT id FROM webhook_deliveries
                WHERE status IN ('pending', 'failed')
                  AND next_retry_at <= now()
                ORDER BY next_retry_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            ),
            claimed AS (
                UPDATE webhook_deliveries d
                SET next_retry_at = now() + make_interval(secs => $2)
                FROM due
                WHERE d.id = due.id
                RETURNING d.id, d.endpoint_id, d.event_type, d.payload, d.status, d.retry_count
            )
            SELECT
                c.id, c.endpoint_id, c.event_type, c.payload, c.status, c.retry_count,
                e.url AS endpoint_url,
                e.auth_header AS endpoint_auth_header,
                e.is_active AS endpoint_active
            FROM claimed c
            LEFT JOIN webhook_endpoints e ON e.id = c.endpoint_id
            "#,
        )
        .bind(limit)
        .bind(claim_timeout.as_secs_f64())
        .fetch_all(&mut *self.db)
        .await?;

        Ok(deliveries)
    }

    /// Claim a single failed or exhausted delivery for an operator-triggered attempt.
    ///
    /// Only matches when the delivery is in a failed state and its endpoint is
    /// active; callers re-read the row to explain a `None`.
    #[instrument(skip(self), fields(delivery_id = %abbrev_uuid(&id)), err)]
    pub async fn claim_for_manual_retry(&mut self, id: DeliveryId, claim_timeout: Duration) -> Result<Option<ClaimedDelivery>> {
        let delivery = sqlx::query_as::<_, ClaimedDelivery>(
            r#"
            UPDATE webhook_deliveries d
            SET next_retry_at = now() + make_interval(secs => $2)
            FROM webhook_endpoints e
            WHERE d.id = $1
              AND e.id = d.endpoint_id
              AND e.is_active = true
              AND d.status IN ('failed', 'exhausted')
            RETURNING
                d.id, d.endpoint_id, d.event_type, d.payload, d.status, d.retry_count,
                e.url AS endpoint_url,
                e.auth_header AS endpoint_auth_header,
                e.is_active AS endpoint_active
            "#,
        )
        .bind(id)
        .bind(claim_timeout.as_secs_f64())
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(delivery)
    }

    /// Mark a delivery as successful.
    #[instrument(skip(self), fields(delivery_id = %abbrev_uuid(&id)), err)]
    pub async fn mark_delivered(&mut self, id: DeliveryId, status_code: i32) -> Result<Option<WebhookDelivery>> {
        let delivery = sqlx::query_as::<_, WebhookDelivery>(
            r#"
            UPDATE webhook_deliveries
            SET
                status = 'delivered',
                last_status_code = $2,
                last_error = NULL,
                delivered_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status_code)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(delivery)
    }

    /// Record a failed attempt: bump `retry_count` and move to `status`.
    ///
    /// A delivery that was delivered in the meantime is left untouched.
    #[instrument(skip(self, error), fields(delivery_id = %abbrev_uuid(&id)), err)]
    pub async fn mark_failed(
        &mut self,
        id: DeliveryId,
        status: DeliveryStatus,
        next_retry_at: DateTime<Utc>,
        status_code: Option<i32>,
        error: &str,
    ) -> Result<Option<WebhookDelivery>> {
        let delivery = sqlx::query_as::<_, WebhookDelivery>(
            r#"
            UPDATE webhook_deliveries
            SET
                status = $2,
                retry_count = retry_count + 1,
                next_retry_at = $3,
                last_status_code = $4,
                last_error = $5
            WHERE id = $1 AND status <> 'delivered'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(next_retry_at)
        .bind(status_code)
        .bind(error)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(delivery)
    }

    /// Terminally fail a delivery without an attempt (endpoint gone or disabled).
    #[instrument(skip(self, reason), fields(delivery_id = %abbrev_uuid(&id)), err)]
    pub async fn mark_exhausted(&mut self, id: DeliveryId, reason: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET status = 'exhausted', last_error = $2
            WHERE id = $1 AND status IN ('pending', 'failed')
            "#,
        )
        .bind(id)
        .bind(reason)
        .execute(&mut *self.db)
        .await?;

        Ok(())
    }

    /// Failed (retryable or terminal) deliveries for an event, newest first.
    #[instrument(skip(self), fields(event_id = %abbrev_uuid(&event_id)), err)]
    pub async fn list_failed_for_event(&mut self, event_id: EventId, skip: i64, limit: i64) -> Result<Vec<WebhookDelivery>> {
        let deliveries = sqlx::query_as::<_, WebhookDelivery>(
            r#"
            SELECT * FROM webhook_deliveries
            WHERE event_id = $1
              AND status IN ('failed', 'exhausted')
            ORDER BY created_at DESC, id DESC
            OFFSET $2
            LIMIT $3
            "#,
        )
        .bind(event_id)
        .bind(skip)
        .bind(limit)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(deliveries)
    }

    #[instrument(skip(self), fields(event_id = %abbrev_uuid(&event_id)), err)]
    pub async fn count_failed_for_event(&mut self, event_id: EventId) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM webhook_deliveries
            WHERE event_id = $1 AND status IN ('failed', 'exhausted')
            "#,
        )
        .bind(event_id)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(count)
    }
}
