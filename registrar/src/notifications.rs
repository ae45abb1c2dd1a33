//! Registration side effects via a transactional outbox.
//!
//! The coordinator calls [`enqueue_registration_event`] inside its transaction,
//! so an email row and a webhook row exist if and only if the registration
//! change committed. [`NotificationWorker`] consumes them afterwards:
//!
//! - `email` rows are rendered and sent through the shared [`EmailService`]
//! - `webhook` rows fan out into one pending delivery per subscribed endpoint,
//!   which the webhook dispatcher then sends
//!
//! Rows are claimed with `SKIP LOCKED`, so the worker is safe to run on every
//! replica. Delivery is at-least-once: an email sent just before a crash is
//! sent again once the claim times out.

use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use sqlx::{PgConnection, PgPool};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::NotificationsConfig;
use crate::db::errors::DbError;
use crate::db::handlers::Outbox;
use crate::db::models::events::Event;
use crate::db::models::outbox::{OutboxCreateDBRequest, OutboxKind, OutboxMessage};
use crate::db::models::registrations::Registration;
use crate::db::models::tickets::Ticket;
use crate::email::{EmailService, RegistrationEmail};
use crate::types::abbrev_uuid;
use crate::webhooks::{RetryPolicy, WebhookEvent, WebhookEventType, fan_out};

/// The rows a registration event is rendered from, as committed.
#[derive(Debug, Clone, Copy)]
pub struct RegistrationSnapshot<'a> {
    pub registration: &'a Registration,
    pub ticket: &'a Ticket,
    pub event: &'a Event,
}

/// Write the email and webhook outbox rows for a registration event on the
/// caller's connection (normally the registration transaction).
#[instrument(skip(conn, snapshot), fields(registration_id = %abbrev_uuid(&snapshot.registration.id), event_type = %event_type), err)]
pub async fn enqueue_registration_event(
    conn: &mut PgConnection,
    event_type: WebhookEventType,
    snapshot: &RegistrationSnapshot<'_>,
) -> Result<(), DbError> {
    let email_payload = serde_json::to_value(RegistrationEmail::from_snapshot(snapshot)).map_err(anyhow::Error::from)?;
    let webhook_payload = serde_json::to_value(WebhookEvent::registration(event_type, snapshot)).map_err(anyhow::Error::from)?;

    let mut outbox = Outbox::new(conn);
    for (kind, payload) in [(OutboxKind::Email, email_payload), (OutboxKind::Webhook, webhook_payload)] {
        outbox
            .enqueue(&OutboxCreateDBRequest {
                kind,
                registration_id: snapshot.registration.id,
                event_id: snapshot.event.id,
                event_type: event_type.as_str().to_string(),
                payload,
            })
            .await?;
    }

    Ok(())
}

pub struct NotificationWorker {
    pool: PgPool,
    email: Arc<EmailService>,
    config: NotificationsConfig,
    wake: Arc<Notify>,
    backoff: RetryPolicy,
}

impl NotificationWorker {
    pub fn new(pool: PgPool, email: Arc<EmailService>, config: NotificationsConfig, wake: Arc<Notify>) -> Self {
        let backoff = RetryPolicy {
            max_retries: config.max_attempts,
            backoff_base: config.backoff_base,
            backoff_max: config.backoff_max,
        };

        Self {
            pool,
            email,
            config,
            wake,
            backoff,
        }
    }

    /// Process due rows until shutdown, waking early when the coordinator signals.
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        info!(poll_interval = ?self.config.poll_interval, "Starting notification worker");

        loop {
            // Drain everything that is due before sleeping again
            loop {
                match self.process_due().await {
                    Ok(n) if n as i64 >= self.config.batch_size => continue,
                    Ok(_) => break,
                    Err(e) => {
                        warn!(error = %e, "Failed to process notification outbox");
                        break;
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = self.wake.notified() => {
                    debug!("Notification worker woken");
                }
                _ = shutdown.cancelled() => {
                    info!("Notification worker shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// Claim and handle one batch of due rows. Returns how many were claimed.
    pub async fn process_due(&self) -> anyhow::Result<usize> {
        let claimed = {
            let mut conn = self.pool.acquire().await?;
            Outbox::new(&mut conn)
                .claim_due(self.config.batch_size, self.config.claim_timeout)
                .await?
        };

        for message in &claimed {
            self.process_one(message).await;
        }

        Ok(claimed.len())
    }

    async fn process_one(&self, message: &OutboxMessage) {
        let kind = message.kind.clone();
        let result = match message.outbox_kind() {
            Ok(OutboxKind::Email) => self.send_email(message).await,
            Ok(OutboxKind::Webhook) => self.fan_out_webhooks(message).await,
            Err(e) => Err(anyhow::anyhow!(e)),
        };

        let outcome = match result {
            Ok(()) => "processed",
            Err(e) => self.record_failure(message, &e).await,
        };
        counter!("registrar_outbox_processed_total", "kind" => kind, "outcome" => outcome).increment(1);
    }

    async fn send_email(&self, message: &OutboxMessage) -> anyhow::Result<()> {
        let event_type: WebhookEventType = message.event_type.parse().map_err(anyhow::Error::msg)?;
        let email: RegistrationEmail = serde_json::from_value(message.payload.clone())?;

        self.email.send_registration_email(event_type, &email).await?;

        let mut conn = self.pool.acquire().await?;
        Outbox::new(&mut conn).mark_processed(message.id).await?;

        debug!(
            outbox_id = %abbrev_uuid(&message.id),
            registration_id = %abbrev_uuid(&message.registration_id),
            "Registration email sent"
        );
        Ok(())
    }

    async fn fan_out_webhooks(&self, message: &OutboxMessage) -> anyhow::Result<()> {
        let event_type: WebhookEventType = message.event_type.parse().map_err(anyhow::Error::msg)?;

        let mut tx = self.pool.begin().await?;
        let deliveries = fan_out(&mut tx, message.event_id, message.registration_id, event_type, &message.payload).await?;
        Outbox::new(&mut tx).mark_processed(message.id).await?;
        tx.commit().await?;

        debug!(
            outbox_id = %abbrev_uuid(&message.id),
            registration_id = %abbrev_uuid(&message.registration_id),
            deliveries = deliveries.len(),
            "Webhook deliveries created"
        );
        Ok(())
    }

    /// Schedule a retry or give up. Returns the metrics outcome label.
    async fn record_failure(&self, message: &OutboxMessage, err: &anyhow::Error) -> &'static str {
        let attempts = message.attempts + 1;
        let error_text = format!("{err:#}");

        let mut conn = match self.pool.acquire().await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, outbox_id = %abbrev_uuid(&message.id), "Failed to acquire connection to record outbox failure");
                return "retry";
            }
        };
        let mut outbox = Outbox::new(&mut conn);

        if attempts >= self.config.max_attempts {
            error!(
                outbox_id = %abbrev_uuid(&message.id),
                registration_id = %abbrev_uuid(&message.registration_id),
                kind = %message.kind,
                attempts,
                error = %error_text,
                "Giving up on notification"
            );
            if let Err(e) = outbox.mark_failed(message.id, &error_text).await {
                warn!(error = %e, outbox_id = %abbrev_uuid(&message.id), "Failed to mark outbox row failed");
            }
            "failed"
        } else {
            let next_attempt_at = Utc::now() + self.backoff.backoff_delay(attempts);
            warn!(
                outbox_id = %abbrev_uuid(&message.id),
                registration_id = %abbrev_uuid(&message.registration_id),
                kind = %message.kind,
                attempts,
                error = %error_text,
                "Notification failed, will retry"
            );
            if let Err(e) = outbox.mark_retry(message.id, &error_text, next_attempt_at).await {
                warn!(error = %e, outbox_id = %abbrev_uuid(&message.id), "Failed to schedule outbox retry");
            }
            "retry"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EmailConfig, EmailTransportConfig};
    use crate::db::handlers::{Events, Tickets, Webhooks};
    use crate::db::models::webhooks::DeliveryStatus;
    use crate::test_utils::{
        EndpointFixture, TicketFixture, create_test_endpoint, create_test_event, create_test_registration, create_test_ticket,
    };
    use std::time::Duration;

    fn worker(pool: &PgPool, dir: &std::path::Path, max_attempts: i32) -> NotificationWorker {
        let email = EmailService::new(
            &EmailConfig {
                transport: EmailTransportConfig::File {
                    path: dir.to_string_lossy().to_string(),
                },
                ..Default::default()
            },
            "http://localhost:3000",
        )
        .unwrap();

        NotificationWorker::new(
            pool.clone(),
            Arc::new(email),
            NotificationsConfig {
                max_attempts,
                backoff_base: Duration::ZERO,
                backoff_max: Duration::ZERO,
                ..Default::default()
            },
            Arc::new(Notify::new()),
        )
    }

    async fn enqueue(pool: &PgPool, registration: &Registration, event_type: WebhookEventType) {
        let mut conn = pool.acquire().await.unwrap();
        let event = Events::new(&mut conn).get_by_id(registration.event_id).await.unwrap().unwrap();
        let ticket = Tickets::new(&mut conn).get_by_id(registration.ticket_id).await.unwrap().unwrap();
        enqueue_registration_event(
            &mut conn,
            event_type,
            &RegistrationSnapshot {
                registration,
                ticket: &ticket,
                event: &event,
            },
        )
        .await
        .unwrap();
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_worker_sends_email_and_fans_out(pool: PgPool) {
        let dir = tempfile::tempdir().unwrap();
        let event = create_test_event(&pool).await;
        let ticket = create_test_ticket(&pool, event.id, TicketFixture::default()).await;
        let registration = create_test_registration(&pool, &ticket, "notify@example.com").await;
        let endpoint = create_test_endpoint(&pool, event.id, EndpointFixture::default()).await;

        enqueue(&pool, &registration, WebhookEventType::RegistrationConfirmed).await;

        let processed = worker(&pool, dir.path(), 3).process_due().await.unwrap();
        assert_eq!(processed, 2);

        let mut conn = pool.acquire().await.unwrap();
        let rows = Outbox::new(&mut conn).list_for_registration(registration.id).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.processed_at.is_some()));

        let pending = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM webhook_deliveries WHERE endpoint_id = $1 AND status = $2")
            .bind(endpoint.id)
            .bind(DeliveryStatus::Pending.as_str())
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(pending, 1);
        assert_eq!(Webhooks::new(&mut conn).count_failed_for_event(event.id).await.unwrap(), 0);

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

        // Nothing left to do
        assert_eq!(worker(&pool, dir.path(), 3).process_due().await.unwrap(), 0);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_email_failure_retries_then_gives_up(pool: PgPool) {
        let dir = tempfile::tempdir().unwrap();
        let event = create_test_event(&pool).await;
        let ticket = create_test_ticket(&pool, event.id, TicketFixture::default()).await;
        let registration = create_test_registration(&pool, &ticket, "not an address").await;

        enqueue(&pool, &registration, WebhookEventType::RegistrationConfirmed).await;
        let worker = worker(&pool, dir.path(), 2);

        // Attempt 1: webhook row succeeds (no endpoints), email row is rescheduled
        assert_eq!(worker.process_due().await.unwrap(), 2);
        // Attempt 2: email row gives up
        assert_eq!(worker.process_due().await.unwrap(), 1);
        assert_eq!(worker.process_due().await.unwrap(), 0);

        let mut conn = pool.acquire().await.unwrap();
        let rows = Outbox::new(&mut conn).list_for_registration(registration.id).await.unwrap();
        let email_row = rows.iter().find(|r| r.kind == "email").unwrap();
        assert_eq!(email_row.attempts, 2);
        assert!(email_row.failed_at.is_some());
        assert!(email_row.processed_at.is_none());
        assert!(email_row.last_error.as_deref().unwrap_or_default().contains("Invalid recipient"));
    }
}
