//! Database repository for the notification outbox.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tracing::instrument;

use crate::db::errors::Result;
use crate::db::models::outbox::{OutboxCreateDBRequest, OutboxMessage};
use crate::types::{OutboxId, RegistrationId, abbrev_uuid};

pub struct Outbox<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Outbox<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Insert a message, due immediately. Intended to run inside the
    /// transaction that made the state change it describes.
    #[instrument(skip(self, request), fields(registration_id = %abbrev_uuid(&request.registration_id), kind = request.kind.as_str()), err)]
    pub async fn enqueue(&mut self, request: &OutboxCreateDBRequest) -> Result<OutboxMessage> {
        let message = sqlx::query_as::<_, OutboxMessage>(
            r#"
            INSERT INTO notification_outbox (kind, registration_id, event_id, event_type, payload)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(request.kind.as_str())
        .bind(request.registration_id)
        .bind(request.event_id)
        .bind(&request.event_type)
        .bind(&request.payload)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(message)
    }

    /// Claim unprocessed messages that are due, oldest first.
    ///
    /// Claimed rows get `next_attempt_at` pushed out by `claim_timeout` so a
    /// crashed worker's claims become visible again afterwards.
    #[instrument(skip(self), err)]
    pub async fn claim_due(&mut self, limit: i64, claim_timeout: Duration) -> Result<Vec<OutboxMessage>> {
        let messages = sqlx::query_as::<_, OutboxMessage>(
            r#"
            WITH due AS (
                SELECT id FROM notification_outbox
                WHERE processed_at IS NULL
                  AND failed_at IS NULL
                  AND next_attempt_at <= now()
                ORDER BY created_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE notification_outbox o
            SET next_attempt_at = now() + make_interval(secs => $2)
            FROM due
            WHERE o.id = due.id
            RETURNING o.*
            "#,
        )
        .bind(limit)
        .bind(claim_timeout.as_secs_f64())
        .fetch_all(&mut *self.db)
        .await?;

        Ok(messages)
    }

    #[instrument(skip(self), fields(outbox_id = %abbrev_uuid(&id)), err)]
    pub async fn mark_processed(&mut self, id: OutboxId) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE notification_outbox
            SET processed_at = now(), attempts = attempts + 1, last_error = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&mut *self.db)
        .await?;

        Ok(())
    }

    /// Record a failed attempt and schedule the next one.
    #[instrument(skip(self, error), fields(outbox_id = %abbrev_uuid(&id)), err)]
    pub async fn mark_retry(&mut self, id: OutboxId, error: &str, next_attempt_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE notification_outbox
            SET attempts = attempts + 1, last_error = $2, next_attempt_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(next_attempt_at)
        .execute(&mut *self.db)
        .await?;

        Ok(())
    }

    /// Give up on a message. It stays in the table for inspection.
    #[instrument(skip(self, error), fields(outbox_id = %abbrev_uuid(&id)), err)]
    pub async fn mark_failed(&mut self, id: OutboxId, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE notification_outbox
            SET attempts = attempts + 1, last_error = $2, failed_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&mut *self.db)
        .await?;

        Ok(())
    }

    #[instrument(skip(self), fields(registration_id = %abbrev_uuid(&registration_id)), err)]
    pub async fn list_for_registration(&mut self, registration_id: RegistrationId) -> Result<Vec<OutboxMessage>> {
        let messages = sqlx::query_as::<_, OutboxMessage>(
            "SELECT * FROM notification_outbox WHERE registration_id = $1 ORDER BY created_at ASC, kind ASC",
        )
        .bind(registration_id)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::outbox::OutboxKind;
    use crate::test_utils::{TicketFixture, create_test_event, create_test_registration, create_test_ticket};
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_claim_respects_schedule_and_terminal_states(pool: PgPool) {
        let event = create_test_event(&pool).await;
        let ticket = create_test_ticket(&pool, event.id, TicketFixture::default()).await;
        let registration = create_test_registration(&pool, &ticket, "outbox@example.com").await;

        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Outbox::new(&mut conn);

        let mut ids = Vec::new();
        for kind in [OutboxKind::Email, OutboxKind::Webhook] {
            let message = repo
                .enqueue(&OutboxCreateDBRequest {
                    kind,
                    registration_id: registration.id,
                    event_id: event.id,
                    event_type: "registration_confirmed".to_string(),
                    payload: serde_json::json!({}),
                })
                .await
                .unwrap();
            ids.push(message.id);
        }

        let claimed = repo.claim_due(10, Duration::from_secs(60)).await.unwrap();
        assert_eq!(claimed.len(), 2);

        // Already claimed
        assert!(repo.claim_due(10, Duration::from_secs(60)).await.unwrap().is_empty());

        repo.mark_processed(ids[0]).await.unwrap();
        repo.mark_retry(ids[1], "smtp down", Utc::now() - chrono::Duration::seconds(1))
            .await
            .unwrap();

        let retried = repo.claim_due(10, Duration::from_secs(60)).await.unwrap();
        assert_eq!(retried.len(), 1);
        assert_eq!(retried[0].id, ids[1]);
        assert_eq!(retried[0].attempts, 1);
        assert_eq!(retried[0].last_error.as_deref(), Some("smtp down"));

        repo.mark_failed(ids[1], "gave up").await.unwrap();
        let all = repo.list_for_registration(registration.id).await.unwrap();
        assert!(all.iter().any(|m| m.processed_at.is_some()));
        assert!(all.iter().any(|m| m.failed_at.is_some()));
    }
}
