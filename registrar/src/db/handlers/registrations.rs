//! Database repository for registrations.

use sqlx::PgConnection;
use tracing::instrument;

use crate::db::errors::Result;
use crate::db::models::registrations::{Registration, RegistrationCreateDBRequest};
use crate::types::{EventId, RegistrationId, abbrev_uuid};

/// Partial unique index enforcing one live registration per (event, email).
pub const ACTIVE_EMAIL_UNIQUE_INDEX: &str = "registrations_active_email_unique";

pub struct Registrations<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Registrations<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(event_id = %abbrev_uuid(&request.event_id)), err)]
    pub async fn create(&mut self, request: &RegistrationCreateDBRequest) -> Result<Registration> {
        let registration = sqlx::query_as::<_, Registration>(
            r#"
            INSERT INTO registrations (event_id, ticket_id, invitation_code_id, email, status, form_data)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(request.event_id)
        .bind(request.ticket_id)
        .bind(request.invitation_code_id)
        .bind(&request.email)
        .bind(request.status.as_str())
        .bind(&request.form_data)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(registration)
    }

    #[instrument(skip(self), fields(registration_id = %abbrev_uuid(&id)), err)]
    pub async fn get_by_id(&mut self, id: RegistrationId) -> Result<Option<Registration>> {
        let registration = sqlx::query_as::<_, Registration>("SELECT * FROM registrations WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(registration)
    }

    /// The non-cancelled registration held by `email` for an event, if any.
    /// Emails compare case-insensitively.
    #[instrument(skip(self, email), fields(event_id = %abbrev_uuid(&event_id)), err)]
    pub async fn find_active_by_email(&mut self, event_id: EventId, email: &str) -> Result<Option<Registration>> {
        let registration = sqlx::query_as::<_, Registration>(
            r#"
            SELECT * FROM registrations
            WHERE event_id = $1
              AND lower(email) = lower($2)
              AND status <> 'cancelled'
            "#,
        )
        .bind(event_id)
        .bind(email)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(registration)
    }

    /// Flip a confirmed registration to cancelled. Returns `None` when the row
    /// is missing or not currently confirmed, so a second cancel matches nothing.
    #[instrument(skip(self), fields(registration_id = %abbrev_uuid(&id)), err)]
    pub async fn mark_cancelled(&mut self, id: RegistrationId) -> Result<Option<Registration>> {
        let registration = sqlx::query_as::<_, Registration>(
            r#"
            UPDATE registrations
            SET status = 'cancelled', cancelled_at = now()
            WHERE id = $1 AND status = 'confirmed'
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(registration)
    }

    /// Emails of every confirmed registrant of an event, oldest first.
    #[instrument(skip(self), fields(event_id = %abbrev_uuid(&event_id)), err)]
    pub async fn list_confirmed_emails(&mut self, event_id: EventId) -> Result<Vec<String>> {
        let emails: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT email FROM registrations
            WHERE event_id = $1 AND status = 'confirmed'
            ORDER BY created_at ASC
            "#,
        )
        .bind(event_id)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(emails)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::errors::DbError;
    use crate::db::models::registrations::RegistrationStatus;
    use crate::test_utils::{TicketFixture, create_test_event, create_test_ticket};
    use sqlx::PgPool;

    fn request(event_id: EventId, ticket_id: uuid::Uuid, email: &str) -> RegistrationCreateDBRequest {
        RegistrationCreateDBRequest {
            event_id,
            ticket_id,
            invitation_code_id: None,
            email: email.to_string(),
            status: RegistrationStatus::Confirmed,
            form_data: serde_json::json!({}),
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_active_email_index_is_case_insensitive(pool: PgPool) {
        let event = create_test_event(&pool).await;
        let ticket = create_test_ticket(&pool, event.id, TicketFixture::default()).await;

        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Registrations::new(&mut conn);

        repo.create(&request(event.id, ticket.id, "ada@example.com")).await.unwrap();
        let err = repo.create(&request(event.id, ticket.id, "Ada@Example.com")).await.unwrap_err();
        assert!(err.is_unique_violation_of(ACTIVE_EMAIL_UNIQUE_INDEX), "unexpected error: {err:?}");

        let found = repo.find_active_by_email(event.id, "ADA@example.com").await.unwrap();
        assert!(found.is_some());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_cancelled_registration_frees_email(pool: PgPool) {
        let event = create_test_event(&pool).await;
        let ticket = create_test_ticket(&pool, event.id, TicketFixture::default()).await;

        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Registrations::new(&mut conn);

        let first = repo.create(&request(event.id, ticket.id, "grace@example.com")).await.unwrap();
        let cancelled = repo.mark_cancelled(first.id).await.unwrap().unwrap();
        assert_eq!(cancelled.registration_status(), RegistrationStatus::Cancelled);
        assert!(cancelled.cancelled_at.is_some());

        // Second cancel matches nothing
        assert!(repo.mark_cancelled(first.id).await.unwrap().is_none());

        assert!(repo.find_active_by_email(event.id, "grace@example.com").await.unwrap().is_none());
        repo.create(&request(event.id, ticket.id, "grace@example.com")).await.unwrap();
    }

    #[sqlx::test]
    async fn test_unknown_ticket_is_foreign_key_violation(pool: PgPool) {
        let event = create_test_event(&pool).await;

        let mut conn = pool.acquire().await.unwrap();
        let err = Registrations::new(&mut conn)
            .create(&request(event.id, uuid::Uuid::new_v4(), "x@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::ForeignKeyViolation { .. }));
    }
}
