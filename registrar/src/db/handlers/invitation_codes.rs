//! Database repository for invitation codes.

use sqlx::PgConnection;
use tracing::instrument;

use crate::db::errors::Result;
use crate::db::models::invitation_codes::InvitationCode;
use crate::types::{EventId, InvitationCodeId, TicketId, abbrev_uuid};

pub struct InvitationCodes<'c> {
    db: &'c mut PgConnection,
}

impl<'c> InvitationCodes<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(code_id = %abbrev_uuid(&id)), err)]
    pub async fn get_by_id(&mut self, id: InvitationCodeId) -> Result<Option<InvitationCode>> {
        let code = sqlx::query_as::<_, InvitationCode>("SELECT * FROM invitation_codes WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(code)
    }

    /// Look up a code by its text within an event. Codes are case-sensitive.
    #[instrument(skip(self, code), fields(event_id = %abbrev_uuid(&event_id)), err)]
    pub async fn find_by_code(&mut self, event_id: EventId, code: &str) -> Result<Option<InvitationCode>> {
        let code = sqlx::query_as::<_, InvitationCode>("SELECT * FROM invitation_codes WHERE event_id = $1 AND code = $2")
            .bind(event_id)
            .bind(code)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(code)
    }

    /// Atomically redeem one use of a code for `ticket_id`.
    ///
    /// Every validity condition is re-checked in the UPDATE's predicate, so a
    /// code exhausted or deactivated since preflight matches no row and `None`
    /// is returned. Callers re-read the row to find out why.
    #[instrument(skip(self), fields(code_id = %abbrev_uuid(&id)), err)]
    pub async fn consume(&mut self, id: InvitationCodeId, ticket_id: TicketId) -> Result<Option<InvitationCode>> {
        let code = sqlx::query_as::<_, InvitationCode>(
            r#"
            UPDATE invitation_codes
            SET used_count = used_count + 1
            WHERE id = $1
              AND ticket_id = $2
              AND is_active = true
              AND (valid_from IS NULL OR valid_from <= now())
              AND (valid_until IS NULL OR valid_until >= now())
              AND (usage_limit IS NULL OR used_count < usage_limit)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(ticket_id)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(code)
    }
}
