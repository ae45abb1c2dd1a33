//! Inventory ledger: capacity checks and sold counters for ticket types.
//!
//! The counter is only moved by [`Tickets::increment_sold`] and
//! [`Tickets::release`], both conditional updates that cannot push
//! `sold_count` outside `0..=quantity`. The table's CHECK constraint backs
//! the same invariant at the storage layer.

use sqlx::PgConnection;
use tracing::instrument;

use crate::db::errors::{DbError, Result};
use crate::db::models::tickets::{Reservation, Ticket};
use crate::types::{TicketId, abbrev_uuid};

pub struct Tickets<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Tickets<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(ticket_id = %abbrev_uuid(&id)), err)]
    pub async fn get_by_id(&mut self, id: TicketId) -> Result<Option<Ticket>> {
        let ticket = sqlx::query_as::<_, Ticket>("SELECT * FROM tickets WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(ticket)
    }

    /// Read the current remaining capacity. Used both as the advisory
    /// preflight check and as the re-check inside the registration transaction.
    #[instrument(skip(self), fields(ticket_id = %abbrev_uuid(&id)), err)]
    pub async fn try_reserve(&mut self, id: TicketId) -> Result<Reservation> {
        let row: Option<(i32, i32)> = sqlx::query_as("SELECT quantity, sold_count FROM tickets WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        let (quantity, sold_count) = row.ok_or(DbError::NotFound)?;
        if sold_count < quantity {
            Ok(Reservation::Available {
                remaining: quantity - sold_count,
            })
        } else {
            Ok(Reservation::SoldOut)
        }
    }

    /// Take one unit of capacity. Returns `false` if the ticket is sold out.
    #[instrument(skip(self), fields(ticket_id = %abbrev_uuid(&id)), err)]
    pub async fn increment_sold(&mut self, id: TicketId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tickets
            SET sold_count = sold_count + 1
            WHERE id = $1 AND sold_count < quantity
            "#,
        )
        .bind(id)
        .execute(&mut *self.db)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Give back one unit of capacity. Only called on the confirmed → cancelled
    /// transition. Returns `false` if the counter was already zero.
    #[instrument(skip(self), fields(ticket_id = %abbrev_uuid(&id)), err)]
    pub async fn release(&mut self, id: TicketId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tickets
            SET sold_count = sold_count - 1
            WHERE id = $1 AND sold_count > 0
            "#,
        )
        .bind(id)
        .execute(&mut *self.db)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
