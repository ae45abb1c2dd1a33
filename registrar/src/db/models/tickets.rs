//! Database model for ticket types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;

use crate::types::{EventId, TicketId};

#[derive(Debug, Clone, FromRow)]
pub struct Ticket {
    pub id: TicketId,
    pub event_id: EventId,
    pub name: String,
    pub price: Decimal,
    pub quantity: i32,
    pub sold_count: i32,
    pub sale_start: Option<DateTime<Utc>>,
    pub sale_end: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub is_visible: bool,
    pub require_invite_code: bool,
    pub require_sms_verification: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    /// Active and inside the (optional) sale window at `now`.
    pub fn is_on_sale(&self, now: DateTime<Utc>) -> bool {
        if !self.is_active {
            return false;
        }
        if self.sale_start.is_some_and(|start| now < start) {
            return false;
        }
        if self.sale_end.is_some_and(|end| now > end) {
            return false;
        }
        true
    }
}

/// Outcome of a capacity check against the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    Available { remaining: i32 },
    SoldOut,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn ticket() -> Ticket {
        Ticket {
            id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            name: "General Admission".to_string(),
            price: Decimal::new(2500, 2),
            quantity: 10,
            sold_count: 3,
            sale_start: None,
            sale_end: None,
            is_active: true,
            is_visible: true,
            require_invite_code: false,
            require_sms_verification: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_on_sale_without_window() {
        assert!(ticket().is_on_sale(Utc::now()));
    }

    #[test]
    fn test_inactive_ticket_is_not_on_sale() {
        let t = Ticket { is_active: false, ..ticket() };
        assert!(!t.is_on_sale(Utc::now()));
    }

    #[test]
    fn test_sale_window_bounds() {
        let now = Utc::now();
        let early = Ticket {
            sale_start: Some(now + Duration::hours(1)),
            ..ticket()
        };
        assert!(!early.is_on_sale(now));

        let late = Ticket {
            sale_end: Some(now - Duration::hours(1)),
            ..ticket()
        };
        assert!(!late.is_on_sale(now));

        let open = Ticket {
            sale_start: Some(now - Duration::hours(1)),
            sale_end: Some(now + Duration::hours(1)),
            ..ticket()
        };
        assert!(open.is_on_sale(now));
    }
}
