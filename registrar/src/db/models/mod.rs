//! Database record models matching table schemas.
//!
//! Each model derives `sqlx::FromRow` and mirrors one table (or, for
//! [`webhooks::ClaimedDelivery`], one join). Database models are kept separate
//! from the API models in [`crate::api::models`].
//!
//! - [`events`], [`tickets`]: read-mostly catalog rows written by the event service
//! - [`invitation_codes`], [`referrals`], [`registrations`]: registration state
//! - [`webhooks`], [`outbox`]: notification delivery state

pub mod events;
pub mod invitation_codes;
pub mod outbox;
pub mod referrals;
pub mod registrations;
pub mod tickets;
pub mod webhooks;
