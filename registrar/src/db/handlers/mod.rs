//! Repository implementations for database access.
//!
//! Each repository wraps a `&mut PgConnection` and exposes strongly-typed
//! operations returning models from [`crate::db::models`]:
//!
//! - [`Events`]: event lookup
//! - [`Tickets`]: the inventory ledger (capacity checks and sold counters)
//! - [`InvitationCodes`]: invitation code lookup and consumption
//! - [`Referrals`]: referral codes and attribution
//! - [`Registrations`]: registration rows and status transitions
//! - [`Webhooks`]: webhook endpoints and deliveries
//! - [`Outbox`]: the notification outbox

pub mod events;
pub mod invitation_codes;
pub mod outbox;
pub mod referrals;
pub mod registrations;
pub mod tickets;
pub mod webhooks;

pub use events::Events;
pub use invitation_codes::InvitationCodes;
pub use outbox::Outbox;
pub use referrals::Referrals;
pub use registrations::Registrations;
pub use tickets::Tickets;
pub use webhooks::Webhooks;
