//! API request and response models.
//!
//! These are kept separate from the database rows in [`crate::db::models`] so
//! the wire format can change independently of storage.

pub mod campaigns;
pub mod pagination;
pub mod registrations;
pub mod webhooks;
