//! HTTP request handlers.
//!
//! - [`registrations`]: register, cancel, and fetch referral codes (`/api/v1`)
//! - [`webhooks`]: failed delivery listing, manual retry, endpoint re-enable (`/admin/api/v1`)
//! - [`campaigns`]: batch emails to an event's registrants (`/admin/api/v1`)
//!
//! Handlers return [`crate::errors::Error`], which renders as
//! `{code, message, retryable, errors?}` JSON with the matching status.

pub mod campaigns;
pub mod registrations;
pub mod webhooks;
