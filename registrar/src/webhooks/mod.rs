//! Webhook delivery for registration events.
//!
//! - [`events`]: event types and payload builders
//! - [`retry`]: backoff schedule and failure classification
//! - [`delivery`]: building, sending and recording a single attempt
//! - [`dispatcher`]: claim/send/result loop for due deliveries
//! - [`service`]: fan-out, manual retry, failed listing, endpoint re-enable

mod delivery;
pub mod dispatcher;
pub mod events;
pub mod retry;
pub mod service;

pub use dispatcher::{WebhookDispatcher, run_webhook_dispatcher};
pub use events::{WebhookEvent, WebhookEventType};
pub use retry::RetryPolicy;
pub use service::{DeliveryRetryError, RetryOutcome, WebhookDeliveryService, fan_out};
