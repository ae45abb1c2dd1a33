//! HTTP API: route handlers and their request/response models.
//!
//! - **Registrations** (`/api/v1/registrations/*`): register, view, cancel, referral codes
//! - **Webhooks** (`/admin/api/v1/webhook-*`, `/admin/api/v1/events/{id}/webhook-deliveries/*`):
//!   failed delivery listing, manual retry, endpoint re-enable
//! - **Campaigns** (`/admin/api/v1/events/{id}/campaigns`): email every confirmed registrant
//!
//! Endpoints are documented with `utoipa`; the docs are served at `/docs` (registrant
//! API) and `/admin/docs` (admin API).

pub mod handlers;
pub mod models;
