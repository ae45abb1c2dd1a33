//! HTTP handler for email campaigns.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use tracing::{Instrument, info, info_span, instrument};

use crate::{
    AppState,
    api::models::campaigns::{CampaignAccepted, CampaignCreate},
    auth::current_user::AdminUser,
    email::campaigns::Campaign,
    errors::{Error, ErrorBody, Result},
    types::{EventId, abbrev_uuid},
};

/// Email every confirmed registrant of an event.
#[utoipa::path(
    post,
    path = "/events/{event_id}/campaigns",
    tag = "campaigns",
    summary = "Send campaign",
    description = "Recipients are resolved when the request is accepted. Sending happens in the background, in batches.",
    params(("event_id" = uuid::Uuid, Path, description = "Event ID")),
    request_body = CampaignCreate,
    responses(
        (status = 202, description = "Campaign accepted", body = CampaignAccepted),
        (status = 400, description = "Empty subject or body", body = ErrorBody),
        (status = 401, description = "Unauthorized", body = ErrorBody),
        (status = 403, description = "Forbidden", body = ErrorBody),
        (status = 404, description = "Event not found", body = ErrorBody),
    ),
    security(("X-Registrar-User" = []))
)]
#[instrument(skip_all, fields(event_id = %abbrev_uuid(&event_id)))]
pub async fn create_campaign(
    State(state): State<AppState>,
    Path(event_id): Path<EventId>,
    admin: AdminUser,
    Json(request): Json<CampaignCreate>,
) -> Result<(StatusCode, Json<CampaignAccepted>)> {
    if request.subject.trim().is_empty() || request.body_html.trim().is_empty() {
        return Err(Error::BadRequest {
            message: "Campaign subject and body must not be empty".to_string(),
        });
    }

    let recipients = state.registrations.confirmed_emails(event_id).await?;
    let accepted = CampaignAccepted {
        recipients: recipients.len(),
    };

    info!(requested_by = %admin.0.email, recipients = recipients.len(), "Campaign accepted");

    let campaign = Campaign {
        subject: request.subject,
        body_html: request.body_html,
    };
    let sender = state.campaigns.clone();
    let shutdown = state.shutdown.clone();
    tokio::spawn(
        async move {
            sender.send(&campaign, &recipients, &shutdown).await;
        }
        .instrument(info_span!("campaign", event_id = %abbrev_uuid(&event_id))),
    );

    Ok((StatusCode::ACCEPTED, Json(accepted)))
}
