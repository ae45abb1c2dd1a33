//! HTTP handlers for registrant-facing endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use tracing::instrument;

use crate::{
    AppState,
    api::models::registrations::{RegistrationResponse, ReferralResponse},
    auth::current_user::CurrentUser,
    errors::{ErrorBody, Result},
    registration::RegistrationRequest,
    types::RegistrationId,
};

/// Register for an event.
#[utoipa::path(
    post,
    path = "/registrations",
    tag = "registrations",
    summary = "Register",
    description = "Register the current user for a ticket. A 409 with `retryable: true` means the request lost a race and may be resent unchanged.",
    request_body = RegistrationRequest,
    responses(
        (status = 201, description = "Registration confirmed", body = RegistrationResponse),
        (status = 400, description = "Ticket not on sale, or invitation or referral code rejected", body = ErrorBody),
        (status = 401, description = "Unauthorized", body = ErrorBody),
        (status = 403, description = "Phone verification required", body = ErrorBody),
        (status = 404, description = "Event or ticket not found", body = ErrorBody),
        (status = 409, description = "Already registered, sold out, or concurrent conflict", body = ErrorBody),
        (status = 422, description = "Registration form answers invalid", body = ErrorBody),
        (status = 500, description = "Internal server error", body = ErrorBody),
    ),
    security(("X-Registrar-User" = []))
)]
#[instrument(skip_all)]
pub async fn create_registration(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<RegistrationRequest>,
) -> Result<(StatusCode, Json<RegistrationResponse>)> {
    let registration = state.registrations.register(&request, &current_user.registrant()).await?;
    Ok((StatusCode::CREATED, Json(registration.into())))
}

/// Get one of your registrations.
#[utoipa::path(
    get,
    path = "/registrations/{id}",
    tag = "registrations",
    summary = "Get registration",
    params(("id" = uuid::Uuid, Path, description = "Registration ID")),
    responses(
        (status = 200, description = "Registration", body = RegistrationResponse),
        (status = 401, description = "Unauthorized", body = ErrorBody),
        (status = 404, description = "Not found", body = ErrorBody),
    ),
    security(("X-Registrar-User" = []))
)]
#[instrument(skip_all)]
pub async fn get_registration(
    State(state): State<AppState>,
    Path(id): Path<RegistrationId>,
    current_user: CurrentUser,
) -> Result<Json<RegistrationResponse>> {
    let registration = state.registrations.get(id, &current_user.requester()).await?;
    Ok(Json(registration.into()))
}

/// Cancel a registration.
#[utoipa::path(
    post,
    path = "/registrations/{id}/cancel",
    tag = "registrations",
    summary = "Cancel registration",
    description = "Cancel a confirmed registration and release its ticket. Admins may cancel any registration.",
    params(("id" = uuid::Uuid, Path, description = "Registration ID")),
    responses(
        (status = 200, description = "Registration cancelled", body = RegistrationResponse),
        (status = 401, description = "Unauthorized", body = ErrorBody),
        (status = 404, description = "Not found", body = ErrorBody),
        (status = 409, description = "Already cancelled or not confirmed", body = ErrorBody),
    ),
    security(("X-Registrar-User" = []))
)]
#[instrument(skip_all)]
pub async fn cancel_registration(
    State(state): State<AppState>,
    Path(id): Path<RegistrationId>,
    current_user: CurrentUser,
) -> Result<Json<RegistrationResponse>> {
    let registration = state.registrations.cancel(id, &current_user.requester()).await?;
    Ok(Json(registration.into()))
}

/// Get (issuing on first call) the referral code of a confirmed registration.
#[utoipa::path(
    get,
    path = "/registrations/{id}/referral",
    tag = "registrations",
    summary = "Get referral code",
    params(("id" = uuid::Uuid, Path, description = "Registration ID")),
    responses(
        (status = 200, description = "Referral code", body = ReferralResponse),
        (status = 401, description = "Unauthorized", body = ErrorBody),
        (status = 404, description = "Not found", body = ErrorBody),
        (status = 409, description = "Registration is not confirmed", body = ErrorBody),
    ),
    security(("X-Registrar-User" = []))
)]
#[instrument(skip_all)]
pub async fn get_referral_code(
    State(state): State<AppState>,
    Path(id): Path<RegistrationId>,
    current_user: CurrentUser,
) -> Result<Json<ReferralResponse>> {
    let referral = state.registrations.referral_code(id, &current_user.requester()).await?;
    Ok(Json(referral.into()))
}
