//! HTTP handlers for webhook delivery administration.

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use tracing::instrument;

use crate::{
    AppState,
    api::models::{
        pagination::{PaginatedResponse, Pagination},
        webhooks::{WebhookDeliveryResponse, WebhookEndpointResponse},
    },
    auth::current_user::AdminUser,
    errors::{Error, ErrorBody, Result},
    types::{DeliveryId, EndpointId, EventId},
    webhooks::RetryOutcome,
};

/// List failed webhook deliveries for an event.
#[utoipa::path(
    get,
    path = "/events/{event_id}/webhook-deliveries/failed",
    tag = "webhooks",
    summary = "List failed deliveries",
    description = "Deliveries that are waiting for a retry (`failed`) or were given up on (`exhausted`), newest first.",
    params(
        ("event_id" = uuid::Uuid, Path, description = "Event ID"),
        Pagination,
    ),
    responses(
        (status = 200, description = "Failed deliveries", body = PaginatedResponse<WebhookDeliveryResponse>),
        (status = 401, description = "Unauthorized", body = ErrorBody),
        (status = 403, description = "Forbidden", body = ErrorBody),
    ),
    security(("X-Registrar-User" = []))
)]
#[instrument(skip_all, fields(event_id = %event_id))]
pub async fn list_failed_deliveries(
    State(state): State<AppState>,
    Path(event_id): Path<EventId>,
    Query(pagination): Query<Pagination>,
    _admin: AdminUser,
) -> Result<Json<PaginatedResponse<WebhookDeliveryResponse>>> {
    let (skip, limit) = pagination.params();
    let (deliveries, total_count) = state.webhooks.list_failed_for_event(event_id, skip, limit).await?;

    Ok(Json(PaginatedResponse::new(
        deliveries.into_iter().map(Into::into).collect(),
        total_count,
        skip,
        limit,
    )))
}

/// Retry a failed webhook delivery now.
#[utoipa::path(
    post,
    path = "/webhook-deliveries/{id}/retry",
    tag = "webhooks",
    summary = "Retry delivery",
    description = "Send the delivery once, synchronously. A failed attempt is recorded like any other and reported in the response body.",
    params(("id" = uuid::Uuid, Path, description = "Delivery ID")),
    responses(
        (status = 200, description = "Attempt made", body = RetryOutcome),
        (status = 401, description = "Unauthorized", body = ErrorBody),
        (status = 403, description = "Forbidden", body = ErrorBody),
        (status = 404, description = "Delivery not found", body = ErrorBody),
        (status = 409, description = "Delivery cannot be retried", body = ErrorBody),
    ),
    security(("X-Registrar-User" = []))
)]
#[instrument(skip_all, fields(delivery_id = %id))]
pub async fn retry_delivery(State(state): State<AppState>, Path(id): Path<DeliveryId>, _admin: AdminUser) -> Result<Json<RetryOutcome>> {
    let outcome = state.webhooks.retry_delivery(id).await?;
    Ok(Json(outcome))
}

/// Re-enable a webhook endpoint that was disabled after repeated failures.
#[utoipa::path(
    post,
    path = "/webhook-endpoints/{id}/enable",
    tag = "webhooks",
    summary = "Enable endpoint",
    params(("id" = uuid::Uuid, Path, description = "Endpoint ID")),
    responses(
        (status = 200, description = "Endpoint enabled", body = WebhookEndpointResponse),
        (status = 401, description = "Unauthorized", body = ErrorBody),
        (status = 403, description = "Forbidden", body = ErrorBody),
        (status = 404, description = "Endpoint not found", body = ErrorBody),
    ),
    security(("X-Registrar-User" = []))
)]
#[instrument(skip_all, fields(endpoint_id = %id))]
pub async fn enable_endpoint(
    State(state): State<AppState>,
    Path(id): Path<EndpointId>,
    _admin: AdminUser,
) -> Result<Json<WebhookEndpointResponse>> {
    let endpoint = state.webhooks.enable_endpoint(id).await?.ok_or_else(|| Error::NotFound {
        resource: "Webhook endpoint".to_string(),
        id: id.to_string(),
    })?;

    Ok(Json(endpoint.into()))
}
