//! OpenAPI documentation for the operator API.

use utoipa::OpenApi;

use super::ProxyHeaderSecurity;
use crate::{api, errors::ErrorBody, webhooks::RetryOutcome};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Registrar Admin API",
        description = "Webhook delivery administration and registrant email campaigns. \
        Every endpoint requires the caller's email to be listed in `admin_emails`."
    ),
    servers((url = "/admin/api/v1", description = "Admin API")),
    modifiers(&ProxyHeaderSecurity),
    paths(
        api::handlers::webhooks::list_failed_deliveries,
        api::handlers::webhooks::retry_delivery,
        api::handlers::webhooks::enable_endpoint,
        api::handlers::campaigns::create_campaign,
    ),
    components(schemas(
        api::models::webhooks::WebhookDeliveryResponse,
        api::models::webhooks::WebhookEndpointResponse,
        api::models::campaigns::CampaignCreate,
        api::models::campaigns::CampaignAccepted,
        RetryOutcome,
        ErrorBody,
    )),
    tags(
        (name = "webhooks", description = "Webhook delivery administration"),
        (name = "campaigns", description = "Email campaigns"),
    )
)]
pub struct AdminApiDoc;
