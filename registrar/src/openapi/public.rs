//! OpenAPI documentation for the registrant API.

use utoipa::OpenApi;

use super::ProxyHeaderSecurity;
use crate::{api, errors::ErrorBody, registration::RegistrationRequest};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Registrar API",
        description = "Register for events, cancel registrations and share referral codes."
    ),
    servers((url = "/api/v1", description = "Registrant API")),
    modifiers(&ProxyHeaderSecurity),
    paths(
        api::handlers::registrations::create_registration,
        api::handlers::registrations::get_registration,
        api::handlers::registrations::cancel_registration,
        api::handlers::registrations::get_referral_code,
    ),
    components(schemas(
        RegistrationRequest,
        api::models::registrations::RegistrationResponse,
        api::models::registrations::ReferralResponse,
        ErrorBody,
    )),
    tags((name = "registrations", description = "Event registration"))
)]
pub struct PublicApiDoc;
