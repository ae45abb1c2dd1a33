//! OpenAPI documentation for the two API surfaces:
//! - [`public::PublicApiDoc`]: registrant API at `/api/v1/*`
//! - [`admin::AdminApiDoc`]: operator API at `/admin/api/v1/*`

pub mod admin;
pub mod public;

pub use admin::AdminApiDoc;
pub use public::PublicApiDoc;

use utoipa::{
    Modify,
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
};

/// Identity header set by the authenticating proxy in front of the service.
struct ProxyHeaderSecurity;

impl Modify for ProxyHeaderSecurity {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "X-Registrar-User".to_string(),
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                    "X-Registrar-User",
                    "Email of the signed-in user, set by the authenticating proxy. \
                    Clients never send this header themselves; the proxy strips and replaces it.\n\n\
                    Phone verification is signalled separately with `X-Registrar-Phone-Verified: true`.",
                ))),
            );
        }
    }
}
