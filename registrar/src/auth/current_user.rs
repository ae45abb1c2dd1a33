use crate::{
    AppState,
    config::Config,
    errors::{Error, Result},
    registration::{Registrant, Requester},
};
use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, request::Parts},
};
use tracing::{instrument, trace};

/// The caller as vouched for by the authenticating proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub email: String,
    pub phone_verified: bool,
    pub is_admin: bool,
}

impl CurrentUser {
    pub fn registrant(&self) -> Registrant {
        Registrant {
            email: self.email.clone(),
            phone_verified: self.phone_verified,
        }
    }

    pub fn requester(&self) -> Requester {
        Requester {
            email: self.email.clone(),
            is_admin: self.is_admin,
        }
    }
}

/// A [`CurrentUser`] whose email is listed in `admin_emails`.
#[derive(Debug, Clone)]
pub struct AdminUser(pub CurrentUser);

/// Read the identity headers set by the proxy.
///
/// A missing or empty user header is unauthenticated. A non-UTF-8 header is
/// rejected as a bad request rather than silently ignored.
pub fn identity_from_headers(headers: &HeaderMap, config: &Config) -> Result<CurrentUser> {
    let proxy = &config.auth.proxy_header;

    let Some(raw) = headers.get(&proxy.user_header) else {
        trace!("No proxy identity header present");
        return Err(Error::Unauthenticated { message: None });
    };
    let email = raw
        .to_str()
        .map_err(|e| Error::BadRequest {
            message: format!("Invalid {} header: {e}", proxy.user_header),
        })?
        .trim();
    if email.is_empty() {
        return Err(Error::Unauthenticated { message: None });
    }

    let phone_verified = headers
        .get(&proxy.phone_verified_header)
        .and_then(|h| h.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));

    Ok(CurrentUser {
        email: email.to_string(),
        phone_verified,
        is_admin: config.is_admin(email),
    })
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        identity_from_headers(&parts.headers, &state.config)
    }
}

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let user = identity_from_headers(&parts.headers, &state.config)?;
        if !user.is_admin {
            return Err(Error::Forbidden {
                message: "Administrator access required".to_string(),
            });
        }
        Ok(AdminUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{ADMIN_EMAIL, create_test_config};
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        headers
    }

    #[test]
    fn test_missing_header_is_unauthenticated() {
        let config = create_test_config();
        let err = identity_from_headers(&HeaderMap::new(), &config).unwrap_err();
        assert!(matches!(err, Error::Unauthenticated { .. }));

        let err = identity_from_headers(&headers(&[("x-registrar-user", "  ")]), &config).unwrap_err();
        assert!(matches!(err, Error::Unauthenticated { .. }));
    }

    #[test]
    fn test_phone_verification_flag() {
        let config = create_test_config();

        let user = identity_from_headers(&headers(&[("x-registrar-user", "ada@example.com")]), &config).unwrap();
        assert_eq!(user.email, "ada@example.com");
        assert!(!user.phone_verified);
        assert!(!user.is_admin);

        let user = identity_from_headers(
            &headers(&[("x-registrar-user", "ada@example.com"), ("x-registrar-phone-verified", "TRUE")]),
            &config,
        )
        .unwrap();
        assert!(user.phone_verified);

        let user = identity_from_headers(
            &headers(&[("x-registrar-user", "ada@example.com"), ("x-registrar-phone-verified", "yes")]),
            &config,
        )
        .unwrap();
        assert!(!user.phone_verified);
    }

    #[test]
    fn test_admin_is_resolved_from_config() {
        let config = create_test_config();
        let user = identity_from_headers(&headers(&[("x-registrar-user", &ADMIN_EMAIL.to_uppercase())]), &config).unwrap();
        assert!(user.is_admin);
        assert!(user.requester().is_admin);
    }

    #[test]
    fn test_custom_header_names() {
        let mut config = create_test_config();
        config.auth.proxy_header.user_header = "x-forwarded-email".to_string();

        let err = identity_from_headers(&headers(&[("x-registrar-user", "ada@example.com")]), &config).unwrap_err();
        assert!(matches!(err, Error::Unauthenticated { .. }));

        let user = identity_from_headers(&headers(&[("x-forwarded-email", "ada@example.com")]), &config).unwrap();
        assert_eq!(user.email, "ada@example.com");
    }
}
