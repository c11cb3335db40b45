//! HTTP Basic credential injection.

use axum::http::HeaderValue;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use super::ForwardError;
use crate::auth::Session;
use crate::provider::ProxyProvider;

/// `Authorization` value for `session`, or `None` when the provider does not
/// inject credentials.
///
/// Both attributes must be present in the session; a missing one is an error
/// and the request must not be forwarded. Unset attribute names mean `email`.
pub fn basic_auth_header(
    provider: &ProxyProvider,
    session: &Session,
) -> Result<Option<HeaderValue>, ForwardError> {
    if !provider.basic_auth_enabled() {
        return Ok(None);
    }

    let lookup = |name: &str| {
        session
            .attribute(name)
            .ok_or_else(|| ForwardError::MissingAttribute(name.to_string()))
    };
    let user = lookup(provider.basic_auth_user_attribute())?;
    let password = lookup(provider.basic_auth_password_attribute())?;

    let encoded = STANDARD.encode(format!("{user}:{password}"));
    let mut value = HeaderValue::from_str(&format!("Basic {encoded}")).map_err(|_| {
        ForwardError::MissingAttribute(provider.basic_auth_user_attribute().to_string())
    })?;
    value.set_sensitive(true);
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{validate_provider, ProxyProviderRecord};
    use std::collections::BTreeMap;

    fn provider(enabled: bool, user_attribute: &str) -> ProxyProvider {
        provider_with(enabled, user_attribute, "app_password")
    }

    fn provider_with(enabled: bool, user_attribute: &str, password_attribute: &str) -> ProxyProvider {
        validate_provider(&ProxyProviderRecord {
            id: "app".into(),
            internal_host: "http://backend".into(),
            external_host: "https://app.example.com".into(),
            cookie_secret: "C".repeat(32),
            client_id: "client".into(),
            basic_auth_enabled: enabled,
            basic_auth_user_attribute: user_attribute.into(),
            basic_auth_password_attribute: password_attribute.into(),
            ..Default::default()
        })
        .unwrap()
    }

    fn session(attributes: &[(&str, &str)]) -> Session {
        Session {
            sid: "sid".into(),
            sub: "alice".into(),
            iat: 0,
            exp: u64::MAX,
            attributes: attributes
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn test_disabled_injects_nothing() {
        let header = basic_auth_header(&provider(false, ""), &session(&[])).unwrap();
        assert!(header.is_none());
    }

    #[test]
    fn test_empty_user_attribute_uses_email() {
        let session = session(&[("email", "alice@example.com"), ("app_password", "pw")]);
        let header = basic_auth_header(&provider(true, ""), &session).unwrap().unwrap();
        // alice@example.com:pw
        assert_eq!(header, "Basic YWxpY2VAZXhhbXBsZS5jb206cHc=");
    }

    #[test]
    fn test_empty_attributes_both_use_email() {
        let session = session(&[("email", "a@b.com")]);
        let header = basic_auth_header(&provider_with(true, "", ""), &session)
            .unwrap()
            .unwrap();
        // a@b.com:a@b.com
        assert_eq!(header, "Basic YUBiLmNvbTphQGIuY29t");
    }

    #[test]
    fn test_custom_user_attribute() {
        let session = session(&[("username", "alice"), ("app_password", "pw")]);
        let header = basic_auth_header(&provider(true, "username"), &session).unwrap().unwrap();
        assert_eq!(header, "Basic YWxpY2U6cHc=");
    }

    #[test]
    fn test_missing_password_attribute() {
        let session = session(&[("email", "alice@example.com")]);
        let err = basic_auth_header(&provider(true, ""), &session).unwrap_err();
        assert!(matches!(err, ForwardError::MissingAttribute(name) if name == "app_password"));
    }
}
