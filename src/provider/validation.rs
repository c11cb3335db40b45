//! Proxy provider validation.
//!
//! Pure function from a stored record to a [`ProxyProvider`]. Every problem
//! is reported, so an operator fixes a record in one pass.

use url::Url;

use super::model::{OAuth2Defaults, ProxyProvider, ProxyProviderRecord};
use super::model::{ClientType, JwtAlgorithm, ResponseType};
use super::secret::{CookieSecret, COOKIE_SECRET_LEN};
use crate::config::ValidationError;
use crate::routing::ExemptionSet;

/// Validate a stored record and apply the OAuth2 defaults.
pub fn validate_provider(record: &ProxyProviderRecord) -> Result<ProxyProvider, Vec<ValidationError>> {
    compile_provider(record).map(|(provider, _)| provider)
}

/// Like [`validate_provider`], also returning the compiled exemptions so a
/// snapshot does not compile its patterns a second time.
pub fn compile_provider(
    record: &ProxyProviderRecord,
) -> Result<(ProxyProvider, ExemptionSet), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let internal_host = parse_host("internal_host", &record.internal_host, &mut errors);
    let external_host = parse_host("external_host", &record.external_host, &mut errors);

    let patterns = record.skip_path_regex.patterns();
    let exemptions = match ExemptionSet::compile(&patterns) {
        Ok(exemptions) => Some(exemptions),
        Err(pattern_errors) => {
            errors.extend(pattern_errors.into_iter().map(|e| {
                ValidationError::new(format!("skip_path_regex[{}]", e.index), e.to_string())
            }));
            None
        }
    };

    if record.cookie_secret.chars().count() != COOKIE_SECRET_LEN {
        errors.push(ValidationError::new(
            "cookie_secret",
            format!("must be exactly {COOKIE_SECRET_LEN} characters"),
        ));
    }

    if record.client_id.trim().is_empty() {
        errors.push(ValidationError::new("client_id", "must not be empty"));
    }

    if let Some(cert) = &record.certificate {
        if cert.trim().is_empty() {
            errors.push(ValidationError::new("certificate", "must not be blank when set"));
        }
    }

    let (Some(internal_host), Some(external_host), Some(exemptions), true) =
        (internal_host, external_host, exemptions, errors.is_empty())
    else {
        return Err(errors);
    };

    let mut provider = ProxyProvider {
        name: if record.name.is_empty() {
            record.id.clone()
        } else {
            record.name.clone()
        },
        internal_host,
        external_host,
        internal_host_ssl_validation: record.internal_host_ssl_validation,
        skip_path_regex: patterns,
        basic_auth_enabled: record.basic_auth_enabled,
        basic_auth_user_attribute: record.basic_auth_user_attribute.trim().to_string(),
        basic_auth_password_attribute: record.basic_auth_password_attribute.trim().to_string(),
        certificate: record.certificate.clone(),
        cookie_secret: CookieSecret::new(record.cookie_secret.clone()),
        client_id: record.client_id.clone(),
        client_secret: record.client_secret.clone(),
        oauth: OAuth2Defaults {
            client_type: ClientType::Confidential,
            response_type: ResponseType::Code,
            jwt_alg: JwtAlgorithm::RS256,
            scopes: Vec::new(),
            redirect_uris: Vec::new(),
        },
    };
    provider.set_oauth_defaults();
    Ok((provider, exemptions))
}

/// Absolute http(s) URL with a host. Single-label hosts like `backend` are fine.
fn parse_host(field: &str, value: &str, errors: &mut Vec<ValidationError>) -> Option<Url> {
    let url = match Url::parse(value.trim()) {
        Ok(url) => url,
        Err(e) => {
            errors.push(ValidationError::new(field, format!("invalid URL `{value}`: {e}")));
            return None;
        }
    };
    if !matches!(url.scheme(), "http" | "https") {
        errors.push(ValidationError::new(field, "scheme must be http or https"));
        return None;
    }
    if url.host_str().map_or(true, str::is_empty) {
        errors.push(ValidationError::new(field, "must include a host"));
        return None;
    }
    Some(url)
}
