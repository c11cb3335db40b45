//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (provider id and certificate references)
//! - Validate value ranges (timeouts > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::GatewayConfig;
use crate::provider::{generate_cookie_secret, validate_provider};

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    fn nested(self, prefix: &str) -> Self {
        Self {
            field: format!("{prefix}.{}", self.field),
            message: self.message,
        }
    }
}

/// Validate a full gateway configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("`{}` is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_concurrent_requests == 0 {
        errors.push(ValidationError::new(
            "listener.max_concurrent_requests",
            "must be greater than zero",
        ));
    }
    if let Some(tls) = &config.listener.tls {
        if tls.cert_path.is_empty() || tls.key_path.is_empty() {
            errors.push(ValidationError::new(
                "listener.tls",
                "cert_path and key_path are both required",
            ));
        }
    }

    let certificate_ids = validate_certificates(config, &mut errors);
    validate_providers(config, &certificate_ids, &mut errors);
    validate_oauth2(config, &mut errors);

    let session = &config.session;
    if session.cookie_name.is_empty() || session.state_cookie_name.is_empty() {
        errors.push(ValidationError::new("session", "cookie names must not be empty"));
    } else if session.cookie_name == session.state_cookie_name {
        errors.push(ValidationError::new(
            "session.state_cookie_name",
            "must differ from session.cookie_name",
        ));
    }
    if session.max_age_secs == 0 {
        errors.push(ValidationError::new("session.max_age_secs", "must be greater than zero"));
    }
    if session.login_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "session.login_timeout_secs",
            "must be greater than zero",
        ));
    }

    if config.timeouts.connect_secs == 0 || config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts", "timeouts must be greater than zero"));
    }
    if config.retries.max_attempts == 0 {
        errors.push(ValidationError::new("retries.max_attempts", "must be at least 1"));
    }
    if config.retries.base_delay_ms > config.retries.max_delay_ms {
        errors.push(ValidationError::new(
            "retries.base_delay_ms",
            "must not exceed retries.max_delay_ms",
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "is not a socket address",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_certificates<'a>(
    config: &'a GatewayConfig,
    errors: &mut Vec<ValidationError>,
) -> HashSet<&'a str> {
    let mut ids = HashSet::new();
    for cert in &config.certificates {
        if cert.id.is_empty() {
            errors.push(ValidationError::new("certificates.id", "must not be empty"));
        } else if !ids.insert(cert.id.as_str()) {
            errors.push(ValidationError::new(
                format!("certificates[{}]", cert.id),
                "duplicate certificate id",
            ));
        }
    }
    ids
}

fn validate_providers(
    config: &GatewayConfig,
    certificate_ids: &HashSet<&str>,
    errors: &mut Vec<ValidationError>,
) {
    if config.provider_id.is_empty() {
        errors.push(ValidationError::new("provider_id", "must not be empty"));
    } else if !config.providers.iter().any(|p| p.id == config.provider_id) {
        errors.push(ValidationError::new(
            "provider_id",
            format!("no provider with id `{}`", config.provider_id),
        ));
    }

    let mut seen = HashSet::new();
    for record in &config.providers {
        let prefix = format!("providers[{}]", record.id);
        if record.id.is_empty() {
            errors.push(ValidationError::new("providers.id", "must not be empty"));
            continue;
        }
        if !seen.insert(record.id.as_str()) {
            errors.push(ValidationError::new(prefix, "duplicate provider id"));
            continue;
        }

        if let Some(cert) = &record.certificate {
            if !certificate_ids.contains(cert.as_str()) {
                errors.push(ValidationError::new(
                    format!("{prefix}.certificate"),
                    format!("unknown certificate `{cert}`"),
                ));
            }
        }

        // A missing secret is only acceptable when it can be persisted.
        let mut record = record.clone();
        if record.cookie_secret.is_empty() {
            if config.session.secret_file.is_none() {
                errors.push(ValidationError::new(
                    format!("{prefix}.cookie_secret"),
                    "required unless session.secret_file is set \
                     (create one with `pbprox-cli generate-secret`)",
                ));
            }
            record.cookie_secret = generate_cookie_secret();
        }
        if let Err(provider_errors) = validate_provider(&record) {
            errors.extend(provider_errors.into_iter().map(|e| e.nested(&prefix)));
        }
    }
}

fn validate_oauth2(config: &GatewayConfig, errors: &mut Vec<ValidationError>) {
    let oauth2 = &config.oauth2;
    let required = [
        ("oauth2.authorize_url", Some(&oauth2.authorize_url)),
        ("oauth2.token_url", Some(&oauth2.token_url)),
        ("oauth2.jwks_url", Some(&oauth2.jwks_url)),
        ("oauth2.userinfo_url", oauth2.userinfo_url.as_ref()),
    ];
    for (field, value) in required {
        let Some(value) = value else { continue };
        match Url::parse(value) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(_) => errors.push(ValidationError::new(field, "scheme must be http or https")),
            Err(e) => errors.push(ValidationError::new(field, format!("invalid URL: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::CertificateConfig;
    use crate::provider::{ProxyProviderRecord, SkipPaths};

    fn valid_config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.provider_id = "app".into();
        config.oauth2.authorize_url = "https://id.example.com/authorize".into();
        config.oauth2.token_url = "https://id.example.com/token".into();
        config.oauth2.jwks_url = "https://id.example.com/jwks".into();
        config.providers.push(ProxyProviderRecord {
            id: "app".into(),
            name: "App".into(),
            internal_host: "http://app:8080".into(),
            external_host: "https://app.example.com".into(),
            client_id: "client".into(),
            client_secret: "secret".into(),
            cookie_secret: "0123456789ABCDEFGHIJKLMNOPQRSTUV".into(),
            ..Default::default()
        });
        config
    }

    #[test]
    fn missing_cookie_secret_needs_secret_file() {
        let mut config = valid_config();
        config.providers[0].cookie_secret.clear();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1, "{errors:?}");
        assert_eq!(errors[0].field, "providers[app].cookie_secret");

        config.session.secret_file = Some("/var/lib/pbprox/secrets.toml".into());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn accepts_valid_config() {
        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = valid_config();
        config.listener.bind_address = "nowhere".into();
        config.retries.max_attempts = 0;
        config.providers[0].skip_path_regex = SkipPaths::List(vec!["(".into()]);

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3, "{errors:?}");
        assert!(errors
            .iter()
            .any(|e| e.field == "providers[app].skip_path_regex[0]"));
    }

    #[test]
    fn rejects_unknown_provider_id() {
        let mut config = valid_config();
        config.provider_id = "other".into();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "provider_id");
    }

    #[test]
    fn rejects_dangling_certificate_reference() {
        let mut config = valid_config();
        config.providers[0].certificate = Some("missing".into());
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "providers[app].certificate");

        config.certificates.push(CertificateConfig {
            id: "missing".into(),
            name: String::new(),
            certificate_path: "cert.pem".into(),
            key_path: "key.pem".into(),
        });
        assert!(validate_config(&config).is_ok());
    }
}
