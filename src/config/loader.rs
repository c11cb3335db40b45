//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<GatewayConfig, ConfigError> {
    let config: GatewayConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
provider_id = "grafana"

[oauth2]
authorize_url = "https://id.example.com/application/o/authorize/"
token_url = "https://id.example.com/application/o/token/"
jwks_url = "https://id.example.com/application/o/grafana/jwks/"

[[providers]]
id = "grafana"
name = "Grafana"
internal_host = "http://grafana:3000"
external_host = "https://grafana.example.com"
client_id = "abc"
client_secret = "def"
cookie_secret = "0123456789ABCDEFGHIJKLMNOPQRSTUV"
skip_path_regex = """
^/api/health$
^/public/.*
"""
"#;

    #[test]
    fn parses_minimal_config_with_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:9000");
        assert_eq!(config.retries.max_attempts, 2);
        assert_eq!(config.session.cookie_name, "_pbprox");

        let provider = &config.providers[0];
        assert!(provider.internal_host_ssl_validation);
        assert_eq!(
            provider.skip_path_regex.patterns(),
            vec!["^/api/health$".to_string(), "^/public/.*".to_string()]
        );
    }

    #[test]
    fn reports_validation_failures() {
        let broken = MINIMAL.replace("http://grafana:3000", "ftp://grafana");
        match parse_config(&broken) {
            Err(ConfigError::Validation(errors)) => {
                assert!(errors.iter().any(|e| e.field.ends_with("internal_host")));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, MINIMAL.as_bytes()).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.provider_id, "grafana");
    }

    #[test]
    fn missing_file_is_io_error() {
        assert!(matches!(
            load_config(Path::new("/nonexistent/pbprox.toml")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(matches!(
            parse_config("provider_id = "),
            Err(ConfigError::Parse(_))
        ));
    }
}
