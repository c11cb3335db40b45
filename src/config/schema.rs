//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::provider::ProxyProviderRecord;

/// Root configuration for the authenticating gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Identifier of the provider this gateway protects.
    pub provider_id: String,

    /// Proxy provider records, keyed by their `id`.
    pub providers: Vec<ProxyProviderRecord>,

    /// Certificate/key pairs that providers may reference.
    pub certificates: Vec<CertificateConfig>,

    /// OAuth2/OIDC endpoints used for the login flow.
    pub oauth2: OAuth2Config,

    /// Session cookie settings.
    pub session: SessionConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Upstream retry configuration.
    pub retries: RetryConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:9000").
    pub bind_address: String,

    /// Optional TLS configuration for the public listener.
    pub tls: Option<TlsConfig>,

    /// Maximum requests processed concurrently (backpressure).
    pub max_concurrent_requests: usize,

    /// Largest request body buffered for forwarding.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:9000".to_string(),
            tls: None,
            max_concurrent_requests: 10_000,
            max_body_bytes: 8 * 1024 * 1024,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// A certificate/key pair on disk, addressable by `id`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CertificateConfig {
    /// Identifier referenced by `providers[].certificate`.
    pub id: String,

    /// Human readable name.
    #[serde(default)]
    pub name: String,

    /// Path to the PEM encoded certificate chain.
    pub certificate_path: String,

    /// Path to the PEM encoded private key.
    pub key_path: String,
}

/// OAuth2/OIDC provider endpoints.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OAuth2Config {
    /// Expected `iss` claim of ID tokens. Not checked when unset.
    pub issuer: Option<String>,

    /// Authorization endpoint the browser is redirected to.
    pub authorize_url: String,

    /// Token endpoint used for the code exchange.
    pub token_url: String,

    /// Optional userinfo endpoint; claims are merged into the session.
    pub userinfo_url: Option<String>,

    /// JWKS document holding the RS256 verification keys.
    pub jwks_url: String,

    /// How long fetched signing keys are trusted before a refetch.
    pub jwks_ttl_secs: u64,
}

impl Default for OAuth2Config {
    fn default() -> Self {
        Self {
            issuer: None,
            authorize_url: String::new(),
            token_url: String::new(),
            userinfo_url: None,
            jwks_url: String::new(),
            jwks_ttl_secs: 600,
        }
    }
}

/// Session cookie configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name of the signed session cookie.
    pub cookie_name: String,

    /// Name of the short-lived cookie binding a login round trip.
    pub state_cookie_name: String,

    /// Upper bound on session lifetime in seconds. The ID token expiry
    /// shortens it further.
    pub max_age_secs: u64,

    /// How long a started login may take before the callback is rejected.
    pub login_timeout_secs: u64,

    /// Mark cookies `Secure`.
    pub secure: bool,

    /// File holding generated cookie secrets for providers configured
    /// without one. Without it every provider needs an explicit secret.
    pub secret_file: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "_pbprox".to_string(),
            state_cookie_name: "_pbprox_state".to_string(),
            max_age_secs: 24 * 3600,
            login_timeout_secs: 300,
            secure: true,
            secret_file: None,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Request timeout (until response headers) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 60,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries.
    pub enabled: bool,

    /// Total attempts per request, the first one included.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 2,
            base_delay_ms: 100,
            max_delay_ms: 200,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9300".to_string(),
        }
    }
}
