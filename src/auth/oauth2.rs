//! OAuth2/OIDC collaborator.
//!
//! # Responsibilities
//! - Build the authorization redirect for a provider
//! - Exchange an authorization code for tokens (client secret basic)
//! - Verify the RS256 ID token against the issuer's JWKS
//! - Collect identity claims for the session
//!
//! # Data Flow
//! ```text
//! callback code
//!     → POST token_url (grant_type=authorization_code)
//!     → id_token header kid → cached JWKS (refetch on miss or TTL)
//!     → RS256 verify, aud = client_id, iss = configured issuer
//!     → optional GET userinfo (Bearer access_token), merged over claims
//!     → Identity { sub, expires_at, attributes }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::RwLock;
use url::Url;

use crate::config::OAuth2Config;
use crate::provider::ProxyProvider;

/// Claims that describe the token itself rather than the user.
const REGISTERED_CLAIMS: &[&str] = &[
    "iss", "aud", "exp", "iat", "nbf", "jti", "azp", "nonce", "at_hash", "c_hash", "auth_time",
];

/// Clock skew tolerated on `exp`/`iat`.
const LEEWAY_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum OAuth2Error {
    #[error("invalid OAuth2 endpoint `{0}`")]
    Endpoint(String),

    #[error("HTTP error talking to the identity provider: {0}")]
    Http(#[from] reqwest::Error),

    #[error("token endpoint returned {0}")]
    TokenEndpoint(reqwest::StatusCode),

    #[error("token response has no id_token")]
    MissingIdToken,

    #[error("ID token rejected: {0}")]
    InvalidToken(String),

    #[error("ID token verification failed: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

/// The user behind a completed login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub sub: String,
    /// ID token `exp`, seconds since the epoch.
    pub expires_at: Option<u64>,
    pub attributes: BTreeMap<String, String>,
}

/// Everything the gateway needs from an OAuth2/OIDC provider.
#[async_trait]
pub trait OAuth2Client: Send + Sync {
    fn authorize_endpoint(&self) -> &Url;

    /// Authorization URL the browser is sent to.
    fn authorization_url(&self, provider: &ProxyProvider, redirect_uri: &Url, state: &str) -> Url {
        let oauth = provider.oauth();
        let mut url = self.authorize_endpoint().clone();
        url.query_pairs_mut()
            .append_pair("response_type", oauth.response_type.as_str())
            .append_pair("client_id", provider.client_id())
            .append_pair("redirect_uri", redirect_uri.as_str())
            .append_pair("scope", &oauth.scopes.join(" "))
            .append_pair("state", state);
        url
    }

    /// Redeem `code` and return the verified identity.
    async fn exchange_code(
        &self,
        provider: &ProxyProvider,
        code: &str,
        redirect_uri: &str,
    ) -> Result<Identity, OAuth2Error>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    id_token: Option<String>,
    access_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct Jwk {
    kty: String,
    #[serde(default)]
    kid: Option<String>,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct JwkSet {
    keys: Vec<Jwk>,
}

struct JwksCache {
    keys: Vec<Jwk>,
    fetched_at: Instant,
}

/// [`OAuth2Client`] talking to a standard OIDC provider over HTTP.
pub struct OidcClient {
    http: reqwest::Client,
    issuer: Option<String>,
    authorize_url: Url,
    token_url: Url,
    userinfo_url: Option<Url>,
    jwks_url: Url,
    jwks_ttl: Duration,
    jwks: RwLock<Option<JwksCache>>,
}

fn parse_endpoint(value: &str) -> Result<Url, OAuth2Error> {
    Url::parse(value).map_err(|_| OAuth2Error::Endpoint(value.to_string()))
}

impl OidcClient {
    pub fn new(config: &OAuth2Config, timeout: Duration) -> Result<Self, OAuth2Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            issuer: config.issuer.clone(),
            authorize_url: parse_endpoint(&config.authorize_url)?,
            token_url: parse_endpoint(&config.token_url)?,
            userinfo_url: config
                .userinfo_url
                .as_deref()
                .map(parse_endpoint)
                .transpose()?,
            jwks_url: parse_endpoint(&config.jwks_url)?,
            jwks_ttl: Duration::from_secs(config.jwks_ttl_secs),
            jwks: RwLock::new(None),
        })
    }

    async fn fetch_jwks(&self) -> Result<Vec<Jwk>, OAuth2Error> {
        let set: JwkSet = self
            .http
            .get(self.jwks_url.clone())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        tracing::debug!(url = %self.jwks_url, keys = set.keys.len(), "Fetched JWKS");
        Ok(set.keys)
    }

    fn find_key(keys: &[Jwk], kid: Option<&str>) -> Option<Jwk> {
        keys.iter()
            .filter(|k| k.kty == "RSA")
            .find(|k| kid.is_none() || k.kid.as_deref() == kid)
            .cloned()
    }

    /// Signing key for `kid`, refetching the JWKS when stale or when the
    /// key is unknown (provider key rotation).
    async fn decoding_key(&self, kid: Option<&str>) -> Result<DecodingKey, OAuth2Error> {
        {
            let cache = self.jwks.read().await;
            if let Some(cache) = cache.as_ref() {
                if cache.fetched_at.elapsed() < self.jwks_ttl {
                    if let Some(jwk) = Self::find_key(&cache.keys, kid) {
                        return rsa_key(&jwk);
                    }
                }
            }
        }

        let keys = self.fetch_jwks().await?;
        let jwk = Self::find_key(&keys, kid);
        *self.jwks.write().await = Some(JwksCache {
            keys,
            fetched_at: Instant::now(),
        });

        match jwk {
            Some(jwk) => rsa_key(&jwk),
            None => Err(OAuth2Error::InvalidToken(
                "no matching JWK for token kid".to_string(),
            )),
        }
    }

    async fn verify_id_token(
        &self,
        provider: &ProxyProvider,
        id_token: &str,
    ) -> Result<Map<String, Value>, OAuth2Error> {
        let header = decode_header(id_token)?;
        if header.alg != Algorithm::RS256 {
            return Err(OAuth2Error::InvalidToken(format!(
                "unexpected algorithm {:?}",
                header.alg
            )));
        }
        let key = self.decoding_key(header.kid.as_deref()).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = LEEWAY_SECS;
        validation.set_audience(&[provider.client_id()]);
        let mut required: HashSet<String> = ["exp", "aud", "sub"].map(String::from).into();
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer.as_str()]);
            required.insert("iss".to_string());
        }
        validation.required_spec_claims = required;

        let data = decode::<Map<String, Value>>(id_token, &key, &validation)?;
        Ok(data.claims)
    }

    async fn userinfo(&self, access_token: &str) -> Result<Option<Map<String, Value>>, OAuth2Error> {
        let Some(url) = &self.userinfo_url else {
            return Ok(None);
        };
        let claims = self
            .http
            .get(url.clone())
            .bearer_auth(access_token)
            .send()
            .await?
            .error_for_status()?
            .json::<Map<String, Value>>()
            .await?;
        Ok(Some(claims))
    }
}

fn rsa_key(jwk: &Jwk) -> Result<DecodingKey, OAuth2Error> {
    match (&jwk.n, &jwk.e) {
        (Some(n), Some(e)) => Ok(DecodingKey::from_rsa_components(n, e)?),
        _ => Err(OAuth2Error::InvalidToken(
            "RSA JWK missing modulus or exponent".to_string(),
        )),
    }
}

#[async_trait]
impl OAuth2Client for OidcClient {
    fn authorize_endpoint(&self) -> &Url {
        &self.authorize_url
    }

    async fn exchange_code(
        &self,
        provider: &ProxyProvider,
        code: &str,
        redirect_uri: &str,
    ) -> Result<Identity, OAuth2Error> {
        let response = self
            .http
            .post(self.token_url.clone())
            .basic_auth(provider.client_id(), Some(provider.client_secret()))
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(OAuth2Error::TokenEndpoint(response.status()));
        }
        let tokens: TokenResponse = response.json().await?;
        let id_token = tokens.id_token.ok_or(OAuth2Error::MissingIdToken)?;

        let mut claims = self.verify_id_token(provider, &id_token).await?;
        let sub = claims
            .get("sub")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| OAuth2Error::InvalidToken("sub claim missing".to_string()))?;
        let expires_at = claims.get("exp").and_then(Value::as_u64);

        if let Some(access_token) = tokens.access_token.as_deref() {
            if let Some(userinfo) = self.userinfo(access_token).await? {
                if userinfo.get("sub").and_then(Value::as_str) != Some(sub.as_str()) {
                    return Err(OAuth2Error::InvalidToken(
                        "userinfo sub does not match ID token".to_string(),
                    ));
                }
                claims.extend(userinfo);
            }
        }

        Ok(Identity {
            sub,
            expires_at,
            attributes: collect_attributes(&claims),
        })
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Flatten user claims into session attributes.
///
/// Scalar claims are kept as strings. The `pb_proxy` scope delivers extra
/// attributes under `user_attributes`; those win over top-level claims.
pub fn collect_attributes(claims: &Map<String, Value>) -> BTreeMap<String, String> {
    let mut attributes: BTreeMap<String, String> = claims
        .iter()
        .filter(|(key, _)| !REGISTERED_CLAIMS.contains(&key.as_str()))
        .filter_map(|(key, value)| scalar(value).map(|v| (key.clone(), v)))
        .collect();

    for nested in ["user_attributes", "pb_proxy"] {
        if let Some(Value::Object(extra)) = claims.get(nested) {
            for (key, value) in extra {
                if let Some(value) = scalar(value) {
                    attributes.insert(key.clone(), value);
                }
            }
        }
    }
    attributes
}
