//! Upstream forwarding.
//!
//! # Responsibilities
//! - Rebuild the inbound request against `internal_host`
//! - Inject Basic credentials for authenticated requests
//! - Apply the provider's TLS validation setting and client certificate
//! - Retry connection failures with bounded backoff
//! - Relay the upstream response as a stream
//!
//! # Data Flow
//! ```text
//! Request<Body> + ForwardContext
//!     → buffer body (bounded, needed for retries; over the limit → 413)
//!     → URL: internal_host scheme/authority, inbound path + query
//!     → headers: strip hop-by-hop + gateway cookies, add X-Forwarded-*
//!     → reqwest client (cached per provider snapshot version)
//!     → attempt → retryable failure? backoff → attempt again
//!     → Response<Body> (upstream body streamed through)
//! ```
//!
//! # Design Decisions
//! - One client per snapshot: TLS settings change only with the provider
//! - Redirects are relayed to the browser, never followed
//! - Dropping the returned future cancels the upstream call

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, Request, Response, Uri};
use futures_util::StreamExt;
use thiserror::Error;
use url::Url;

use super::basic_auth::basic_auth_header;
use crate::auth::Session;
use crate::config::{RetryConfig, TimeoutConfig};
use crate::observability::metrics;
use crate::provider::{CertificateError, CertificateStore, ConfigSnapshot};
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::retries::{is_retryable, max_attempts};
use crate::security::headers::{set_forwarded_headers, strip_cookies, strip_hop_by_hop};

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("session lacks attribute `{0}`")]
    MissingAttribute(String),

    #[error("upstream unavailable after {attempts} attempt(s): {source}")]
    Unavailable {
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    #[error(transparent)]
    Certificate(#[from] CertificateError),

    #[error("failed to build upstream client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request body exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("failed to read request body: {0}")]
    Body(#[source] axum::Error),
}

/// Per-request facts the forwarder cannot read from the request itself.
#[derive(Debug, Clone, Default)]
pub struct ForwardContext {
    /// Peer address of the client connection.
    pub client: Option<IpAddr>,
    /// Verified session; `None` for exempted requests.
    pub session: Option<Session>,
}

/// Settings shared by every upstream client.
#[derive(Debug, Clone)]
pub struct ForwarderSettings {
    pub timeouts: TimeoutConfig,
    pub retries: RetryConfig,
    pub max_body_bytes: usize,
    /// Cookies stripped before forwarding.
    pub own_cookies: Vec<String>,
    /// Scheme clients used to reach the gateway.
    pub public_scheme: &'static str,
}

struct CachedClient {
    provider_id: String,
    version: u64,
    client: reqwest::Client,
}

/// Forwards gated requests to the provider's upstream.
pub struct Forwarder {
    settings: ForwarderSettings,
    certificates: Arc<dyn CertificateStore>,
    client: ArcSwapOption<CachedClient>,
}

impl Forwarder {
    pub fn new(settings: ForwarderSettings, certificates: Arc<dyn CertificateStore>) -> Self {
        Self {
            settings,
            certificates,
            client: ArcSwapOption::empty(),
        }
    }

    /// Drop the cached client so the next request rebuilds it, e.g. after
    /// certificate material changed on disk.
    pub fn invalidate(&self) {
        self.client.store(None);
    }

    fn client_for(&self, snapshot: &ConfigSnapshot) -> Result<reqwest::Client, ForwardError> {
        if let Some(cached) = self.client.load().as_ref() {
            if cached.version == snapshot.version && cached.provider_id == snapshot.provider_id {
                return Ok(cached.client.clone());
            }
        }

        let provider = &snapshot.provider;
        let mut builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .connect_timeout(Duration::from_secs(self.settings.timeouts.connect_secs))
            .timeout(Duration::from_secs(self.settings.timeouts.request_secs))
            .danger_accept_invalid_certs(!provider.internal_host_ssl_validation());

        if let Some(id) = provider.certificate() {
            let identity = self.certificates.resolve(id)?.identity()?;
            builder = builder.identity(identity);
        }

        let client = builder.build().map_err(ForwardError::Client)?;
        self.client.store(Some(Arc::new(CachedClient {
            provider_id: snapshot.provider_id.clone(),
            version: snapshot.version,
            client: client.clone(),
        })));

        tracing::debug!(
            provider = %snapshot.provider_id,
            version = snapshot.version,
            ssl_validation = provider.internal_host_ssl_validation(),
            certificate = provider.certificate().unwrap_or("-"),
            "Built upstream client"
        );
        Ok(client)
    }

    /// Forward `request` to the snapshot's upstream.
    pub async fn forward(
        &self,
        snapshot: &ConfigSnapshot,
        request: Request<Body>,
        ctx: ForwardContext,
    ) -> Result<Response<Body>, ForwardError> {
        let provider = &snapshot.provider;
        let authorization = match &ctx.session {
            Some(session) => basic_auth_header(provider, session)?,
            None => None,
        };

        let (parts, body) = request.into_parts();
        let url = upstream_url(provider.internal_host(), &parts.uri);

        let declared = parts
            .headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if declared.is_some_and(|len| len > self.settings.max_body_bytes) {
            return Err(ForwardError::TooLarge {
                limit: self.settings.max_body_bytes,
            });
        }

        let mut headers = parts.headers;
        let host = headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);
        headers.remove(header::CONTENT_LENGTH);
        let own: Vec<&str> = self.settings.own_cookies.iter().map(String::as_str).collect();
        strip_cookies(&mut headers, &own);
        set_forwarded_headers(
            &mut headers,
            ctx.client,
            host.as_deref(),
            self.settings.public_scheme,
        );
        if let Some(value) = authorization {
            headers.insert(header::AUTHORIZATION, value);
        }

        let body = read_body(body, self.settings.max_body_bytes).await?;
        let client = self.client_for(snapshot)?;
        let method = parts.method;
        let max_attempts = max_attempts(&self.settings.retries);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = client
                .request(method.clone(), url.clone())
                .headers(headers.clone())
                .body(body.clone())
                .send()
                .await;

            match result {
                Ok(response) => {
                    tracing::debug!(
                        upstream = %url,
                        status = %response.status(),
                        attempt,
                        "Upstream responded"
                    );
                    return Ok(relay(response));
                }
                Err(e) if attempt < max_attempts && is_retryable(&method, &e) => {
                    let delay = calculate_backoff(
                        attempt,
                        self.settings.retries.base_delay_ms,
                        self.settings.retries.max_delay_ms,
                    );
                    tracing::warn!(
                        upstream = %url,
                        attempt,
                        delay = ?delay,
                        error = %e,
                        "Retrying upstream request"
                    );
                    metrics::record_upstream_retry();
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(ForwardError::Unavailable {
                        attempts: attempt,
                        source: e,
                    })
                }
            }
        }
    }
}

/// Buffer at most `limit` bytes of `body`.
///
/// Exceeding the limit and a failing read (client gone mid-upload) are
/// reported separately.
async fn read_body(body: Body, limit: usize) -> Result<Bytes, ForwardError> {
    let mut stream = body.into_data_stream();
    let mut collected = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(ForwardError::Body)?;
        if collected.len() + chunk.len() > limit {
            return Err(ForwardError::TooLarge { limit });
        }
        collected.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(collected))
}

/// `base` with the inbound path and query.
pub fn upstream_url(base: &Url, uri: &Uri) -> Url {
    let mut url = base.clone();
    url.set_path(uri.path());
    url.set_query(uri.query());
    url.set_fragment(None);
    url
}

fn relay(response: reqwest::Response) -> Response<Body> {
    let status = response.status();
    let mut headers: HeaderMap = response.headers().clone();
    strip_hop_by_hop(&mut headers);

    let mut relayed = Response::new(Body::from_stream(response.bytes_stream()));
    *relayed.status_mut() = status;
    *relayed.headers_mut() = headers;
    relayed
}
