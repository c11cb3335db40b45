//! HTTP server setup and request gating.
//!
//! # Responsibilities
//! - Create the Axum router: login callback, sign-out, gated fallback
//! - Wire up middleware (tracing, request ID, timeout, concurrency limit)
//! - Decide per request: exempt, authenticated, or login redirect
//! - Apply configuration reloads while serving
//!
//! # Request Flow
//! ```text
//! request
//!     → snapshot = resolver.current()        (none → 503)
//!     → exemptions.is_exempt(path)?          → forward without credentials
//!     → sessions.evaluate(cookies)
//!         Authenticated → forward with session (Basic auth if enabled)
//!         otherwise     → 302 authorize endpoint + login-state cookie
//! ```

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, Query, State},
    http::{header, HeaderMap, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{any, get},
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use serde::Deserialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use super::error::{redirect, GatewayError, LoginRedirect};
use crate::auth::{now_secs, OAuth2Client, SessionState, SessionValidator};
use crate::config::GatewayConfig;
use crate::observability::metrics;
use crate::provider::{
    delete_certificate, CertificateError, CertificateKeyPair, CertificateStore, ConfigResolver,
    ConfigSnapshot, MemoryCertificateStore, MemoryProviderStore, ProxyProviderRecord, ResolveError,
    SecretFile, SecretFileError, CALLBACK_PATH, SIGN_OUT_PATH,
};
use crate::upstream::{ForwardContext, ForwardError, Forwarder, ForwarderSettings};

/// Grace period for in-flight requests on the TLS listener.
const TLS_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Certificate(#[from] CertificateError),

    #[error("refusing to start: {0}")]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Secrets(#[from] SecretFileError),
}

/// Provider records with missing cookie secrets filled in from the
/// configured secret file.
fn provider_records(config: &GatewayConfig) -> Result<Vec<ProxyProviderRecord>, SecretFileError> {
    let mut records = config.providers.clone();
    if let Some(path) = &config.session.secret_file {
        SecretFile::new(path).fill(&mut records)?;
    }
    Ok(records)
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<ConfigResolver>,
    pub oauth2: Arc<dyn OAuth2Client>,
    pub sessions: Arc<SessionValidator>,
    pub forwarder: Arc<Forwarder>,
}

/// Applies configuration updates to the live stores.
#[derive(Clone)]
struct Reloader {
    store: Arc<MemoryProviderStore>,
    certificates: Arc<MemoryCertificateStore>,
    resolver: Arc<ConfigResolver>,
    forwarder: Arc<Forwarder>,
}

impl Reloader {
    fn apply(&self, config: &GatewayConfig) {
        if config.provider_id != self.resolver.provider_id() {
            tracing::warn!(
                serving = %self.resolver.provider_id(),
                configured = %config.provider_id,
                "provider_id changes take effect after a restart"
            );
        }

        let pairs = match config
            .certificates
            .iter()
            .map(CertificateKeyPair::load)
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(pairs) => pairs,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "Certificate reload failed, keeping current configuration"
                );
                return;
            }
        };

        let records = match provider_records(config) {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "Cookie secrets unavailable, keeping current configuration"
                );
                return;
            }
        };

        for id in self.certificates.ids() {
            if !pairs.iter().any(|pair| pair.id == id) {
                delete_certificate(self.certificates.as_ref(), self.store.as_ref(), &id);
            }
        }
        for pair in pairs {
            self.certificates.insert(pair);
        }
        self.forwarder.invalidate();

        self.store.sync(&records);
        match self.resolver.refresh() {
            Ok(snapshot) => tracing::info!(
                provider = %snapshot.provider_id,
                version = snapshot.version,
                "Configuration reloaded"
            ),
            Err(e) => tracing::error!(
                error = %e,
                "Provider rejected, previous snapshot stays active"
            ),
        }
    }
}

/// The authenticating gateway.
pub struct GatewayServer {
    config: GatewayConfig,
    state: AppState,
    reloader: Reloader,
}

impl GatewayServer {
    /// Build the gateway. Fails when the served provider does not resolve.
    pub fn new(config: GatewayConfig, oauth2: Arc<dyn OAuth2Client>) -> Result<Self, StartupError> {
        let certificates = Arc::new(MemoryCertificateStore::load(&config.certificates)?);
        let store = Arc::new(MemoryProviderStore::new());
        store.sync(&provider_records(&config)?);

        let resolver = Arc::new(ConfigResolver::new(store.clone(), config.provider_id.clone()));
        resolver.refresh()?;

        let settings = ForwarderSettings {
            timeouts: config.timeouts.clone(),
            retries: config.retries.clone(),
            max_body_bytes: config.listener.max_body_bytes,
            own_cookies: vec![
                config.session.cookie_name.clone(),
                config.session.state_cookie_name.clone(),
            ],
            public_scheme: if config.listener.tls.is_some() { "https" } else { "http" },
        };
        let forwarder = Arc::new(Forwarder::new(settings, certificates.clone()));

        let state = AppState {
            resolver: resolver.clone(),
            oauth2,
            sessions: Arc::new(SessionValidator::new(config.session.clone())),
            forwarder: forwarder.clone(),
        };
        let reloader = Reloader {
            store,
            certificates,
            resolver,
            forwarder,
        };

        Ok(Self {
            config,
            state,
            reloader,
        })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    pub fn router(&self) -> Router {
        let timeouts = &self.config.timeouts;
        let deadline = Duration::from_secs(timeouts.request_secs + timeouts.connect_secs);
        let permits = Arc::new(Semaphore::new(self.config.listener.max_concurrent_requests));

        Router::new()
            .route(CALLBACK_PATH, get(callback_handler))
            .route(SIGN_OUT_PATH, any(sign_out_handler))
            .fallback(gateway_handler)
            .with_state(self.state.clone())
            .layer(
                ServiceBuilder::new()
                    .layer(middleware::from_fn_with_state(permits, limit_concurrency))
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(TimeoutLayer::new(deadline))
                    .layer(middleware::from_fn(track_requests)),
            )
    }

    pub fn resolver(&self) -> &Arc<ConfigResolver> {
        &self.state.resolver
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Apply a validated configuration. Provider, certificate and
    /// exemption changes take effect for new requests; listener, session
    /// and timeout settings need a restart.
    pub fn apply_config(&self, config: &GatewayConfig) {
        self.reloader.apply(config);
    }

    fn spawn_reloads(
        &self,
        mut updates: mpsc::UnboundedReceiver<GatewayConfig>,
    ) -> tokio::task::JoinHandle<()> {
        let reloader = self.reloader.clone();
        tokio::spawn(async move {
            while let Some(config) = updates.recv().await {
                reloader.apply(&config);
            }
        })
    }

    /// Serve plain HTTP on `listener` until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        updates: mpsc::UnboundedReceiver<GatewayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            provider = %self.state.resolver.provider_id(),
            "Gateway listening"
        );

        let reloads = self.spawn_reloads(updates);
        let app = self.router().into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        reloads.abort();
        tracing::info!("Gateway stopped");
        Ok(())
    }

    /// Serve HTTPS on `addr` until `shutdown` fires.
    pub async fn run_tls(
        self,
        addr: SocketAddr,
        tls: RustlsConfig,
        updates: mpsc::UnboundedReceiver<GatewayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), io::Error> {
        tracing::info!(
            address = %addr,
            provider = %self.state.resolver.provider_id(),
            "Gateway listening (TLS)"
        );

        let handle = axum_server::Handle::new();
        let drain = handle.clone();
        tokio::spawn(async move {
            let _ = shutdown.recv().await;
            drain.graceful_shutdown(Some(TLS_DRAIN_TIMEOUT));
        });

        let reloads = self.spawn_reloads(updates);
        let app = self.router().into_make_service_with_connect_info::<SocketAddr>();
        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(app)
            .await?;

        reloads.abort();
        tracing::info!("Gateway stopped");
        Ok(())
    }
}

/// Backpressure: requests past the limit wait for a slot.
async fn limit_concurrency(
    State(permits): State<Arc<Semaphore>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Ok(_permit) = permits.acquire_owned().await else {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };
    next.run(request).await
}

async fn track_requests(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let response = next.run(request).await;
    metrics::record_request(&method, response.status().as_u16(), start);
    response
}

fn active_snapshot(state: &AppState) -> Result<Arc<ConfigSnapshot>, GatewayError> {
    state
        .resolver
        .current()
        .ok_or_else(|| GatewayError::NotFound(state.resolver.provider_id().to_string()))
}

/// Build the authorization redirect for a request without a usable session.
fn login_redirect(
    state: &AppState,
    snapshot: &ConfigSnapshot,
    headers: &HeaderMap,
    return_to: &str,
    clear_session: bool,
) -> Result<LoginRedirect, GatewayError> {
    let provider = &snapshot.provider;
    let host = headers.get(header::HOST).and_then(|v| v.to_str().ok());
    let redirect_uri = provider.redirect_uri_for_host(host);

    let (login, state_cookie) =
        state
            .sessions
            .begin_login(return_to, redirect_uri, provider.cookie_secret(), now_secs())?;
    let location = state
        .oauth2
        .authorization_url(provider, redirect_uri, &login.state);

    let mut cookies = vec![state_cookie];
    if clear_session {
        cookies.push(state.sessions.clear_session_cookie());
    }
    metrics::record_auth_decision("redirect");
    Ok(LoginRedirect {
        location: location.to_string(),
        cookies,
    })
}

/// Gate every request that is not a gateway endpoint.
async fn gateway_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    match gate(&state, request).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn gate(state: &AppState, request: Request<Body>) -> Result<Response, GatewayError> {
    let snapshot = active_snapshot(state)?;
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    if snapshot.exemptions.is_exempt(request.uri().path()) {
        metrics::record_auth_decision("exempt");
        tracing::debug!(path = %request.uri().path(), "Path exempt from authentication");
        let ctx = ForwardContext {
            client,
            session: None,
        };
        return Ok(state.forwarder.forward(&snapshot, request, ctx).await?);
    }

    let verdict = state.sessions.evaluate(
        request.headers(),
        snapshot.provider.cookie_secret(),
        now_secs(),
    );
    let return_to = request
        .uri()
        .path_and_query()
        .map_or("/", |pq| pq.as_str())
        .to_string();

    let session = match verdict {
        Ok(SessionState::Authenticated(session)) => session,
        Ok(SessionState::Expired) => {
            tracing::debug!("Session expired");
            let login = login_redirect(state, &snapshot, request.headers(), &return_to, true)?;
            return Err(GatewayError::AuthRequired(login));
        }
        Ok(SessionState::Unauthenticated | SessionState::PendingOAuth2) => {
            let login = login_redirect(state, &snapshot, request.headers(), &return_to, false)?;
            return Err(GatewayError::AuthRequired(login));
        }
        Err(_) => {
            tracing::debug!("Session cookie rejected");
            let login = login_redirect(state, &snapshot, request.headers(), &return_to, true)?;
            return Err(GatewayError::SignatureInvalid(login));
        }
    };

    let ctx = ForwardContext {
        client,
        session: Some(session),
    };
    match state.forwarder.forward(&snapshot, request, ctx).await {
        Ok(response) => {
            metrics::record_auth_decision("authenticated");
            Ok(response)
        }
        Err(e @ ForwardError::MissingAttribute(_)) => {
            metrics::record_auth_decision("forbidden");
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// Finish the OAuth2 login: check state, exchange the code, mint a session.
async fn callback_handler(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
    headers: HeaderMap,
) -> Result<Response, GatewayError> {
    let snapshot = active_snapshot(&state)?;
    let provider = &snapshot.provider;
    let secret = provider.cookie_secret();

    if let Some(error) = params.error {
        return Err(GatewayError::BadCallback(format!(
            "identity provider returned `{error}`"
        )));
    }
    let (Some(code), Some(state_param)) = (params.code, params.state) else {
        return Err(GatewayError::BadCallback(
            "missing code or state".to_string(),
        ));
    };

    let now = now_secs();
    let login = state
        .sessions
        .finish_login(&headers, &state_param, secret, now)?;
    let identity = state
        .oauth2
        .exchange_code(provider, &code, &login.redirect_uri)
        .await?;
    let (session, session_cookie) = state
        .sessions
        .mint(&identity, &provider.session_attributes(), secret, now)?;

    metrics::record_auth_decision("login");
    tracing::info!(
        provider = %snapshot.provider_id,
        sub = %session.sub,
        expires_at = session.exp,
        "Login completed"
    );
    Ok(redirect(
        &login.return_to,
        &[session_cookie, state.sessions.clear_login_cookie()],
    ))
}

/// Drop the session and send the browser home.
async fn sign_out_handler(State(state): State<AppState>) -> Response {
    tracing::debug!("Session cleared");
    redirect(
        "/",
        &[
            state.sessions.clear_session_cookie(),
            state.sessions.clear_login_cookie(),
        ],
    )
}
