//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use url::Url;

use pbprox::auth::{now_secs, Identity, OAuth2Client, OAuth2Error, SessionValidator};
use pbprox::config::{GatewayConfig, SessionConfig};
use pbprox::provider::{validate_provider, ProxyProvider, ProxyProviderRecord, SkipPaths};
use pbprox::{GatewayServer, Shutdown};

pub const PROVIDER_ID: &str = "app";
pub const COOKIE_SECRET: &str = "0123456789ABCDEFGHIJKLMNOPQRSTUV";
pub const AUTHORIZE_URL: &str = "https://id.example.com/authorize";
pub const GOOD_CODE: &str = "good-code";

/// Hit counter shared with a mock backend.
pub type Hits = Arc<AtomicUsize>;

pub fn hits(counter: &Hits) -> usize {
    counter.load(Ordering::SeqCst)
}

async fn read_head(socket: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
    String::from_utf8_lossy(&head).into_owned()
}

async fn respond(socket: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

/// Start a backend that answers 200 with the request head it received.
pub async fn start_echo_backend() -> (SocketAddr, Hits) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let counter: Hits = Arc::new(AtomicUsize::new(0));
    let seen = counter.clone();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            seen.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let head = read_head(&mut socket).await;
                respond(&mut socket, "200 OK", &head).await;
            });
        }
    });
    (addr, counter)
}

/// Start a backend that closes the first `failures` connections without
/// answering, then behaves like the echo backend.
pub async fn start_flaky_backend(failures: usize) -> (SocketAddr, Hits) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let counter: Hits = Arc::new(AtomicUsize::new(0));
    let seen = counter.clone();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let n = seen.fetch_add(1, Ordering::SeqCst);
            if n < failures {
                drop(socket);
                continue;
            }
            tokio::spawn(async move {
                let head = read_head(&mut socket).await;
                respond(&mut socket, "200 OK", &head).await;
            });
        }
    });
    (addr, counter)
}

/// An address nothing listens on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// OAuth2 collaborator that accepts exactly [`GOOD_CODE`].
pub struct FakeOAuth2 {
    authorize: Url,
    pub attributes: BTreeMap<String, String>,
}

impl FakeOAuth2 {
    pub fn new(attributes: &[(&str, &str)]) -> Self {
        Self {
            authorize: Url::parse(AUTHORIZE_URL).unwrap(),
            attributes: attributes
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

#[async_trait]
impl OAuth2Client for FakeOAuth2 {
    fn authorize_endpoint(&self) -> &Url {
        &self.authorize
    }

    async fn exchange_code(
        &self,
        _provider: &ProxyProvider,
        code: &str,
        _redirect_uri: &str,
    ) -> Result<Identity, OAuth2Error> {
        if code != GOOD_CODE {
            return Err(OAuth2Error::InvalidToken("unknown code".to_string()));
        }
        Ok(Identity {
            sub: "alice".to_string(),
            expires_at: None,
            attributes: self.attributes.clone(),
        })
    }
}

pub fn provider_record(upstream: SocketAddr) -> ProxyProviderRecord {
    ProxyProviderRecord {
        id: PROVIDER_ID.to_string(),
        name: "Test App".to_string(),
        internal_host: format!("http://{upstream}"),
        external_host: "https://app.example.com".to_string(),
        skip_path_regex: SkipPaths::Lines("^/health$".to_string()),
        cookie_secret: COOKIE_SECRET.to_string(),
        client_id: "client-1".to_string(),
        client_secret: "s3cret".to_string(),
        ..Default::default()
    }
}

pub fn gateway_config(record: ProxyProviderRecord) -> GatewayConfig {
    let mut config = GatewayConfig {
        provider_id: record.id.clone(),
        providers: vec![record],
        session: SessionConfig {
            secure: false,
            ..Default::default()
        },
        ..Default::default()
    };
    config.timeouts.connect_secs = 1;
    config.timeouts.request_secs = 5;
    config
}

pub struct TestGateway {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub updates: mpsc::UnboundedSender<GatewayConfig>,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }
}

/// Start a gateway for `config` on an ephemeral port.
pub async fn spawn_gateway(config: GatewayConfig, oauth2: FakeOAuth2) -> TestGateway {
    let server = GatewayServer::new(config, Arc::new(oauth2)).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let (updates, rx) = mpsc::unbounded_channel();

    let signal = shutdown.subscribe();
    tokio::spawn(async move {
        server.run(listener, rx, signal).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    TestGateway {
        addr,
        shutdown,
        updates,
    }
}

/// HTTP client that leaves redirects to the test.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy()
        .build()
        .unwrap()
}

/// `name=value` pair of a session cookie for `attributes`, valid until
/// `expires_at` (or the configured maximum).
pub fn session_cookie(
    config: &GatewayConfig,
    attributes: &[(&str, &str)],
    expires_at: Option<u64>,
) -> String {
    let provider = validate_provider(&config.providers[0]).unwrap();
    let identity = Identity {
        sub: "alice".to_string(),
        expires_at,
        attributes: attributes
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    };
    let (_, set_cookie) = SessionValidator::new(config.session.clone())
        .mint(
            &identity,
            &provider.session_attributes(),
            provider.cookie_secret(),
            now_secs(),
        )
        .unwrap();
    cookie_pair(&set_cookie)
}

/// The `name=value` part of a `Set-Cookie` value.
pub fn cookie_pair(set_cookie: &str) -> String {
    set_cookie.split(';').next().unwrap_or_default().trim().to_string()
}

/// `Set-Cookie` values of `response` for cookie `name`.
pub fn set_cookies(response: &reqwest::Response, name: &str) -> Vec<String> {
    let prefix = format!("{name}=");
    response
        .headers()
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter(|v| v.starts_with(&prefix))
        .map(str::to_string)
        .collect()
}
