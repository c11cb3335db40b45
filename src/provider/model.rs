//! Proxy provider records and the validated provider value.
//!
//! A [`ProxyProviderRecord`] is what the config store holds: loose strings,
//! exactly as an operator wrote them. [`ProxyProvider`] is only obtainable
//! through [`validate_provider`](super::validate_provider) and carries the
//! OAuth2 defaults derived from the hosts.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use super::secret::CookieSecret;

/// Path the identity provider redirects back to after login.
pub const CALLBACK_PATH: &str = "/pbprox/callback";

/// Path that clears the gateway session.
pub const SIGN_OUT_PATH: &str = "/pbprox/sign_out";

pub const SCOPE_OPENID: &str = "openid";
pub const SCOPE_OPENID_PROFILE: &str = "profile";
pub const SCOPE_OPENID_EMAIL: &str = "email";
pub const SCOPE_PB_PROXY: &str = "pb_proxy";

/// Attribute used for the Basic-Auth username or password when none is
/// configured.
pub const DEFAULT_USER_ATTRIBUTE: &str = "email";

fn default_true() -> bool {
    true
}

/// Skip-path patterns as stored: either a list, or one pattern per line.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SkipPaths {
    List(Vec<String>),
    Lines(String),
}

impl Default for SkipPaths {
    fn default() -> Self {
        SkipPaths::List(Vec::new())
    }
}

impl SkipPaths {
    /// Patterns in declaration order. Blank lines are ignored.
    pub fn patterns(&self) -> Vec<String> {
        match self {
            SkipPaths::List(list) => list.clone(),
            SkipPaths::Lines(text) => text
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }
}

/// A proxy provider as held by the config store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProxyProviderRecord {
    /// Store key.
    pub id: String,

    #[serde(default)]
    pub name: String,

    /// Upstream application URL.
    pub internal_host: String,

    /// Public URL users reach the application on.
    pub external_host: String,

    /// Validate TLS certificates of the upstream.
    #[serde(default = "default_true")]
    pub internal_host_ssl_validation: bool,

    /// Paths that bypass authentication.
    #[serde(default)]
    pub skip_path_regex: SkipPaths,

    /// Inject an HTTP Basic `Authorization` header into upstream requests.
    #[serde(default)]
    pub basic_auth_enabled: bool,

    /// Session attribute for the Basic-Auth username. Empty means `email`.
    #[serde(default)]
    pub basic_auth_user_attribute: String,

    /// Session attribute for the Basic-Auth password. Empty means `email`.
    #[serde(default)]
    pub basic_auth_password_attribute: String,

    /// Optional certificate id; resolved through the certificate store.
    #[serde(default)]
    pub certificate: Option<String>,

    /// Session signing secret. Generated by the store when empty.
    #[serde(default)]
    pub cookie_secret: String,

    #[serde(default)]
    pub client_id: String,

    #[serde(default)]
    pub client_secret: String,
}

impl Default for ProxyProviderRecord {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            internal_host: String::new(),
            external_host: String::new(),
            internal_host_ssl_validation: true,
            skip_path_regex: SkipPaths::default(),
            basic_auth_enabled: false,
            basic_auth_user_attribute: String::new(),
            basic_auth_password_attribute: String::new(),
            certificate: None,
            cookie_secret: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    Confidential,
    Public,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseType {
    #[serde(rename = "code")]
    Code,
    #[serde(rename = "id_token")]
    IdToken,
    #[serde(rename = "id_token token")]
    IdTokenToken,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Code => "code",
            ResponseType::IdToken => "id_token",
            ResponseType::IdTokenToken => "id_token token",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JwtAlgorithm {
    HS256,
    RS256,
}

/// OAuth2 client settings a proxy provider always uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OAuth2Defaults {
    pub client_type: ClientType,
    pub response_type: ResponseType,
    pub jwt_alg: JwtAlgorithm,
    pub scopes: Vec<String>,
    pub redirect_uris: Vec<Url>,
}

/// Join the callback path onto a host URL. The absolute path replaces any
/// path, query or fragment the host carries.
pub fn callback_url(host: &Url) -> Url {
    let mut url = host.clone();
    url.set_path(CALLBACK_PATH);
    url.set_query(None);
    url.set_fragment(None);
    url
}

/// A validated proxy provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyProvider {
    pub(crate) name: String,
    pub(crate) internal_host: Url,
    pub(crate) external_host: Url,
    pub(crate) internal_host_ssl_validation: bool,
    pub(crate) skip_path_regex: Vec<String>,
    pub(crate) basic_auth_enabled: bool,
    pub(crate) basic_auth_user_attribute: String,
    pub(crate) basic_auth_password_attribute: String,
    pub(crate) certificate: Option<String>,
    pub(crate) cookie_secret: CookieSecret,
    pub(crate) client_id: String,
    pub(crate) client_secret: String,
    pub(crate) oauth: OAuth2Defaults,
}

impl ProxyProvider {
    /// Ensure all OAuth2-related settings are correct.
    pub(crate) fn set_oauth_defaults(&mut self) {
        self.oauth = OAuth2Defaults {
            client_type: ClientType::Confidential,
            response_type: ResponseType::Code,
            jwt_alg: JwtAlgorithm::RS256,
            scopes: [
                SCOPE_OPENID,
                SCOPE_OPENID_PROFILE,
                SCOPE_OPENID_EMAIL,
                SCOPE_PB_PROXY,
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            redirect_uris: vec![
                callback_url(&self.external_host),
                callback_url(&self.internal_host),
            ],
        };
    }

    /// Replace both hosts. Redirect URIs follow immediately.
    pub fn set_hosts(&mut self, internal_host: Url, external_host: Url) {
        self.internal_host = internal_host;
        self.external_host = external_host;
        self.set_oauth_defaults();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn internal_host(&self) -> &Url {
        &self.internal_host
    }

    pub fn external_host(&self) -> &Url {
        &self.external_host
    }

    pub fn internal_host_ssl_validation(&self) -> bool {
        self.internal_host_ssl_validation
    }

    pub fn skip_path_regex(&self) -> &[String] {
        &self.skip_path_regex
    }

    pub fn basic_auth_enabled(&self) -> bool {
        self.basic_auth_enabled
    }

    /// Username attribute, falling back to `email`.
    pub fn basic_auth_user_attribute(&self) -> &str {
        if self.basic_auth_user_attribute.is_empty() {
            DEFAULT_USER_ATTRIBUTE
        } else {
            &self.basic_auth_user_attribute
        }
    }

    /// Password attribute, falling back to `email` like the username.
    pub fn basic_auth_password_attribute(&self) -> &str {
        if self.basic_auth_password_attribute.is_empty() {
            DEFAULT_USER_ATTRIBUTE
        } else {
            &self.basic_auth_password_attribute
        }
    }

    /// Session attributes the gateway reads for this provider. Everything
    /// else from the identity provider is left out of the session cookie.
    pub fn session_attributes(&self) -> Vec<&str> {
        let mut names = vec![
            DEFAULT_USER_ATTRIBUTE,
            self.basic_auth_user_attribute(),
            self.basic_auth_password_attribute(),
        ];
        names.sort_unstable();
        names.dedup();
        names
    }

    pub fn certificate(&self) -> Option<&str> {
        self.certificate.as_deref()
    }

    pub fn cookie_secret(&self) -> &CookieSecret {
        &self.cookie_secret
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    pub fn oauth(&self) -> &OAuth2Defaults {
        &self.oauth
    }

    pub fn redirect_uris(&self) -> &[Url] {
        &self.oauth.redirect_uris
    }

    /// The external host doubles as the launch URL.
    pub fn launch_url(&self) -> &Url {
        &self.external_host
    }

    /// Certificates this provider cannot run without.
    pub fn required_certificates(&self) -> Vec<&str> {
        self.certificate.iter().map(String::as_str).collect()
    }

    /// Pick the redirect URI for a request arriving with `host`.
    ///
    /// Requests reaching the gateway through the internal hostname get the
    /// internal callback, everything else the external one.
    pub fn redirect_uri_for_host(&self, host: Option<&str>) -> &Url {
        let internal = &self.oauth.redirect_uris[1];
        match host {
            Some(host) if host_matches(&self.internal_host, host) => internal,
            _ => &self.oauth.redirect_uris[0],
        }
    }
}

fn host_matches(url: &Url, host_header: &str) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    let (name, port) = match host_header.rsplit_once(':') {
        Some((name, port)) if !port.contains(']') => (name, port.parse::<u16>().ok()),
        _ => (host_header, None),
    };
    let port_matches = match port {
        Some(port) => Some(port) == url.port_or_known_default(),
        None => url.port().is_none(),
    };
    name.eq_ignore_ascii_case(host) && port_matches
}

impl fmt::Display for ProxyProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Proxy Provider {}", self.name)
    }
}
