//! Session validation.
//!
//! # Responsibilities
//! - Classify an inbound request by its session cookie
//! - Mint session cookies after a successful code exchange
//! - Bind the OAuth2 round trip to the browser with a login-state cookie
//!
//! # State Machine
//! ```text
//! no cookie ─────────────→ Unauthenticated ──┐
//! login-state cookie only → PendingOAuth2 ───┤→ redirect to authorize endpoint
//! session past exp ──────→ Expired ──────────┘
//! valid session ─────────→ Authenticated → forward
//! bad signature ─────────→ SignatureInvalid (handled like Unauthenticated)
//! ```
//!
//! # Design Decisions
//! - Cookies are stateless: nothing is stored server side
//! - Signature failures carry no detail past this module
//! - `return_to` only ever holds a local path

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use super::cookie::{build_set_cookie, cookie_value, decode_signed, encode_signed, expire_cookie};
use super::oauth2::Identity;
use crate::config::SessionConfig;
use crate::provider::{random_token, CookieSecret, CALLBACK_PATH};

const STATE_LEN: usize = 32;

/// Browsers drop cookies whose name and value exceed this many bytes.
pub const MAX_COOKIE_LEN: usize = 4096;

/// Seconds since the Unix epoch.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// An authenticated user session, as carried in the session cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub sid: String,
    pub sub: String,
    pub iat: u64,
    pub exp: u64,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Session {
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.exp
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// Pending login, carried in the login-state cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginState {
    pub state: String,
    pub return_to: String,
    /// Redirect URI sent to the authorization endpoint; the token request
    /// must repeat it.
    pub redirect_uri: String,
    pub exp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    PendingOAuth2,
    Authenticated(Session),
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session cookie signature invalid")]
    SignatureInvalid,

    #[error("login callback rejected: {0}")]
    BadCallback(&'static str),

    #[error("failed to encode cookie: {0}")]
    Encode(String),

    #[error("session cookie would be {0} bytes, over the browser limit")]
    CookieTooLarge(usize),
}

/// Keep `return_to` only if it is a local absolute path.
pub fn sanitize_return_to(return_to: &str) -> String {
    let local = return_to.starts_with('/')
        && !return_to.starts_with("//")
        && !return_to.starts_with("/\\")
        && !return_to.starts_with(CALLBACK_PATH);
    if local {
        return_to.to_string()
    } else {
        "/".to_string()
    }
}

/// Session cookie handling for one gateway.
#[derive(Debug, Clone)]
pub struct SessionValidator {
    settings: SessionConfig,
}

impl SessionValidator {
    pub fn new(settings: SessionConfig) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SessionConfig {
        &self.settings
    }

    /// Classify the request by its cookies.
    pub fn evaluate(
        &self,
        headers: &HeaderMap,
        secret: &CookieSecret,
        now: u64,
    ) -> Result<SessionState, SessionError> {
        let Some(value) = cookie_value(headers, &self.settings.cookie_name) else {
            let pending = cookie_value(headers, &self.settings.state_cookie_name).is_some();
            return Ok(if pending {
                SessionState::PendingOAuth2
            } else {
                SessionState::Unauthenticated
            });
        };

        let session: Session = decode_signed(&value, secret.as_bytes())
            .map_err(|_| SessionError::SignatureInvalid)?;

        if session.is_expired(now) {
            Ok(SessionState::Expired)
        } else {
            Ok(SessionState::Authenticated(session))
        }
    }

    /// Create a session for `identity` and the `Set-Cookie` value carrying it.
    ///
    /// The session ends at the ID token expiry or after `max_age_secs`,
    /// whichever comes first. Only the attributes named in `keep` are
    /// carried over from the identity.
    pub fn mint(
        &self,
        identity: &Identity,
        keep: &[&str],
        secret: &CookieSecret,
        now: u64,
    ) -> Result<(Session, String), SessionError> {
        let cap = now.saturating_add(self.settings.max_age_secs);
        let exp = identity.expires_at.map_or(cap, |exp| exp.min(cap));

        let session = Session {
            sid: Uuid::new_v4().to_string(),
            sub: identity.sub.clone(),
            iat: now,
            exp,
            attributes: identity
                .attributes
                .iter()
                .filter(|(name, _)| keep.contains(&name.as_str()))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        };
        let value = encode_signed(&session, secret.as_bytes())
            .map_err(|e| SessionError::Encode(e.to_string()))?;
        let size = self.settings.cookie_name.len() + 1 + value.len();
        if size > MAX_COOKIE_LEN {
            return Err(SessionError::CookieTooLarge(size));
        }
        let cookie = build_set_cookie(
            &self.settings.cookie_name,
            &value,
            exp.saturating_sub(now),
            self.settings.secure,
        );
        Ok((session, cookie))
    }

    /// Start a login round trip.
    pub fn begin_login(
        &self,
        return_to: &str,
        redirect_uri: &Url,
        secret: &CookieSecret,
        now: u64,
    ) -> Result<(LoginState, String), SessionError> {
        let login = LoginState {
            state: random_token(STATE_LEN),
            return_to: sanitize_return_to(return_to),
            redirect_uri: redirect_uri.to_string(),
            exp: now.saturating_add(self.settings.login_timeout_secs),
        };
        let value = encode_signed(&login, secret.as_bytes())
            .map_err(|e| SessionError::Encode(e.to_string()))?;
        let cookie = build_set_cookie(
            &self.settings.state_cookie_name,
            &value,
            self.settings.login_timeout_secs,
            self.settings.secure,
        );
        Ok((login, cookie))
    }

    /// Check a callback's `state` against the login-state cookie.
    pub fn finish_login(
        &self,
        headers: &HeaderMap,
        state: &str,
        secret: &CookieSecret,
        now: u64,
    ) -> Result<LoginState, SessionError> {
        let value = cookie_value(headers, &self.settings.state_cookie_name)
            .ok_or(SessionError::BadCallback("missing login state"))?;
        let login: LoginState = decode_signed(&value, secret.as_bytes())
            .map_err(|_| SessionError::BadCallback("login state invalid"))?;

        if !bool::from(login.state.as_bytes().ct_eq(state.as_bytes())) {
            return Err(SessionError::BadCallback("state mismatch"));
        }
        if now >= login.exp {
            return Err(SessionError::BadCallback("login expired"));
        }
        Ok(login)
    }

    pub fn clear_session_cookie(&self) -> String {
        expire_cookie(&self.settings.cookie_name, self.settings.secure)
    }

    pub fn clear_login_cookie(&self) -> String {
        expire_cookie(&self.settings.state_cookie_name, self.settings.secure)
    }
}
