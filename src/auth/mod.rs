//! Authentication subsystem.
//!
//! # Data Flow
//! ```text
//! Gated request
//!     → session.rs (classify cookies: Authenticated / Expired / ...)
//!     → cookie.rs (HMAC-SHA256 verification, constant time)
//!     → not authenticated: oauth2.rs builds the authorization redirect
//!
//! /pbprox/callback
//!     → session.rs (login-state cookie must match `state`)
//!     → oauth2.rs (code exchange, ID token verification)
//!     → session.rs (mint session cookie) → redirect to return_to
//! ```

pub mod cookie;
pub mod oauth2;
pub mod session;

pub use cookie::CookieError;
pub use oauth2::{Identity, OAuth2Client, OAuth2Error, OidcClient};
pub use session::{
    now_secs, LoginState, Session, SessionError, SessionState, SessionValidator,
};
