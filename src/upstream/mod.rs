//! Upstream subsystem.
//!
//! # Data Flow
//! ```text
//! Gated or exempted request
//!     → basic_auth.rs (credentials from session attributes, if enabled)
//!     → forwarder.rs (rewrite, send, retry, relay)
//!     → upstream application at internal_host
//! ```

pub mod basic_auth;
pub mod forwarder;

pub use basic_auth::basic_auth_header;
pub use forwarder::{upstream_url, ForwardContext, ForwardError, Forwarder, ForwarderSettings};
