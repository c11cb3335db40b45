//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → plain: tokio TcpListener served by axum
//!     → TLS: tls.rs loads the listener certificate, axum-server terminates
//!     → Hand off to HTTP layer
//! ```
//!
//! # Design Decisions
//! - TLS is optional and handled transparently
//! - Upstream TLS (client side) lives with the forwarder, not here

pub mod tls;
