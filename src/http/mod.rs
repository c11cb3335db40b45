//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, middleware, request gating)
//!         /pbprox/callback → login completion
//!         /pbprox/sign_out → session cleared
//!         everything else  → exemption → session → upstream
//!     → error.rs (GatewayError → status, redirect, generic body)
//!     → Send to client
//! ```

pub mod error;
pub mod server;

pub use error::{GatewayError, LoginRedirect};
pub use server::{AppState, GatewayServer, StartupError};
