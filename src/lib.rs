//! pbprox: authenticating reverse proxy for a single proxy provider.

// Core subsystems
pub mod auth;
pub mod config;
pub mod http;
pub mod net;
pub mod provider;
pub mod routing;
pub mod upstream;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

pub use config::schema::GatewayConfig;
pub use http::GatewayServer;
pub use lifecycle::Shutdown;
