//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, histograms)
//!
//! Per request, tower-http adds:
//!     → x-request-id (UUID v4, propagated to the upstream and the response)
//!     → TraceLayer span around the handler
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Secrets and session contents are never logged
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
