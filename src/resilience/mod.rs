//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Upstream attempt fails:
//!     → retries.rs (retryable? attempts left?)
//!     → backoff.rs (exponential delay with jitter, capped)
//!     → next attempt, or UpstreamUnavailable
//! ```
//!
//! # Design Decisions
//! - Every upstream call has a connect and a request deadline
//! - Retries only where repeating cannot duplicate side effects
//! - Backoff is bounded so a retry never dominates request latency

pub mod backoff;
pub mod retries;
