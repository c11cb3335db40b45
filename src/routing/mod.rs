//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (path)
//!     → matcher.rs (evaluate exemption patterns)
//!     → exempt: forward without authentication
//!     → otherwise: session check
//!
//! Pattern Compilation (per provider version):
//!     skip_path_regex[]
//!     → Compile each pattern
//!     → Freeze inside the ConfigSnapshot
//! ```
//!
//! # Design Decisions
//! - Patterns compiled at load, immutable at runtime
//! - Deterministic: same path always gives the same verdict
//! - Matches the path only; query strings never exempt a request

pub mod matcher;

pub use matcher::{is_exempt, ExemptionSet, PatternError};
