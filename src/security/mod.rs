//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Request leaving for the upstream:
//!     → headers.rs (strip hop-by-hop and gateway cookies, add X-Forwarded-*)
//! ```
//!
//! # Design Decisions
//! - Session material never reaches the upstream
//! - No trust in client-supplied forwarding headers except the IP chain

pub mod headers;
