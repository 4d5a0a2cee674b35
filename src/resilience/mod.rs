//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to endpoint:
//!     → retries.rs (attempt loop, per-try deadline, node exclusion)
//!     → inner transport (node selection + forward)
//!     → conditions.rs (does the response call for another attempt?)
//! ```
//!
//! # Design Decisions
//! - Conditions are compiled at build time; a malformed one fails the build
//! - Every attempt is bounded by the request's total budget
//! - Retries are sequential within one request task

pub mod conditions;
pub mod retries;

pub use conditions::{CompiledCondition, ConditionError};
pub use retries::{RetryCoordinator, RetryPolicy};
