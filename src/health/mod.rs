//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Probe each opted-in node of the current generation
//!     → Node health state (load_balancer::node)
//!
//! Node state machine:
//!     Unknown → Healthy ←→ Unhealthy
//!     With thresholds to prevent flapping
//! ```
//!
//! # Design Decisions
//! - Health state is per-node and starts over with each discovery generation
//! - Selection skips unhealthy nodes but fails open when all are unhealthy

pub mod active;

pub use active::HealthMonitor;
