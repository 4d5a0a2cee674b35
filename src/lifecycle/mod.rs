//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Signal received → broadcast → server drains, watcher and
//!     health monitor loops exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!     SIGHUP → Immediate config re-check
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
