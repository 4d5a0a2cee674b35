//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Endpoint matched → its NodeDirectory
//!     → directory.rs (load the current node snapshot)
//!     → drop unhealthy nodes (unless that drops all of them)
//!     → filters.rs (request-scoped filters, in order)
//!     → Apply load balancing algorithm:
//!         - round_robin.rs (smooth weighted round robin)
//!         - p2c.rs (power of two choices over in-flight counts)
//!     → Return node or NoAvailableNode
//! ```
//!
//! # Design Decisions
//! - Node sets are copy-on-write snapshots; readers never lock
//! - Algorithm selection per endpoint
//! - Filters run before the algorithm so exclusions shape the weights

pub mod directory;
pub mod filters;
pub mod node;
pub mod p2c;
pub mod round_robin;

use std::sync::Arc;

use thiserror::Error;

use crate::config::Strategy;

pub use directory::NodeDirectory;
pub use filters::NodeFilter;
pub use node::Node;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SelectError {
    #[error("no available node")]
    NoAvailableNode,
}

/// Strategy choosing one node from a candidate set.
pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    fn next_node(&self, nodes: &[Arc<Node>]) -> Option<Arc<Node>>;
}

/// Build the balancer configured for an endpoint.
pub fn balancer_for(strategy: Strategy) -> Box<dyn LoadBalancer> {
    match strategy {
        Strategy::WeightedRoundRobin => Box::new(round_robin::WeightedRoundRobin::new()),
        Strategy::P2c => Box::new(p2c::PowerOfTwoChoices::new()),
    }
}
