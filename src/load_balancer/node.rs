//! Selectable node abstraction.
//!
//! # Responsibilities
//! - Represent one resolved backend instance
//! - Track in-flight requests (load signal for P2C)
//! - Track health state (Healthy/Unhealthy) for health-checked nodes

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::Protocol;

/// Weight given to nodes with neither a configured nor a discovered weight.
pub const DEFAULT_WEIGHT: u32 = 100;

/// Health State enum.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthState::Healthy,
            2 => HealthState::Unhealthy,
            _ => HealthState::Unknown,
        }
    }
}

/// A single selectable backend instance.
#[derive(Debug)]
pub struct Node {
    /// `host:port`, unique within one directory generation.
    pub address: String,
    pub protocol: Protocol,
    pub weight: u32,
    pub version: String,
    /// Instance labels, used by selection filters.
    pub metadata: HashMap<String, String>,
    /// Whether active health checks probe this node.
    pub health_checked: bool,

    /// Requests currently being forwarded to this node.
    pub in_flight: AtomicUsize,

    /// Current health state (0=Unknown, 1=Healthy, 2=Unhealthy).
    pub state: AtomicU8,
    /// Consecutive failure count.
    pub consecutive_failures: AtomicUsize,
    /// Consecutive success count.
    pub consecutive_successes: AtomicUsize,
}

impl Node {
    pub fn new(address: impl Into<String>, protocol: Protocol, weight: u32) -> Self {
        Self {
            address: address.into(),
            protocol,
            weight: weight.max(1),
            version: String::new(),
            metadata: HashMap::new(),
            health_checked: false,
            in_flight: AtomicUsize::new(0),
            state: AtomicU8::new(HealthState::Unknown as u8),
            consecutive_failures: AtomicUsize::new(0),
            consecutive_successes: AtomicUsize::new(0),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_health_check(mut self, enabled: bool) -> Self {
        self.health_checked = enabled;
        self
    }

    /// Current number of in-flight requests.
    pub fn load(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Count a request against this node until the guard drops.
    pub fn track(self: &Arc<Self>) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard { node: self.clone() }
    }

    // --- Health Logic ---

    pub fn health(&self) -> HealthState {
        HealthState::from(self.state.load(Ordering::Relaxed))
    }

    /// Return true if node is considered healthy (Healthy or Unknown).
    pub fn is_healthy(&self) -> bool {
        self.health() != HealthState::Unhealthy
    }

    /// Report a successful request/check.
    pub fn mark_success(&self, healthy_threshold: usize) {
        self.consecutive_failures.store(0, Ordering::Relaxed);

        if self.health() == HealthState::Healthy {
            return;
        }

        let successes = self.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;
        if successes >= healthy_threshold {
            self.state.store(HealthState::Healthy as u8, Ordering::Relaxed);
            self.consecutive_successes.store(0, Ordering::Relaxed);
            tracing::info!(node = %self.address, "Node marked healthy");
        }
    }

    /// Report a failed request/check.
    pub fn mark_failure(&self, unhealthy_threshold: usize) {
        self.consecutive_successes.store(0, Ordering::Relaxed);

        if self.health() == HealthState::Unhealthy {
            return;
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= unhealthy_threshold {
            self.state.store(HealthState::Unhealthy as u8, Ordering::Relaxed);
            self.consecutive_failures.store(0, Ordering::Relaxed);
            tracing::warn!(node = %self.address, failures, "Node marked unhealthy");
        }
    }
}

/// A RAII guard that manages the in-flight count.
#[derive(Debug)]
pub struct InFlightGuard {
    node: Arc<Node>,
}

impl Deref for InFlightGuard {
    type Target = Node;
    fn deref(&self) -> &Self::Target {
        &self.node
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.node.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
