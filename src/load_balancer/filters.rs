//! Request-scoped node filters.
//!
//! Filters run in order over the candidate set before the balancer picks.
//! Exclusion and preference filters fail open: when they would leave no
//! candidate they pass the set through unchanged.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::load_balancer::node::Node;

pub type NodeFilter = Arc<dyn Fn(Vec<Arc<Node>>) -> Vec<Arc<Node>> + Send + Sync>;

/// Drop nodes whose address is in `used`, unless that drops every node.
pub fn exclude_addresses(used: HashSet<String>) -> NodeFilter {
    Arc::new(move |nodes: Vec<Arc<Node>>| {
        let remaining: Vec<Arc<Node>> = nodes
            .iter()
            .filter(|node| !used.contains(&node.address))
            .cloned()
            .collect();
        if remaining.is_empty() {
            nodes
        } else {
            remaining
        }
    })
}

/// Keep nodes whose `key` label equals `value`, if any do.
pub fn prefer_label(key: String, value: String) -> NodeFilter {
    Arc::new(move |nodes: Vec<Arc<Node>>| {
        let preferred: Vec<Arc<Node>> = nodes
            .iter()
            .filter(|node| node.metadata.get(&key) == Some(&value))
            .cloned()
            .collect();
        if preferred.is_empty() {
            nodes
        } else {
            preferred
        }
    })
}

/// Keep only nodes carrying every label in `labels`.
pub fn require_labels(labels: HashMap<String, String>) -> NodeFilter {
    Arc::new(move |nodes: Vec<Arc<Node>>| {
        nodes
            .into_iter()
            .filter(|node| labels.iter().all(|(k, v)| node.metadata.get(k) == Some(v)))
            .collect()
    })
}
