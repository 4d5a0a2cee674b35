//! Smooth weighted round-robin load balancing strategy.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::load_balancer::{node::Node, LoadBalancer};

/// Weighted round-robin selector.
///
/// Each pick adds every candidate's weight to its running score, chooses
/// the highest score and subtracts the total weight from the winner. Over
/// any window of `sum(weights)` picks each node is chosen exactly `weight`
/// times, interleaved rather than in bursts.
#[derive(Debug, Default)]
pub struct WeightedRoundRobin {
    /// Running score per node address.
    current: Mutex<HashMap<String, i64>>,
}

impl WeightedRoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for WeightedRoundRobin {
    fn next_node(&self, nodes: &[Arc<Node>]) -> Option<Arc<Node>> {
        match nodes {
            [] => return None,
            [only] => return Some(only.clone()),
            _ => {}
        }

        let mut current = self.current.lock();
        // Forget nodes from older generations.
        if current.len() > nodes.len() * 2 {
            current.retain(|address, _| nodes.iter().any(|n| &n.address == address));
        }

        let mut total: i64 = 0;
        let mut best: Option<(&Arc<Node>, i64)> = None;
        for node in nodes {
            let weight = i64::from(node.weight);
            total += weight;
            let score = current.entry(node.address.clone()).or_insert(0);
            *score += weight;
            if best.map_or(true, |(_, top)| *score > top) {
                best = Some((node, *score));
            }
        }

        let (chosen, _) = best?;
        if let Some(score) = current.get_mut(&chosen.address) {
            *score -= total;
        }
        Some(chosen.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Protocol;

    fn node(addr: &str, weight: u32) -> Arc<Node> {
        Arc::new(Node::new(addr, Protocol::Http, weight))
    }

    #[test]
    fn test_round_robin_equal_weights() {
        let lb = WeightedRoundRobin::new();
        let nodes = vec![node("127.0.0.1:8080", 1), node("127.0.0.1:8081", 1)];

        let s1 = lb.next_node(&nodes).unwrap();
        let s2 = lb.next_node(&nodes).unwrap();
        let s3 = lb.next_node(&nodes).unwrap();
        assert_ne!(s1.address, s2.address);
        assert_eq!(s1.address, s3.address);
    }

    #[test]
    fn test_weighted_distribution_is_exact() {
        let lb = WeightedRoundRobin::new();
        let nodes = vec![node("a:1", 1), node("b:1", 3)];

        let mut hits = HashMap::new();
        for _ in 0..400 {
            let picked = lb.next_node(&nodes).unwrap();
            *hits.entry(picked.address.clone()).or_insert(0) += 1;
        }
        assert_eq!(hits["a:1"], 100);
        assert_eq!(hits["b:1"], 300);
    }

    #[test]
    fn test_smooth_interleaving() {
        let lb = WeightedRoundRobin::new();
        let nodes = vec![node("a:1", 5), node("b:1", 1), node("c:1", 1)];

        let picks: Vec<String> = (0..7).map(|_| lb.next_node(&nodes).unwrap().address.clone()).collect();
        assert_eq!(picks, ["a:1", "a:1", "b:1", "a:1", "c:1", "a:1", "a:1"]);
    }

    #[test]
    fn test_empty_returns_none() {
        assert!(WeightedRoundRobin::new().next_node(&[]).is_none());
    }
}
