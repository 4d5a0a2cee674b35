//! Power-of-two-choices load balancing strategy.

use std::sync::Arc;

use rand::Rng;

use crate::load_balancer::{node::Node, LoadBalancer};

/// P2C selector.
/// Samples two distinct nodes at random and keeps the one with the lower
/// in-flight count relative to its weight.
#[derive(Debug, Default)]
pub struct PowerOfTwoChoices;

impl PowerOfTwoChoices {
    pub fn new() -> Self {
        Self
    }
}

/// True if `a` is less loaded than `b`, per unit of weight.
fn lighter(a: &Node, b: &Node) -> bool {
    // (a.load + 1) / a.weight < (b.load + 1) / b.weight, without division.
    let a_cost = (a.load() as u128 + 1) * u128::from(b.weight);
    let b_cost = (b.load() as u128 + 1) * u128::from(a.weight);
    a_cost <= b_cost
}

impl LoadBalancer for PowerOfTwoChoices {
    fn next_node(&self, nodes: &[Arc<Node>]) -> Option<Arc<Node>> {
        match nodes {
            [] => None,
            [only] => Some(only.clone()),
            _ => {
                let mut rng = rand::thread_rng();
                let first = rng.gen_range(0..nodes.len());
                let mut second = rng.gen_range(0..nodes.len() - 1);
                if second >= first {
                    second += 1;
                }

                let (a, b) = (&nodes[first], &nodes[second]);
                Some(if lighter(a, b) { a.clone() } else { b.clone() })
            }
        }
    }
}
