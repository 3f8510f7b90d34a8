use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::seq::SliceRandom;

use crate::api::client::config::{BalancePolicy, Host};

/// Orders the coordinator list before each dial.
#[derive(Debug)]
pub(super) struct Balancer {
    policy: BalancePolicy,
    /// Starts at 1 so the first dial does not always hit the first node.
    next: AtomicUsize,
    /// Hosts of the connection string, the priority policy prefers the
    /// first of them.
    configured: Vec<Host>,
}

impl Balancer {
    pub(super) fn new(policy: BalancePolicy, configured: Vec<Host>) -> Balancer {
        Balancer {
            policy,
            next: AtomicUsize::new(1),
            configured,
        }
    }

    pub(super) fn policy(&self) -> BalancePolicy {
        self.policy
    }

    pub(super) fn balance(&self, nodes: &mut Vec<Host>) {
        match self.policy {
            BalancePolicy::None => {}
            BalancePolicy::RoundRobin | BalancePolicy::LeastConn => self.round_robin(nodes),
            BalancePolicy::Shuffle => nodes.shuffle(&mut rand::rng()),
            BalancePolicy::Priority(n) => self.priority(nodes, n),
        }
    }

    /// Rotate the list by a shared counter, the nodes behind the first one
    /// are shuffled.
    fn round_robin(&self, nodes: &mut [Host]) {
        if nodes.len() < 2 {
            return;
        }
        let offset = self.next.fetch_add(1, Ordering::Relaxed) % nodes.len();
        nodes.rotate_left(offset);
        nodes[1..].shuffle(&mut rand::rng());
    }

    /// The first `n` configured hosts that are still active go first, in
    /// round robin order, followed by the other nodes shuffled.
    fn priority(&self, nodes: &mut Vec<Host>, n: usize) {
        let active: HashSet<&Host> = nodes.iter().collect();
        let mut preferred: Vec<Host> = self
            .configured
            .iter()
            .take(n)
            .filter(|host| active.contains(host))
            .cloned()
            .collect();
        self.round_robin(&mut preferred);

        let first: HashSet<Host> = preferred.iter().cloned().collect();
        let mut rest: Vec<Host> = nodes
            .iter()
            .filter(|host| !first.contains(*host))
            .cloned()
            .collect();
        rest.shuffle(&mut rand::rng());

        preferred.extend(rest);
        *nodes = preferred;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts(names: &[&str]) -> Vec<Host> {
        names
            .iter()
            .map(|name| Host::new((*name).to_owned(), 8000))
            .collect()
    }

    #[test]
    fn test_none_keeps_order() {
        let balancer = Balancer::new(BalancePolicy::None, vec![]);
        let mut nodes = hosts(&["a", "b", "c"]);
        balancer.balance(&mut nodes);
        assert_eq!(hosts(&["a", "b", "c"]), nodes);
    }

    #[test]
    fn test_round_robin_cycles_first_node() {
        let balancer = Balancer::new(BalancePolicy::RoundRobin, vec![]);
        let mut firsts = Vec::new();
        for _ in 0..6 {
            let mut nodes = hosts(&["a", "b", "c"]);
            balancer.balance(&mut nodes);
            assert_eq!(3, nodes.len());
            let unique: HashSet<_> = nodes.iter().collect();
            assert_eq!(3, unique.len());
            firsts.push(nodes[0].host.clone());
        }
        assert_eq!(vec!["b", "c", "a", "b", "c", "a"], firsts);
    }

    #[test]
    fn test_single_node_untouched() {
        let balancer = Balancer::new(BalancePolicy::LeastConn, vec![]);
        let mut nodes = hosts(&["a"]);
        balancer.balance(&mut nodes);
        assert_eq!(hosts(&["a"]), nodes);
    }

    #[test]
    fn test_shuffle_is_permutation() {
        let balancer = Balancer::new(BalancePolicy::Shuffle, vec![]);
        let mut nodes = hosts(&["a", "b", "c", "d"]);
        balancer.balance(&mut nodes);
        let mut names: Vec<_> = nodes.iter().map(|h| h.host.as_str()).collect();
        names.sort_unstable();
        assert_eq!(vec!["a", "b", "c", "d"], names);
    }

    #[test]
    fn test_priority_prefers_configured_nodes() {
        let configured = hosts(&["a", "b", "c"]);
        let balancer = Balancer::new(BalancePolicy::Priority(2), configured);

        for _ in 0..4 {
            // refreshed list with an extra node
            let mut nodes = hosts(&["d", "c", "b", "a"]);
            balancer.balance(&mut nodes);
            assert_eq!(4, nodes.len());
            let head: HashSet<_> = nodes[..2].iter().map(|h| h.host.as_str()).collect();
            assert_eq!(HashSet::from(["a", "b"]), head);
        }

        // an inactive preferred node is dropped from the head
        let mut nodes = hosts(&["c", "b", "d"]);
        balancer.balance(&mut nodes);
        assert_eq!("b", nodes[0].host);
        assert_eq!(3, nodes.len());
    }
}
