//! Topological ordering of links
//!
//! Steady and kinematic-wave routing process links strictly from
//! upstream to downstream: a link may only be solved after every link
//! that can deliver flow to its upstream node. The order is computed
//! once at project open from the node adjacency and reused every step.

use crate::error::TopologyError;
use crate::network::Network;
use std::collections::VecDeque;

/// Sort link indices so that each link appears after all links entering
/// its upstream node. Fails if the network contains a flow cycle.
pub fn sort_links(network: &Network) -> Result<Vec<usize>, TopologyError> {
    let n = network.node_count();
    let mut in_degree: Vec<usize> = (0..n).map(|i| network.in_links(i).len()).collect();

    let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut sorted = Vec::with_capacity(network.link_count());
    let mut visited_nodes = 0;

    while let Some(node) = queue.pop_front() {
        visited_nodes += 1;
        for &link in network.out_links(node) {
            sorted.push(link);
            let downstream = network.links[link].node2;
            in_degree[downstream] -= 1;
            if in_degree[downstream] == 0 {
                queue.push_back(downstream);
            }
        }
    }

    if visited_nodes < n {
        // some node never drained to zero in-degree: it sits on a cycle
        let culprit = in_degree
            .iter()
            .position(|&d| d > 0)
            .map(|i| network.nodes[i].id.clone())
            .unwrap_or_default();
        return Err(TopologyError::FlowCycle(culprit));
    }
    Ok(sorted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{ConduitProps, Link};
    use crate::node::{Node, OutfallBoundary};
    use crate::xsect::XsectShape;

    fn conduit(id: &str, from: &str, to: &str) -> Link {
        Link::new_conduit(
            id.to_string(),
            from.to_string(),
            to.to_string(),
            ConduitProps {
                xsect: XsectShape::Circular { diameter: 1.0 },
                length: 100.0,
                roughness: 0.013,
                barrels: 1,
                evap_rate: None,
                seepage_rate: None,
                slope: 0.0,
                beta: 0.0,
                q_full: 0.0,
            },
        )
    }

    #[test]
    fn test_branching_tree_sorts_upstream_first() {
        // J1 → J3, J2 → J3, J3 → O1; add links deliberately out of order
        let mut network = Network::new();
        network.add_node(Node::new_junction("J1".into(), 110.0, 5.0));
        network.add_node(Node::new_junction("J2".into(), 110.0, 5.0));
        network.add_node(Node::new_junction("J3".into(), 105.0, 5.0));
        network.add_node(Node::new_outfall("O1".into(), 100.0, OutfallBoundary::Free));
        network.add_link(conduit("C3", "J3", "O1"));
        network.add_link(conduit("C1", "J1", "J3"));
        network.add_link(conduit("C2", "J2", "J3"));
        network.resolve().unwrap();

        let sorted = sort_links(&network).unwrap();
        assert_eq!(sorted.len(), 3);
        let pos =
            |id: &str| sorted.iter().position(|&l| network.links[l].id == id).unwrap();
        assert!(pos("C1") < pos("C3"));
        assert!(pos("C2") < pos("C3"));
    }

    #[test]
    fn test_cycle_is_rejected() {
        let mut network = Network::new();
        network.add_node(Node::new_junction("A".into(), 100.0, 5.0));
        network.add_node(Node::new_junction("B".into(), 100.0, 5.0));
        network.add_link(conduit("C1", "A", "B"));
        network.add_link(conduit("C2", "B", "A"));
        network.resolve().unwrap();

        let err = sort_links(&network).unwrap_err();
        assert!(matches!(err, TopologyError::FlowCycle(_)));
    }

    #[test]
    fn test_empty_network_sorts_trivially() {
        let mut network = Network::new();
        network.resolve().unwrap();
        assert!(sort_links(&network).unwrap().is_empty());
    }
}
