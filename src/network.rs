//! Network topology module
//!
//! Holds the node and link collections and the index-based cross
//! references between them. Entities are stored in dense vectors and
//! referenced by integer index everywhere in the engine; string IDs are
//! resolved once at project open.

use crate::error::TopologyError;
use crate::link::Link;
use crate::node::Node;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Drainage network topology
///
/// The network is a directed graph where nodes are point structures and
/// links are flow paths. Positive link flow runs node1 → node2.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Network {
    /// Collection of nodes in the network
    pub nodes: Vec<Node>,

    /// Collection of links in the network
    pub links: Vec<Link>,

    /// Node ID → index, built by [`Network::resolve`]
    #[serde(skip)]
    node_index: HashMap<String, usize>,

    /// Link ID → index, built by [`Network::resolve`]
    #[serde(skip)]
    link_index: HashMap<String, usize>,

    /// Outgoing link indices per node, built by [`Network::resolve`]
    #[serde(skip)]
    out_links: Vec<Vec<usize>>,

    /// Incoming link indices per node, built by [`Network::resolve`]
    #[serde(skip)]
    in_links: Vec<Vec<usize>>,
}

impl Network {
    /// Create a new empty network
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            links: Vec::new(),
            node_index: HashMap::new(),
            link_index: HashMap::new(),
            out_links: Vec::new(),
            in_links: Vec::new(),
        }
    }

    /// Add a node to the network
    pub fn add_node(&mut self, node: Node) {
        self.nodes.push(node);
    }

    /// Add a link to the network
    pub fn add_link(&mut self, link: Link) {
        self.links.push(link);
    }

    /// Resolve string cross references into dense indices and build the
    /// per-node adjacency lists. Must be called before routing; call it
    /// again after any structural edit.
    pub fn resolve(&mut self) -> Result<(), TopologyError> {
        self.node_index = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();
        self.link_index = self
            .links
            .iter()
            .enumerate()
            .map(|(i, l)| (l.id.clone(), i))
            .collect();

        self.out_links = vec![Vec::new(); self.nodes.len()];
        self.in_links = vec![Vec::new(); self.nodes.len()];

        for i in 0..self.links.len() {
            let (from, to, id) = {
                let link = &self.links[i];
                (link.from_node.clone(), link.to_node.clone(), link.id.clone())
            };
            let n1 = *self
                .node_index
                .get(&from)
                .ok_or_else(|| TopologyError::UnknownNode(id.clone(), from.clone()))?;
            let n2 = *self
                .node_index
                .get(&to)
                .ok_or_else(|| TopologyError::UnknownNode(id.clone(), to.clone()))?;
            self.links[i].node1 = n1;
            self.links[i].node2 = n2;
            self.out_links[n1].push(i);
            self.in_links[n2].push(i);
        }
        Ok(())
    }

    /// Find a node index by ID
    pub fn node_index(&self, id: &str) -> Option<usize> {
        self.node_index.get(id).copied()
    }

    /// Find a link index by ID
    pub fn link_index(&self, id: &str) -> Option<usize> {
        self.link_index.get(id).copied()
    }

    /// Find a node by ID
    pub fn find_node(&self, id: &str) -> Option<&Node> {
        self.node_index(id).map(|i| &self.nodes[i])
    }

    /// Find a link by ID
    pub fn find_link(&self, id: &str) -> Option<&Link> {
        self.link_index(id).map(|i| &self.links[i])
    }

    /// Indices of the links leaving node `n`
    pub fn out_links(&self, n: usize) -> &[usize] {
        &self.out_links[n]
    }

    /// Indices of the links entering node `n`
    pub fn in_links(&self, n: usize) -> &[usize] {
        &self.in_links[n]
    }

    /// Borrow the node and link collections independently, for routing
    /// code that mutates both in one pass
    pub fn split_mut(&mut self) -> (&mut [Node], &mut [Link]) {
        (&mut self.nodes, &mut self.links)
    }

    /// Rebuild adjacency after links were reversed in place
    pub fn rebuild_adjacency(&mut self) {
        self.out_links = vec![Vec::new(); self.nodes.len()];
        self.in_links = vec![Vec::new(); self.nodes.len()];
        for (i, link) in self.links.iter().enumerate() {
            self.out_links[link.node1].push(i);
            self.in_links[link.node2].push(i);
        }
    }

    /// Indices of all outfall nodes
    pub fn outfalls(&self) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_outfall())
            .map(|(i, _)| i)
            .collect()
    }

    /// Count total number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Count total number of links
    pub fn link_count(&self) -> usize {
        self.links.len()
    }
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::ConduitProps;
    use crate::node::OutfallBoundary;
    use crate::xsect::XsectShape;

    fn conduit(id: &str, from: &str, to: &str) -> Link {
        Link::new_conduit(
            id.to_string(),
            from.to_string(),
            to.to_string(),
            ConduitProps {
                xsect: XsectShape::Circular { diameter: 1.5 },
                length: 200.0,
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

    fn two_node_network() -> Network {
        let mut network = Network::new();
        network.add_node(Node::new_junction("J1".to_string(), 104.0, 8.0));
        network.add_node(Node::new_outfall(
            "O1".to_string(),
            100.0,
            OutfallBoundary::Free,
        ));
        network.add_link(conduit("C1", "J1", "O1"));
        network
    }

    #[test]
    fn test_empty_network() {
        let network = Network::new();
        assert_eq!(network.node_count(), 0);
        assert_eq!(network.link_count(), 0);
    }

    #[test]
    fn test_resolve_builds_adjacency() {
        let mut network = two_node_network();
        network.resolve().unwrap();

        let j1 = network.node_index("J1").unwrap();
        let o1 = network.node_index("O1").unwrap();
        assert_eq!(network.out_links(j1), &[0]);
        assert_eq!(network.in_links(o1), &[0]);
        assert_eq!(network.links[0].node1, j1);
        assert_eq!(network.links[0].node2, o1);
        assert_eq!(network.outfalls(), vec![o1]);
    }

    #[test]
    fn test_resolve_rejects_unknown_node() {
        let mut network = two_node_network();
        network.add_link(conduit("C2", "J1", "J9"));
        let err = network.resolve().unwrap_err();
        assert!(matches!(err, TopologyError::UnknownNode(_, _)));
    }

    #[test]
    fn test_rebuild_after_reverse() {
        let mut network = two_node_network();
        network.resolve().unwrap();
        network.links[0].reverse();
        network.rebuild_adjacency();

        let j1 = network.node_index("J1").unwrap();
        let o1 = network.node_index("O1").unwrap();
        assert_eq!(network.out_links(o1), &[0]);
        assert_eq!(network.in_links(j1), &[0]);
    }
}
