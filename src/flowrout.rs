//! Tree-model flow routing
//!
//! Implements the per-step routing pass shared by the steady and
//! kinematic-wave models: layout validation, initial depth seeding, the
//! upstream-to-downstream link loop, the iterative storage-node updater,
//! and the node/link state close-out.
//!
//! Links are processed in topologically sorted order so that when a
//! storage node is reached, every link that can still feed it has
//! already delivered its flow, and the links it feeds are solved against
//! its freshly updated depth.

use crate::error::{EngineError, TopologyError};
use crate::kinwave;
use crate::link::{FullState, Link, LinkKind, PumpCurve};
use crate::network::Network;
use crate::node::{Node, NodeKind};
use crate::project::RoutingModel;
use crate::toposort;
use crate::xsect::XsectShape;
use log::debug;

/// Under-relaxation factor for the storage-node updater
pub const OMEGA: f64 = 0.55;

/// Maximum iterations for the storage-node updater
pub const MAXITER: usize = 10;

/// Depth-change stopping tolerance for the storage-node updater (ft)
pub const STOPTOL: f64 = 0.005;

/// Rates below this are treated as zero (cfs)
const FUDGE: f64 = 1.0e-4;

/// Outcome of one tree-routing step
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepStats {
    /// Mean kinematic-wave sub-step count across conduits
    pub kinwave_steps: f64,
    /// Conduit evaporation and seepage volume lost this step (cu ft)
    pub loss_volume: f64,
}

/// Initialize routing: derive conduit parameters, validate the layout
/// for the selected model, seed initial depths and flows, and return the
/// topologically sorted link order (empty under dynamic-wave).
pub fn init(network: &mut Network, routing_model: RoutingModel) -> Result<Vec<usize>, EngineError> {
    compute_conduit_params(network, routing_model)?;

    if routing_model.is_tree_model() {
        validate_tree_layout(network)?;
    } else {
        validate_general_layout(network)?;
    }

    let sorted = if routing_model.is_tree_model() {
        toposort::sort_links(network)?
    } else {
        Vec::new()
    };

    init_link_states(network);
    init_node_states(network);
    debug!(
        "routing initialized: {} nodes, {} links, model {:?}",
        network.node_count(),
        network.link_count(),
        routing_model
    );
    Ok(sorted)
}

/// Derive slope, conveyance factor, and full-flow capacity for every
/// conduit. Under dynamic-wave an adverse conduit is flipped to run
/// downhill; under the tree models it is a validation error.
fn compute_conduit_params(
    network: &mut Network,
    routing_model: RoutingModel,
) -> Result<(), EngineError> {
    let mut reversed_any = false;
    for i in 0..network.links.len() {
        if !network.links[i].is_conduit() {
            continue;
        }
        let n1 = network.links[i].node1;
        let n2 = network.links[i].node2;
        let z1 = network.nodes[n1].invert_elevation + network.links[i].offset1;
        let z2 = network.nodes[n2].invert_elevation + network.links[i].offset2;
        let slope = network.links[i].compute_conduit_params(z1, z2);

        let is_dummy = matches!(
            network.links[i].conduit().map(|p| &p.xsect),
            Some(XsectShape::Dummy)
        );
        if slope <= 0.0 && !is_dummy {
            if routing_model.is_tree_model() {
                return Err(TopologyError::AdverseSlope(network.links[i].id.clone()).into());
            }
            // dynamic-wave: flip the link to run downhill
            network.links[i].reverse();
            let n1 = network.links[i].node1;
            let n2 = network.links[i].node2;
            let z1 = network.nodes[n1].invert_elevation + network.links[i].offset1;
            let z2 = network.nodes[n2].invert_elevation + network.links[i].offset2;
            network.links[i].compute_conduit_params(z1, z2);
            reversed_any = true;
        }
    }
    if reversed_any {
        network.rebuild_adjacency();
    }
    Ok(())
}

/// Layout rules for steady and kinematic-wave routing
fn validate_tree_layout(network: &Network) -> Result<(), TopologyError> {
    if network.outfalls().is_empty() {
        return Err(TopologyError::NoOutfall);
    }
    for (i, node) in network.nodes.iter().enumerate() {
        let out = network.out_links(i);
        match &node.kind {
            NodeKind::Divider { .. } => {
                if out.len() != 2 {
                    return Err(TopologyError::DividerOutletCount(node.id.clone(), out.len()));
                }
            }
            NodeKind::Storage { .. } => {
                // storage may feed any number of links
            }
            NodeKind::Outfall { .. } => {
                if out.len() + network.in_links(i).len() != 1 {
                    return Err(TopologyError::OutfallLinkCount(node.id.clone()));
                }
            }
            NodeKind::Junction => {
                if out.len() > 1 {
                    return Err(TopologyError::MultipleOutlets(node.id.clone()));
                }
            }
        }
        // dummy conduits and ideal pumps must be the sole outlet
        for &j in out {
            if network.links[j].is_ideal() && out.len() > 1 {
                return Err(TopologyError::DummyNotExclusive(
                    network.links[j].id.clone(),
                    node.id.clone(),
                ));
            }
        }
    }
    Ok(())
}

/// Layout rules for dynamic-wave routing
fn validate_general_layout(network: &Network) -> Result<(), TopologyError> {
    if network.outfalls().is_empty() {
        return Err(TopologyError::NoOutfall);
    }
    for (i, node) in network.nodes.iter().enumerate() {
        if node.is_outfall() && network.out_links(i).len() + network.in_links(i).len() != 1 {
            return Err(TopologyError::OutfallLinkCount(node.id.clone()));
        }
    }
    Ok(())
}

/// Seed link flows and end areas from the user's initial flow
fn init_link_states(network: &mut Network) {
    for link in &mut network.links {
        let q = link.init_flow;
        link.state.new_flow = q;
        link.state.old_flow = q;
        if let Some(props) = link.conduit() {
            let barrels = props.barrels.max(1) as f64;
            let a = if props.beta > 0.0 {
                props.xsect.area_of_section_factor(q / barrels / props.beta)
            } else {
                0.0
            };
            let y = props.xsect.depth_of_area(a);
            let volume = a * props.length * barrels;
            link.state.a1 = a;
            link.state.a2 = a;
            link.state.q1 = q / barrels;
            link.state.q2 = q / barrels;
            link.state.new_depth = y;
            link.state.old_depth = y;
            link.state.new_volume = volume;
            link.state.old_volume = volume;
        }
    }
}

/// Seed node depths: user initial depths where given, else the mean of
/// the connected conduit flow depths
fn init_node_states(network: &mut Network) {
    let mut depth_sum = vec![0.0; network.nodes.len()];
    let mut depth_count = vec![0usize; network.nodes.len()];
    for link in &network.links {
        if link.conduit().is_some() && link.state.new_depth > 0.0 {
            depth_sum[link.node1] += link.state.new_depth + link.offset1;
            depth_count[link.node1] += 1;
            depth_sum[link.node2] += link.state.new_depth + link.offset2;
            depth_count[link.node2] += 1;
        }
    }
    for (i, node) in network.nodes.iter_mut().enumerate() {
        let d = if node.init_depth > 0.0 {
            node.init_depth
        } else if depth_count[i] > 0 {
            (depth_sum[i] / depth_count[i] as f64).min(node.full_depth)
        } else {
            0.0
        };
        node.state.new_depth = d;
        node.state.old_depth = d;
        node.state.new_volume = node.volume_of_depth(d);
        node.state.old_volume = node.state.new_volume;
        node.state.old_net_inflow = 0.0;
        node.state.updated = false;
    }
}

/// Execute one routing step of `dt` seconds under a tree model.
///
/// The caller must have shifted new state to old state and loaded the
/// lateral inflows into each node's `inflow` accumulator.
pub fn execute(
    network: &mut Network,
    sorted: &[usize],
    routing_model: RoutingModel,
    allow_ponding: bool,
    dt: f64,
) -> Result<StepStats, EngineError> {
    let (nodes, links) = network.split_mut();
    let mut stats = StepStats::default();

    // reset visit markers; carry-over volume on non-storage nodes is
    // flagged as overflow up front
    for node in nodes.iter_mut() {
        node.state.updated = false;
        node.state.overflow = 0.0;
        let full = node.full_volume();
        if !node.is_storage() && node.state.new_volume > full {
            node.state.overflow = (node.state.new_volume - full) / dt;
        }
    }

    // upstream-to-downstream link pass
    let mut substeps = 0.0;
    let mut conduits = 0usize;
    for (pos, &j) in sorted.iter().enumerate() {
        let n1 = links[j].node1;
        if nodes[n1].is_storage() && !nodes[n1].state.updated {
            update_storage_state(nodes, links, n1, pos, sorted, dt, allow_ponding);
        }

        let mut qin = link_inflow(nodes, links, j, dt);
        let (qout, steps, loss) = match routing_model {
            RoutingModel::Steady => {
                let (qout, loss) = steadyflow_execute(&mut links[j], &mut qin);
                (qout, 1.0, loss)
            }
            RoutingModel::KinematicWave => kinwave::execute(&mut links[j], &mut qin, dt),
            RoutingModel::DynamicWave => unreachable!("dynamic-wave skips the tree link loop"),
        };
        if links[j].is_conduit() {
            substeps += steps;
            conduits += 1;
            stats.loss_volume += loss * dt;
        }

        links[j].state.new_flow = qout;
        // of the water drawn from the node, the evaporated/seeped share
        // is a node loss, the rest is node outflow
        nodes[n1].state.outflow += qin - loss;
        nodes[n1].state.losses += loss;
        let n2 = links[j].node2;
        nodes[n2].state.inflow += qout;
    }
    if conduits > 0 {
        stats.kinwave_steps = substeps / conduits as f64;
    }

    // close out every node not already visited; terminal storage nodes
    // run the iterative updater against an empty link tail
    for i in 0..nodes.len() {
        if nodes[i].is_storage() {
            if !nodes[i].state.updated {
                update_storage_state(nodes, links, i, sorted.len(), sorted, dt, allow_ponding);
            }
            let state = &mut nodes[i].state;
            state.old_net_inflow = state.inflow - state.outflow - state.losses;
        } else if !nodes[i].state.updated {
            set_new_node_state(&mut nodes[i], dt, allow_ponding);
        }
    }

    // close out link depths, volumes, and fullness flags
    for j in 0..links.len() {
        set_new_link_state(nodes, links, j);
    }
    Ok(stats)
}

/// Inflow delivered to link `j` this step, clamped by what its upstream
/// node can release
fn link_inflow(nodes: &[Node], links: &[Link], j: usize, dt: f64) -> f64 {
    let link = &links[j];
    let n1 = link.node1;
    let q = if link.is_conduit() || link.is_pump() || nodes[n1].is_storage() {
        node_outflow(nodes, links, n1, j)
    } else {
        0.0
    };
    node_max_outflow(&nodes[n1], q, dt)
}

/// Flow node `n` releases into link `j`
fn node_outflow(nodes: &[Node], links: &[Link], n: usize, j: usize) -> f64 {
    match &nodes[n].kind {
        NodeKind::Storage { .. } => storage_link_outflow(&nodes[n], &links[j]),
        NodeKind::Divider {
            cutoff,
            diverted_link,
        } => {
            let inflow = nodes[n].state.inflow;
            if links[j].id == *diverted_link {
                (inflow - cutoff).max(0.0)
            } else {
                inflow.min(*cutoff)
            }
        }
        _ => nodes[n].state.inflow,
    }
}

/// Largest outflow node `n` can sustain this step: its inflow plus the
/// volume already stored. Nodes with no storage pass flow through.
fn node_max_outflow(node: &Node, q: f64, dt: f64) -> f64 {
    let mut q = q;
    if node.full_volume() > 0.0 {
        let q_max = node.state.inflow + node.state.old_volume / dt;
        q = q.min(q_max);
    }
    q.max(0.0)
}

/// Flow a storage node releases into one outgoing link, evaluated
/// against the node's provisional depth
fn storage_link_outflow(node: &Node, link: &Link) -> f64 {
    let head = node.state.new_depth - link.offset1;
    match &link.kind {
        LinkKind::Conduit(props) => {
            if matches!(props.xsect, XsectShape::Dummy) {
                return node.state.inflow;
            }
            if head <= 0.0 {
                return 0.0;
            }
            let y = head.min(props.xsect.y_full());
            let q = props.beta * props.xsect.section_factor_of_depth(y);
            q * props.barrels.max(1) as f64
        }
        LinkKind::Pump(props) => match props.curve {
            PumpCurve::Ideal => node.state.inflow,
            PumpCurve::Rated { capacity } => {
                if node.state.new_depth > props.shutoff_depth {
                    capacity * link.state.setting
                } else {
                    0.0
                }
            }
        },
        _ => link.regulator_flow(head),
    }
}

/// Iterative storage-node updater.
///
/// Solves the midpoint volume balance for a storage node whose outflow
/// depends on its own depth, using damped successive approximation.
/// `pos` points at the first of the node's outgoing links in the sorted
/// order (or past the end for a terminal node).
fn update_storage_state(
    nodes: &mut [Node],
    links: &[Link],
    i: usize,
    pos: usize,
    sorted: &[usize],
    dt: f64,
    allow_ponding: bool,
) {
    let v_fixed = nodes[i].state.old_volume
        + 0.5 * (nodes[i].state.old_net_inflow + nodes[i].state.inflow - nodes[i].state.outflow)
            * dt;
    let full_volume = nodes[i].full_volume();
    let can_pond = allow_ponding && nodes[i].ponded_area > 0.0;

    let mut d1 = nodes[i].state.new_depth;
    for _ in 0..MAXITER {
        let outflow = storage_outflow_sum(nodes, links, i, pos, sorted, dt);
        let mut v2 = (v_fixed - 0.5 * outflow * dt).max(0.0);

        if v2 > full_volume {
            let overflow = (v2 - nodes[i].state.old_volume.max(full_volume)) / dt;
            nodes[i].state.overflow = if overflow < FUDGE { 0.0 } else { overflow };
            if !can_pond {
                v2 = full_volume;
            }
        } else {
            nodes[i].state.overflow = 0.0;
        }

        nodes[i].state.new_volume = v2;
        let mut d2 = nodes[i].depth_of_volume(v2);
        d2 = (1.0 - OMEGA) * d1 + OMEGA * d2;
        nodes[i].state.new_depth = d2;
        if (d2 - d1).abs() <= STOPTOL {
            break;
        }
        d1 = d2;
    }

    // hydraulic residence time decays as the stored water turns over
    let outflow = storage_outflow_sum(nodes, links, i, pos, sorted, dt);
    let v = nodes[i].state.new_volume;
    let state = &mut nodes[i].state;
    if v + outflow * dt > 0.0 {
        state.hrt = (state.hrt + dt) * v / (v + outflow * dt);
    } else {
        state.hrt = 0.0;
    }
    state.updated = true;
}

/// Sum of the inflows into every link leaving storage node `i`,
/// starting at position `pos` of the sorted order. The sorted order
/// keeps a node's outgoing links contiguous.
fn storage_outflow_sum(
    nodes: &[Node],
    links: &[Link],
    i: usize,
    pos: usize,
    sorted: &[usize],
    dt: f64,
) -> f64 {
    let mut outflow = 0.0;
    for &m in &sorted[pos.min(sorted.len())..] {
        if links[m].node1 != i {
            break;
        }
        outflow += link_inflow(nodes, links, m, dt);
    }
    outflow
}

/// Steady-flow link solver: instantaneous capacity-limited pass-through.
/// Returns the outflow and the evap/seepage loss taken from the inflow
/// (both totals over all barrels).
fn steadyflow_execute(link: &mut Link, qin: &mut f64) -> (f64, f64) {
    let Some(props) = link.conduit() else {
        return (*qin, 0.0);
    };
    if matches!(props.xsect, XsectShape::Dummy) {
        link.state.a1 = 0.0;
        link.state.a2 = 0.0;
        return (*qin, 0.0);
    }

    let barrels = props.barrels.max(1) as f64;
    let mut q = *qin / barrels;

    // conduit surface losses come off the top
    let loss = conduit_loss_rate(link, q);
    if loss > 0.0 {
        q = (q - loss).max(0.0);
    }

    let props = link.conduit().unwrap();
    let (a1, capacity_limited) = if q > props.q_full {
        q = props.q_full;
        *qin = (q + loss) * barrels;
        (props.xsect.a_full(), true)
    } else {
        let a = if props.beta > 0.0 {
            props.xsect.area_of_section_factor(q / props.beta)
        } else {
            0.0
        };
        (a, false)
    };

    link.state.a1 = a1;
    link.state.a2 = a1;
    link.state.q1 = q;
    link.state.q2 = q;
    link.state.capacity_limited = capacity_limited;
    (q * barrels, loss * barrels)
}

/// Evaporation plus seepage rate for one barrel of a conduit (cfs)
pub fn conduit_loss_rate(link: &Link, q: f64) -> f64 {
    let Some(props) = link.conduit() else {
        return 0.0;
    };
    if q <= 0.0 {
        return 0.0;
    }
    let y = link.state.new_depth.max(link.state.old_depth);
    let mut loss = 0.0;
    if let Some(evap) = props.evap_rate {
        loss += evap * props.xsect.width_of_depth(y).max(0.0) * props.length;
    }
    if let Some(seep) = props.seepage_rate {
        loss += seep * props.xsect.perimeter_of_depth(y) * props.length;
    }
    loss.min(q)
}

/// Midpoint volume integration for a non-storage node
fn set_new_node_state(node: &mut Node, dt: f64, allow_ponding: bool) {
    // outfalls hold no volume; their depth comes from the boundary
    if node.is_outfall() {
        node.state.new_volume = 0.0;
        node.state.old_net_inflow = 0.0;
        node.state.updated = true;
        return;
    }

    let can_pond = allow_ponding && node.ponded_area > 0.0;
    let full = node.full_volume();
    let net_inflow = node.state.inflow - node.state.outflow - node.state.losses;
    let mut v2 =
        node.state.old_volume + 0.5 * (node.state.old_net_inflow + net_inflow) * dt;
    v2 = v2.max(0.0);
    node.state.old_net_inflow = net_inflow;

    if v2 > full {
        let overflow = (v2 - node.state.old_volume.max(full)) / dt;
        node.state.overflow = if overflow < FUDGE { 0.0 } else { overflow };
        if !can_pond {
            v2 = full;
        }
    }
    node.state.new_volume = v2;
    node.state.new_depth = node.depth_of_volume(v2);
    node.state.updated = true;
}

/// Close out a conduit's depth, volume, and fullness flags and push the
/// end depths up into its nodes
fn set_new_link_state(nodes: &mut [Node], links: &mut [Link], j: usize) {
    let Some(props) = links[j].conduit() else {
        return;
    };
    let barrels = props.barrels.max(1) as f64;
    let xsect = props.xsect.clone();
    let length = props.length;
    let a_full = xsect.a_full();

    let state = &links[j].state;
    let a = 0.5 * (state.a1 + state.a2);
    let y1 = xsect.depth_of_area(state.a1);
    let y2 = xsect.depth_of_area(state.a2);

    let up_full = state.a1 >= a_full && a_full > 0.0;
    let dn_full = state.a2 >= a_full && a_full > 0.0;
    let full_state = match (up_full, dn_full) {
        (true, true) => FullState::AllFull,
        (true, false) => FullState::UpFull,
        (false, true) => FullState::DnFull,
        (false, false) => FullState::NotFull,
    };

    let (n1, n2) = (links[j].node1, links[j].node2);
    let (offset1, offset2) = (links[j].offset1, links[j].offset2);

    let state = &mut links[j].state;
    state.new_depth = 0.5 * (y1 + y2);
    state.new_volume = a * length * barrels;
    state.full_state = full_state;

    // conduit depth reflects back onto the end nodes, only ever upward
    update_node_depth(&mut nodes[n1], y1 + offset1);
    if let NodeKind::Outfall { boundary, .. } = nodes[n2].kind {
        nodes[n2].state.new_depth = match boundary {
            crate::node::OutfallBoundary::FixedStage { stage } => {
                (stage - nodes[n2].invert_elevation).max(0.0)
            }
            _ => y2,
        };
    } else {
        update_node_depth(&mut nodes[n2], y2 + offset2);
    }
}

/// Raise a node's depth to reflect the connected conduit, never lowering
/// it and never past the full depth
fn update_node_depth(node: &mut Node, y: f64) {
    if node.is_storage() {
        return;
    }
    let mut y = y;
    if node.state.overflow > 0.0 {
        y = node.full_depth;
    }
    if node.state.new_depth < y {
        node.state.new_depth = y.min(node.full_depth);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::ConduitProps;
    use crate::node::{OutfallBoundary, StorageCurve};
    use approx::assert_relative_eq;

    fn conduit(id: &str, from: &str, to: &str, diameter: f64) -> Link {
        Link::new_conduit(
            id.to_string(),
            from.to_string(),
            to.to_string(),
            ConduitProps {
                xsect: XsectShape::Circular { diameter },
                length: 400.0,
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
        network.add_node(Node::new_junction("J1".into(), 104.0, 10.0));
        network.add_node(Node::new_outfall("O1".into(), 100.0, OutfallBoundary::Free));
        network.add_link(conduit("C1", "J1", "O1", 2.0));
        network.resolve().unwrap();
        network
    }

    #[test]
    fn test_init_computes_conduit_capacity() {
        let mut network = two_node_network();
        let sorted = init(&mut network, RoutingModel::Steady).unwrap();
        assert_eq!(sorted, vec![0]);
        let q_full = network.links[0].conduit().unwrap().q_full;
        assert!(q_full > 19.0 && q_full < 21.0, "q_full = {q_full}");
    }

    #[test]
    fn test_adverse_slope_rejected_for_tree_models() {
        let mut network = Network::new();
        network.add_node(Node::new_junction("J1".into(), 100.0, 10.0));
        network.add_node(Node::new_outfall("O1".into(), 104.0, OutfallBoundary::Free));
        network.add_link(conduit("C1", "J1", "O1", 2.0));
        network.resolve().unwrap();

        let err = init(&mut network, RoutingModel::KinematicWave).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Topology(TopologyError::AdverseSlope(_))
        ));
    }

    #[test]
    fn test_adverse_slope_reversed_for_dynamic_wave() {
        let mut network = Network::new();
        network.add_node(Node::new_junction("J1".into(), 100.0, 10.0));
        network.add_node(Node::new_junction("J2".into(), 104.0, 10.0));
        network.add_node(Node::new_outfall("O1".into(), 96.0, OutfallBoundary::Free));
        network.add_link(conduit("C1", "J1", "J2", 2.0));
        network.add_link(conduit("C2", "J1", "O1", 2.0));
        network.resolve().unwrap();

        init(&mut network, RoutingModel::DynamicWave).unwrap();
        assert_eq!(network.links[0].from_node, "J2");
        assert_eq!(network.links[0].state.direction, -1);
        assert!(network.links[0].conduit().unwrap().slope > 0.0);
    }

    #[test]
    fn test_multiple_outlets_rejected() {
        let mut network = Network::new();
        network.add_node(Node::new_junction("J1".into(), 110.0, 10.0));
        network.add_node(Node::new_junction("J2".into(), 105.0, 10.0));
        network.add_node(Node::new_outfall("O1".into(), 100.0, OutfallBoundary::Free));
        network.add_link(conduit("C1", "J1", "J2", 2.0));
        network.add_link(conduit("C2", "J1", "O1", 2.0));
        network.resolve().unwrap();

        let err = init(&mut network, RoutingModel::Steady).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Topology(TopologyError::MultipleOutlets(_))
        ));
    }

    #[test]
    fn test_steady_flow_passes_inflow_through() {
        let mut network = two_node_network();
        let sorted = init(&mut network, RoutingModel::Steady).unwrap();

        // 5 cfs of lateral inflow at the junction
        network.nodes[0].state.inflow = 5.0;
        network.nodes[0].state.new_lat_flow = 5.0;
        execute(&mut network, &sorted, RoutingModel::Steady, false, 30.0).unwrap();

        assert_relative_eq!(network.links[0].state.new_flow, 5.0, epsilon = 1e-9);
        assert_relative_eq!(network.nodes[1].state.inflow, 5.0, epsilon = 1e-9);
        // flow area matches the section factor inversion
        let props = network.links[0].conduit().unwrap();
        let expected_a = props.xsect.area_of_section_factor(5.0 / props.beta);
        assert_relative_eq!(network.links[0].state.a1, expected_a, epsilon = 1e-6);
        assert!(!network.links[0].state.capacity_limited);
        // every node was closed out
        assert!(network.nodes.iter().all(|n| n.state.updated));
    }

    #[test]
    fn test_steady_flow_clamps_at_capacity() {
        let mut network = two_node_network();
        let sorted = init(&mut network, RoutingModel::Steady).unwrap();
        let q_full = network.links[0].conduit().unwrap().q_full;

        network.nodes[0].state.inflow = 2.0 * q_full;
        network.nodes[0].state.new_lat_flow = 2.0 * q_full;
        execute(&mut network, &sorted, RoutingModel::Steady, false, 30.0).unwrap();

        let link = &network.links[0];
        assert_relative_eq!(link.state.new_flow, q_full, epsilon = 1e-9);
        assert_relative_eq!(link.state.a1, link.conduit().unwrap().xsect.a_full(), epsilon = 1e-9);
        assert!(link.state.capacity_limited);
        assert_eq!(link.state.full_state, FullState::AllFull);
        // the surplus stays at the junction as overflow
        assert!(network.nodes[0].state.overflow > 0.0);
    }

    #[test]
    fn test_conduit_losses_charged_to_upstream_node() {
        let mut network = two_node_network();
        let sorted = init(&mut network, RoutingModel::Steady).unwrap();
        if let Some(props) = network.links[0].conduit_mut() {
            props.evap_rate = Some(1.0e-5);
        }
        // a wetted surface from the previous step
        network.links[0].state.old_depth = 1.0;

        network.nodes[0].state.inflow = 5.0;
        let stats =
            execute(&mut network, &sorted, RoutingModel::Steady, false, 30.0).unwrap();

        let loss = network.nodes[0].state.losses;
        assert!(loss > 0.0);
        // the node ledger splits the drawn water: conveyed vs lost
        assert_relative_eq!(network.nodes[0].state.outflow, 5.0 - loss, epsilon = 1e-12);
        assert_relative_eq!(network.links[0].state.new_flow, 5.0 - loss, epsilon = 1e-9);
        assert_relative_eq!(stats.loss_volume, loss * 30.0, epsilon = 1e-9);
        // inflow − outflow − losses closes, so no spurious volume forms
        assert_eq!(network.nodes[0].state.new_volume, 0.0);
        assert_eq!(network.nodes[0].state.overflow, 0.0);
    }

    #[test]
    fn test_storage_updater_converges_to_midpoint_solution() {
        // storage node with a linear rating outlet: O = k·V via an
        // outlet link whose rating is driven by depth over a constant
        // 1000 sq ft plan area, so O = c·d with c = k·1000
        let mut network = Network::new();
        network.add_node(Node::new_storage(
            "ST".into(),
            100.0,
            10.0,
            StorageCurve::Functional {
                coeff: 0.0,
                exponent: 0.0,
                constant: 1000.0,
            },
        ));
        network.add_node(Node::new_outfall("O1".into(), 99.0, OutfallBoundary::Free));
        let outlet = Link {
            id: "REG".into(),
            kind: LinkKind::Outlet(crate::link::OutletProps {
                coeff: 2.0,
                exponent: 1.0,
            }),
            from_node: "ST".into(),
            to_node: "O1".into(),
            offset1: 0.0,
            offset2: 0.0,
            init_flow: 0.0,
            node1: 0,
            node2: 0,
            state: Default::default(),
        };
        network.add_link(outlet);
        network.resolve().unwrap();
        let sorted = init(&mut network, RoutingModel::Steady).unwrap();

        // steady 1 cfs step inflow reaches equilibrium where 2·d = 1
        let dt = 30.0;
        for _ in 0..2000 {
            for node in &mut network.nodes {
                node.state.old_volume = node.state.new_volume;
                node.state.old_depth = node.state.new_depth;
                node.state.inflow = 0.0;
                node.state.outflow = 0.0;
            }
            network.nodes[0].state.inflow = 1.0;
            execute(&mut network, &sorted, RoutingModel::Steady, false, dt).unwrap();
        }
        let d = network.nodes[0].state.new_depth;
        assert_relative_eq!(d, 0.5, epsilon = 0.01);
        assert_relative_eq!(
            network.nodes[0].state.new_volume,
            500.0,
            max_relative = 0.02
        );
    }

    #[test]
    fn test_terminal_storage_gets_updated() {
        // a storage node with no outgoing links exercises the
        // empty-tail update path in the close-out loop
        let mut network = Network::new();
        network.add_node(Node::new_storage(
            "ST".into(),
            104.0,
            10.0,
            StorageCurve::Functional {
                coeff: 0.0,
                exponent: 0.0,
                constant: 500.0,
            },
        ));
        network.add_node(Node::new_junction("J1".into(), 103.0, 8.0));
        network.add_node(Node::new_outfall("O1".into(), 99.0, OutfallBoundary::Free));
        network.add_link(conduit("C1", "J1", "O1", 1.0));
        network.resolve().unwrap();
        let sorted = init(&mut network, RoutingModel::Steady).unwrap();

        network.nodes[0].state.inflow = 2.0;
        execute(&mut network, &sorted, RoutingModel::Steady, false, 60.0).unwrap();

        let st = &network.nodes[0].state;
        assert!(st.updated);
        // all inflow went into storage: V = 0.5·(0 + 2)·60 = 60 cu ft
        assert_relative_eq!(st.new_volume, 60.0, epsilon = 1e-6);
        assert!(st.new_depth > 0.0);
    }
}
