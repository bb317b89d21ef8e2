//! Dynamic-wave network solver
//!
//! Solves the full network simultaneously: link flows respond to the
//! head difference between their end nodes, node heads respond to the
//! flow imbalance over their free surface area. Each step runs a fixed
//! number of trials of explicit link-flow updates followed by
//! under-relaxed node-head updates, stopping early once every node's
//! head change falls inside the tolerance.
//!
//! Nodes that fail to converge within the trial limit are counted, not
//! failed: the step keeps the last iterate and the run continues.

use crate::link::{Link, LinkKind, PumpCurve};
use crate::network::Network;
use crate::node::{Node, NodeKind, OutfallBoundary};
use crate::xsect::GRAVITY;
use log::debug;

/// Free surface area assigned to junctions, which store no volume of
/// their own (sq ft)
pub const MIN_SURF_AREA: f64 = 12.566;

/// Maximum head/flow trials per step
const MAX_TRIALS: usize = 8;

/// Node head convergence tolerance (ft)
const HEAD_TOL: f64 = 0.005;

/// Under-relaxation for node-head updates
const OMEGA: f64 = 0.5;

/// Smallest allowed variable time step (s)
const MIN_STEP: f64 = 0.5;

/// Manning friction constant `1.49²`
const PHI2: f64 = 2.2201;

/// Dynamic-wave solver state
pub struct DynWave {
    /// Crown elevation per node: the highest connected conduit soffit
    crown_elev: Vec<f64>,
    /// Incoming link indices per node
    in_links: Vec<Vec<usize>>,
    /// Outgoing link indices per node
    out_links: Vec<Vec<usize>>,
    /// Nodes that failed to converge in the latest step
    pub non_converged_nodes: usize,
}

impl DynWave {
    /// Allocate solver state: crown elevations and per-node adjacency
    pub fn init(network: &Network) -> Self {
        let n = network.node_count();
        let mut crown_elev: Vec<f64> = network
            .nodes
            .iter()
            .map(|node| node.invert_elevation)
            .collect();
        let mut in_links = vec![Vec::new(); n];
        let mut out_links = vec![Vec::new(); n];

        for (j, link) in network.links.iter().enumerate() {
            out_links[link.node1].push(j);
            in_links[link.node2].push(j);
            if let Some(props) = link.conduit() {
                let soffit1 =
                    network.nodes[link.node1].invert_elevation + link.offset1 + props.xsect.y_full();
                let soffit2 =
                    network.nodes[link.node2].invert_elevation + link.offset2 + props.xsect.y_full();
                crown_elev[link.node1] = crown_elev[link.node1].max(soffit1);
                crown_elev[link.node2] = crown_elev[link.node2].max(soffit2);
            }
        }
        Self {
            crown_elev,
            in_links,
            out_links,
            non_converged_nodes: 0,
        }
    }

    /// Courant-limited routing step, bounded above by `fixed_step`
    pub fn routing_step(&self, network: &Network, fixed_step: f64, courant_factor: f64) -> f64 {
        let mut dt = fixed_step;
        for link in &network.links {
            let Some(props) = link.conduit() else {
                continue;
            };
            let a = 0.5 * (link.state.a1 + link.state.a2);
            if a <= 0.0 || props.length <= 0.0 {
                continue;
            }
            let y = props.xsect.depth_of_area(a);
            if y <= 0.0 {
                continue;
            }
            let v = (link.state.new_flow / props.barrels.max(1) as f64 / a).abs();
            let celerity = v + (GRAVITY * y).sqrt();
            if celerity > 0.0 {
                dt = dt.min(courant_factor * props.length / celerity);
            }
        }
        dt.max(MIN_STEP)
    }

    /// One coupled network solve over `dt` seconds. Returns the number
    /// of trials used.
    ///
    /// The caller must have shifted new state to old state and loaded
    /// lateral inflows into `new_lat_flow`.
    pub fn execute(&mut self, network: &mut Network, allow_ponding: bool, dt: f64) -> usize {
        let num_nodes = network.node_count();
        let mut converged = vec![false; num_nodes];
        let mut trials = 0;

        while trials < MAX_TRIALS {
            trials += 1;

            // explicit link-flow pass against the current trial heads
            for j in 0..network.links.len() {
                let q = self.trial_link_flow(network, j, dt);
                network.links[j].state.new_flow = q;
            }

            // implicit node-head pass
            let mut all_converged = true;
            for n in 0..num_nodes {
                let node = &network.nodes[n];
                if node.is_outfall() {
                    continue;
                }

                let mut net = node.state.new_lat_flow;
                for &j in &self.in_links[n] {
                    net += network.links[j].state.new_flow;
                }
                for &j in &self.out_links[n] {
                    net -= network.links[j].state.new_flow;
                }

                // half of each adjacent conduit's water surface belongs
                // to this node's free surface
                let mut conduit_area = 0.0;
                for &j in self.in_links[n].iter().chain(&self.out_links[n]) {
                    let link = &network.links[j];
                    if let Some(props) = link.conduit() {
                        let y = link.state.new_depth.max(0.05 * props.xsect.y_full());
                        conduit_area += 0.5
                            * props.xsect.width_of_depth(y)
                            * props.length
                            * props.barrels.max(1) as f64;
                    }
                }

                let node = &mut network.nodes[n];
                let d_prev = node.state.new_depth;
                let area =
                    (node.surface_area_of_depth(d_prev) + conduit_area).max(MIN_SURF_AREA);
                let mut d_new = node.state.old_depth + net * dt / area;
                d_new = d_new.max(0.0);

                // surcharge handling
                node.state.overflow = 0.0;
                if d_new > node.full_depth {
                    if allow_ponding && node.ponded_area > 0.0 {
                        // excess volume ponds above the node
                        let excess = (d_new - node.full_depth) * area;
                        d_new = node.full_depth + excess / node.ponded_area;
                    } else {
                        node.state.overflow = ((d_new - node.full_depth) * area / dt).max(0.0);
                        d_new = node.full_depth;
                    }
                }

                let d_relaxed = (1.0 - OMEGA) * d_prev + OMEGA * d_new;
                node.state.new_depth = d_relaxed;
                converged[n] = (d_relaxed - d_prev).abs() <= HEAD_TOL;
                if !converged[n] {
                    all_converged = false;
                }
            }

            self.set_outfall_depths(network);
            if all_converged {
                break;
            }
        }

        self.non_converged_nodes = converged
            .iter()
            .zip(&network.nodes)
            .filter(|(c, node)| !**c && !node.is_outfall())
            .count();
        if self.non_converged_nodes > 0 {
            debug!(
                "dynamic-wave step left {} node(s) unconverged after {} trials",
                self.non_converged_nodes, trials
            );
        }

        self.close_out(network);
        trials
    }

    /// Trial flow for link `j` against the current heads
    fn trial_link_flow(&self, network: &Network, j: usize, dt: f64) -> f64 {
        let link = &network.links[j];
        let n1 = &network.nodes[link.node1];
        let n2 = &network.nodes[link.node2];
        let h1 = n1.invert_elevation + n1.state.new_depth;
        let h2 = n2.invert_elevation + n2.state.new_depth;

        match &link.kind {
            LinkKind::Conduit(props) => {
                if props.xsect.a_full() <= 0.0 {
                    // dummy conduit: convey the upstream lateral inflow
                    return n1.state.new_lat_flow.max(0.0);
                }
                let z1 = n1.invert_elevation + link.offset1;
                let z2 = n2.invert_elevation + link.offset2;
                let y_full = props.xsect.y_full();
                let y1 = (h1 - z1).clamp(0.0, y_full);
                let y2 = (h2 - z2).clamp(0.0, y_full);
                let y = 0.5 * (y1 + y2);
                if y <= 1.0e-4 {
                    return 0.0;
                }
                let a = props.xsect.area_of_depth(y);
                let r = props.xsect.radius_of_depth(y);
                let barrels = props.barrels.max(1) as f64;
                let q_old = link.state.new_flow / barrels;
                let v = q_old / a;

                // momentum with Manning friction, solved semi-implicitly
                let dq_grav = dt * GRAVITY * a * (h1 - h2) / props.length;
                let denom =
                    1.0 + dt * GRAVITY * props.roughness.powi(2) * v.abs() / (PHI2 * r.powf(4.0 / 3.0));
                let q = (q_old + dq_grav) / denom;
                q * barrels * link.state.setting
            }
            LinkKind::Pump(props) => match props.curve {
                PumpCurve::Ideal => n1.state.new_lat_flow.max(0.0),
                PumpCurve::Rated { capacity } => {
                    if n1.state.new_depth > props.shutoff_depth {
                        capacity * link.state.setting
                    } else {
                        0.0
                    }
                }
            },
            _ => {
                // regulators flow on the head above crest, reduced to the
                // differential head when the downstream side submerges
                let crest = n1.invert_elevation + link.offset1;
                let head = if h2 > crest {
                    h1 - h2
                } else {
                    h1 - crest
                };
                link.regulator_flow(head)
            }
        }
    }

    /// Outfall depths follow their boundary condition
    fn set_outfall_depths(&self, network: &mut Network) {
        for n in 0..network.node_count() {
            let NodeKind::Outfall { boundary, .. } = network.nodes[n].kind else {
                continue;
            };
            let depth = match boundary {
                OutfallBoundary::FixedStage { stage } => {
                    (stage - network.nodes[n].invert_elevation).max(0.0)
                }
                _ => {
                    // free/normal boundary: water surface of the
                    // connecting conduit end
                    let mut y = 0.0;
                    for &j in self.in_links[n].iter().chain(&self.out_links[n]) {
                        let link = &network.links[j];
                        if let Some(props) = link.conduit() {
                            let a = 0.5 * (link.state.a1 + link.state.a2);
                            y = props.xsect.depth_of_area(a.max(0.0));
                        }
                    }
                    y
                }
            };
            network.nodes[n].state.new_depth = depth;
        }
    }

    /// Write volumes, accumulators, and conduit areas after the trials
    fn close_out(&self, network: &mut Network) {
        // conduit end areas and depths from the settled heads
        for j in 0..network.links.len() {
            let link = &network.links[j];
            let Some(props) = link.conduit() else {
                continue;
            };
            let n1 = &network.nodes[link.node1];
            let n2 = &network.nodes[link.node2];
            let y_full = props.xsect.y_full();
            let y1 = (n1.state.new_depth - link.offset1).clamp(0.0, y_full);
            let y2 = (n2.state.new_depth - link.offset2).clamp(0.0, y_full);
            let a1 = props.xsect.area_of_depth(y1);
            let a2 = props.xsect.area_of_depth(y2);
            let barrels = props.barrels.max(1) as f64;
            let length = props.length;

            let state = &mut network.links[j].state;
            state.a1 = a1;
            state.a2 = a2;
            state.q1 = state.new_flow / barrels;
            state.q2 = state.q1;
            state.new_depth = 0.5 * (y1 + y2);
            state.new_volume = 0.5 * (a1 + a2) * length * barrels;
            state.full_state = match (y1 >= y_full, y2 >= y_full) {
                (true, true) => crate::link::FullState::AllFull,
                (true, false) => crate::link::FullState::UpFull,
                (false, true) => crate::link::FullState::DnFull,
                _ => crate::link::FullState::NotFull,
            };
            state.capacity_limited = matches!(state.full_state, crate::link::FullState::AllFull);
        }

        // node accumulators and volumes
        for n in 0..network.node_count() {
            let mut inflow = network.nodes[n].state.new_lat_flow.max(0.0);
            let mut outflow = 0.0;
            for &j in &self.in_links[n] {
                let q = network.links[j].state.new_flow;
                if q >= 0.0 {
                    inflow += q;
                } else {
                    outflow -= q;
                }
            }
            for &j in &self.out_links[n] {
                let q = network.links[j].state.new_flow;
                if q >= 0.0 {
                    outflow += q;
                } else {
                    inflow -= q;
                }
            }
            let node = &mut network.nodes[n];
            node.state.inflow = inflow;
            node.state.outflow = outflow;
            let d = node.state.new_depth;
            node.state.new_volume = match &node.kind {
                NodeKind::Storage { curve } => curve.volume_of_depth(d.min(node.full_depth)),
                _ => 0.0,
            } + if d > node.full_depth {
                (d - node.full_depth) * node.ponded_area
            } else {
                0.0
            };
            node.state.old_net_inflow = inflow - outflow - node.state.losses;
            node.state.updated = true;
        }
    }
}
