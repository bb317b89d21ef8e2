//! Node types for drainage networks
//!
//! Nodes represent the point structures of the drainage network:
//! - Junctions: connection points between links
//! - Outfalls: discharge points to receiving waters
//! - Storage units: nodes with a depth-dependent plan area
//! - Dividers: nodes that split inflow between two outlet links
//!
//! Each node carries a serializable description plus the mutable state
//! the routing engine advances every time step.

use serde::{Deserialize, Serialize};

/// A node in the drainage network
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    /// Unique node identifier
    pub id: String,

    /// Node kind with kind-specific properties
    #[serde(flatten)]
    pub kind: NodeKind,

    /// Invert elevation (ft)
    #[serde(rename = "invertElevation")]
    pub invert_elevation: f64,

    /// Maximum depth before the node floods (ft)
    #[serde(rename = "fullDepth")]
    pub full_depth: f64,

    /// Plan area over which flooded volume ponds (sq ft); zero disables ponding
    #[serde(rename = "pondedArea")]
    #[serde(default)]
    pub ponded_area: f64,

    /// Water depth at the start of the simulation (ft)
    #[serde(rename = "initDepth")]
    #[serde(default)]
    pub init_depth: f64,

    /// Mutable routing state, rebuilt at project open
    #[serde(skip)]
    pub state: NodeState,
}

/// Node kind and kind-specific properties
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeKind {
    /// Junction or manhole (link connection point)
    Junction,

    /// Outfall (discharge point)
    Outfall {
        /// Downstream boundary condition
        #[serde(rename = "boundaryCondition")]
        boundary: OutfallBoundary,

        /// Subcatchment that receives this outfall's discharge as runon (optional)
        #[serde(skip_serializing_if = "Option::is_none")]
        #[serde(rename = "routeTo")]
        route_to: Option<String>,
    },

    /// Storage unit with a depth-dependent plan area
    Storage {
        /// Storage geometry
        curve: StorageCurve,
    },

    /// Flow divider splitting inflow between two outlet links
    Divider {
        /// Inflow rate below which all flow stays in the primary outlet (cfs)
        cutoff: f64,

        /// ID of the link receiving flow in excess of the cutoff
        #[serde(rename = "divertedLink")]
        diverted_link: String,
    },
}

/// Downstream boundary condition at an outfall
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum OutfallBoundary {
    /// Free discharge at the connecting link's depth
    Free,
    /// Normal depth in the connecting conduit
    NormalDepth,
    /// Fixed stage elevation (ft)
    FixedStage { stage: f64 },
}

/// Storage-node geometry: plan area as a function of depth
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", tag = "form")]
pub enum StorageCurve {
    /// Area = `coeff`·depth^`exponent` + `constant` (sq ft, depth in ft)
    Functional {
        coeff: f64,
        exponent: f64,
        constant: f64,
    },

    /// Piecewise-linear (depth, area) pairs, depth ascending from zero
    Tabular {
        /// (depth ft, area sq ft) points
        points: Vec<(f64, f64)>,
    },
}

impl StorageCurve {
    /// Plan area at depth `d` (sq ft)
    pub fn area_of_depth(&self, d: f64) -> f64 {
        match self {
            StorageCurve::Functional {
                coeff,
                exponent,
                constant,
            } => {
                if d <= 0.0 {
                    *constant
                } else {
                    coeff * d.powf(*exponent) + constant
                }
            }
            StorageCurve::Tabular { points } => {
                if points.is_empty() {
                    return 0.0;
                }
                if d <= points[0].0 {
                    return points[0].1;
                }
                for pair in points.windows(2) {
                    let (d1, a1) = pair[0];
                    let (d2, a2) = pair[1];
                    if d <= d2 {
                        let f = (d - d1) / (d2 - d1);
                        return a1 + f * (a2 - a1);
                    }
                }
                points[points.len() - 1].1
            }
        }
    }

    /// Stored volume below depth `d` (cu ft)
    pub fn volume_of_depth(&self, d: f64) -> f64 {
        match self {
            StorageCurve::Functional {
                coeff,
                exponent,
                constant,
            } => {
                if d <= 0.0 {
                    return 0.0;
                }
                constant * d + coeff * d.powf(exponent + 1.0) / (exponent + 1.0)
            }
            StorageCurve::Tabular { points } => {
                if points.is_empty() || d <= 0.0 {
                    return 0.0;
                }
                let mut volume = 0.0;
                let mut d_prev = 0.0;
                let mut a_prev = points[0].1;
                for &(d_i, a_i) in points {
                    if d <= d_i {
                        let a_at = self.area_of_depth(d);
                        volume += 0.5 * (a_prev + a_at) * (d - d_prev);
                        return volume;
                    }
                    volume += 0.5 * (a_prev + a_i) * (d_i - d_prev);
                    d_prev = d_i;
                    a_prev = a_i;
                }
                // extrapolate at the last tabulated area
                volume + a_prev * (d - d_prev)
            }
        }
    }

    /// Depth holding volume `v` (ft), found by bisection on the monotone volume curve
    pub fn depth_of_volume(&self, v: f64, d_max: f64) -> f64 {
        if v <= 0.0 {
            return 0.0;
        }
        let v_max = self.volume_of_depth(d_max);
        if v >= v_max {
            return d_max;
        }
        let mut lo = 0.0;
        let mut hi = d_max;
        for _ in 0..60 {
            let mid = 0.5 * (lo + hi);
            if self.volume_of_depth(mid) < v {
                lo = mid;
            } else {
                hi = mid;
            }
            if hi - lo < 1e-6 * d_max.max(1.0) {
                break;
            }
        }
        0.5 * (lo + hi)
    }
}

/// Mutable per-node routing state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeState {
    /// Depth at the previous step (ft)
    pub old_depth: f64,
    /// Depth at the current step (ft)
    pub new_depth: f64,
    /// Volume at the previous step (cu ft)
    pub old_volume: f64,
    /// Volume at the current step (cu ft)
    pub new_volume: f64,
    /// Lateral inflow at the previous step (cfs)
    pub old_lat_flow: f64,
    /// Lateral inflow at the current step (cfs)
    pub new_lat_flow: f64,
    /// Net inflow from the previous step used by midpoint integration (cfs)
    pub old_net_inflow: f64,
    /// Inflow accumulated during the current step (cfs)
    pub inflow: f64,
    /// Outflow accumulated during the current step (cfs)
    pub outflow: f64,
    /// Evaporation and seepage losses during the current step (cfs)
    pub losses: f64,
    /// Flooding overflow rate (cfs), always non-negative
    pub overflow: f64,
    /// Visit marker: true once the node's state has been closed out this step
    pub updated: bool,
    /// Hydraulic residence time, storage nodes only (s)
    pub hrt: f64,
    /// Per-pollutant concentration (mass per cu ft)
    pub quality: Vec<f64>,
}

impl Node {
    /// Create a new junction node
    pub fn new_junction(id: String, invert_elevation: f64, full_depth: f64) -> Self {
        Self {
            id,
            kind: NodeKind::Junction,
            invert_elevation,
            full_depth,
            ponded_area: 0.0,
            init_depth: 0.0,
            state: NodeState::default(),
        }
    }

    /// Create a new outfall node
    pub fn new_outfall(id: String, invert_elevation: f64, boundary: OutfallBoundary) -> Self {
        Self {
            id,
            kind: NodeKind::Outfall {
                boundary,
                route_to: None,
            },
            invert_elevation,
            full_depth: 0.0,
            ponded_area: 0.0,
            init_depth: 0.0,
            state: NodeState::default(),
        }
    }

    /// Create a new storage node
    pub fn new_storage(
        id: String,
        invert_elevation: f64,
        full_depth: f64,
        curve: StorageCurve,
    ) -> Self {
        Self {
            id,
            kind: NodeKind::Storage { curve },
            invert_elevation,
            full_depth,
            ponded_area: 0.0,
            init_depth: 0.0,
            state: NodeState::default(),
        }
    }

    /// Check if the node is a junction
    pub fn is_junction(&self) -> bool {
        matches!(self.kind, NodeKind::Junction)
    }

    /// Check if the node is an outfall
    pub fn is_outfall(&self) -> bool {
        matches!(self.kind, NodeKind::Outfall { .. })
    }

    /// Check if the node is a storage unit
    pub fn is_storage(&self) -> bool {
        matches!(self.kind, NodeKind::Storage { .. })
    }

    /// Check if the node is a flow divider
    pub fn is_divider(&self) -> bool {
        matches!(self.kind, NodeKind::Divider { .. })
    }

    /// Stored volume at depth `d` (cu ft)
    ///
    /// Junctions, dividers, and outfalls have no plan area of their own;
    /// their stored volume is zero at any depth.
    pub fn volume_of_depth(&self, d: f64) -> f64 {
        match &self.kind {
            NodeKind::Storage { curve } => curve.volume_of_depth(d),
            _ => 0.0,
        }
    }

    /// Volume held when the node is exactly full (cu ft)
    pub fn full_volume(&self) -> f64 {
        self.volume_of_depth(self.full_depth)
    }

    /// Depth corresponding to stored volume `v` (ft)
    ///
    /// For non-storage nodes any volume is transient; when ponding is in
    /// effect the volume spreads over the ponded area, otherwise the
    /// depth contribution is zero.
    pub fn depth_of_volume(&self, v: f64) -> f64 {
        match &self.kind {
            NodeKind::Storage { curve } => {
                let v_full = self.full_volume();
                if v > v_full && self.ponded_area > 0.0 {
                    self.full_depth + (v - v_full) / self.ponded_area
                } else {
                    curve.depth_of_volume(v, self.full_depth)
                }
            }
            _ => {
                if self.ponded_area > 0.0 {
                    (v / self.ponded_area).min(self.full_depth)
                } else {
                    0.0
                }
            }
        }
    }

    /// Free surface area at depth `d` (sq ft), used by the dynamic-wave solver
    pub fn surface_area_of_depth(&self, d: f64) -> f64 {
        match &self.kind {
            NodeKind::Storage { curve } => curve.area_of_depth(d),
            _ => {
                if d >= self.full_depth && self.ponded_area > 0.0 {
                    self.ponded_area
                } else {
                    crate::dynwave::MIN_SURF_AREA
                }
            }
        }
    }

    /// Crown elevation: invert plus full depth (ft)
    pub fn crown_elevation(&self) -> f64 {
        self.invert_elevation + self.full_depth
    }
}
