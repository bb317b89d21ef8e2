//! Link types for drainage networks
//!
//! Links convey flow between nodes:
//! - Conduits: pipes and channels with a cross section and Manning roughness
//! - Pumps: ideal or rated lift stations
//! - Orifices, weirs, outlets: flow regulators
//!
//! The positive flow direction is node1 → node2. A conduit laid against
//! its topographic grade is flipped at initialization and remembered
//! through `state.direction`.

use crate::xsect::XsectShape;
use serde::{Deserialize, Serialize};

/// Constant in Manning's equation (US customary)
pub const MANNING_PHI: f64 = 1.49;

/// A link in the drainage network
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Link {
    /// Unique link identifier
    pub id: String,

    /// Link kind with kind-specific properties
    #[serde(flatten)]
    pub kind: LinkKind,

    /// Upstream node ID
    #[serde(rename = "fromNode")]
    pub from_node: String,

    /// Downstream node ID
    #[serde(rename = "toNode")]
    pub to_node: String,

    /// Height of the upstream end above the upstream node invert (ft)
    #[serde(rename = "upstreamOffset")]
    #[serde(default)]
    pub offset1: f64,

    /// Height of the downstream end above the downstream node invert (ft)
    #[serde(rename = "downstreamOffset")]
    #[serde(default)]
    pub offset2: f64,

    /// Flow at the start of the simulation (cfs)
    #[serde(rename = "initFlow")]
    #[serde(default)]
    pub init_flow: f64,

    /// Resolved index of the upstream node, set at project open
    #[serde(skip)]
    pub node1: usize,

    /// Resolved index of the downstream node, set at project open
    #[serde(skip)]
    pub node2: usize,

    /// Mutable routing state, rebuilt at project open
    #[serde(skip)]
    pub state: LinkState,
}

/// Link kind and kind-specific properties
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LinkKind {
    /// Pipe or channel governed by Manning's equation
    Conduit(ConduitProps),

    /// Lift station
    Pump(PumpProps),

    /// Submerged or free orifice
    Orifice(OrificeProps),

    /// Transverse or side weir
    Weir(WeirProps),

    /// Rating-curve outlet
    Outlet(OutletProps),
}

/// Conduit properties
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConduitProps {
    /// Cross-section geometry
    pub xsect: XsectShape,

    /// Conduit length (ft)
    pub length: f64,

    /// Manning roughness coefficient
    pub roughness: f64,

    /// Number of identical parallel barrels
    #[serde(default = "default_barrels")]
    pub barrels: u32,

    /// Evaporation loss rate per unit surface area (ft/s, optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "evapRate")]
    pub evap_rate: Option<f64>,

    /// Seepage loss rate per unit bottom area (ft/s, optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "seepageRate")]
    pub seepage_rate: Option<f64>,

    /// Bottom slope, derived from end inverts at project open
    #[serde(skip)]
    pub slope: f64,

    /// Manning conveyance factor `1.49·√S/n`, derived at project open
    #[serde(skip)]
    pub beta: f64,

    /// Full-flow capacity per barrel (cfs), derived at project open
    #[serde(skip)]
    pub q_full: f64,
}

fn default_barrels() -> u32 {
    1
}

/// Pump properties
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PumpProps {
    /// Pump behavior
    pub curve: PumpCurve,

    /// Node depth at which the pump switches on (ft)
    #[serde(rename = "startupDepth")]
    #[serde(default)]
    pub startup_depth: f64,

    /// Node depth at which the pump switches off (ft)
    #[serde(rename = "shutoffDepth")]
    #[serde(default)]
    pub shutoff_depth: f64,
}

/// Pump behavior curve
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", tag = "form")]
pub enum PumpCurve {
    /// Conveys whatever inflow arrives; must be its node's only outlet
    Ideal,
    /// Constant rated discharge (cfs)
    Rated { capacity: f64 },
}

/// Orifice properties
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrificeProps {
    /// Opening cross section
    pub xsect: XsectShape,

    /// Discharge coefficient
    #[serde(rename = "dischargeCoeff")]
    pub discharge_coeff: f64,
}

/// Weir properties
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeirProps {
    /// Crest length (ft)
    #[serde(rename = "crestLength")]
    pub crest_length: f64,

    /// Discharge coefficient
    #[serde(rename = "dischargeCoeff")]
    pub discharge_coeff: f64,

    /// Head exponent (1.5 for a rectangular weir)
    #[serde(default = "default_weir_exponent")]
    pub exponent: f64,
}

fn default_weir_exponent() -> f64 {
    1.5
}

/// Rating-curve outlet properties: `Q = coeff · head^exponent`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutletProps {
    /// Rating coefficient
    pub coeff: f64,

    /// Rating exponent
    pub exponent: f64,
}

/// Conduit fullness state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FullState {
    /// Free surface flow along the whole barrel
    #[default]
    NotFull,
    /// Upstream end submerged
    UpFull,
    /// Downstream end submerged
    DnFull,
    /// Flowing full along the whole barrel
    AllFull,
}

/// Mutable per-link routing state
#[derive(Debug, Clone, PartialEq)]
pub struct LinkState {
    /// Flow at the previous step (cfs)
    pub old_flow: f64,
    /// Flow at the current step (cfs)
    pub new_flow: f64,
    /// Mean depth at the previous step (ft)
    pub old_depth: f64,
    /// Mean depth at the current step (ft)
    pub new_depth: f64,
    /// Stored volume at the previous step (cu ft)
    pub old_volume: f64,
    /// Stored volume at the current step (cu ft)
    pub new_volume: f64,
    /// Flow area at the upstream end (sq ft)
    pub a1: f64,
    /// Flow area at the downstream end (sq ft)
    pub a2: f64,
    /// Flow at the upstream end (cfs)
    pub q1: f64,
    /// Flow at the downstream end (cfs)
    pub q2: f64,
    /// Control setting in [0, 1]
    pub setting: f64,
    /// Setting requested by control logic, applied at the next step
    pub target_setting: f64,
    /// +1 normally, −1 when the link was flipped to run downhill
    pub direction: i8,
    /// Conduit fullness state
    pub full_state: FullState,
    /// True while inflow is being clamped to the full-flow capacity
    pub capacity_limited: bool,
    /// Per-pollutant concentration (mass per cu ft)
    pub quality: Vec<f64>,
}

impl Default for LinkState {
    fn default() -> Self {
        Self {
            old_flow: 0.0,
            new_flow: 0.0,
            old_depth: 0.0,
            new_depth: 0.0,
            old_volume: 0.0,
            new_volume: 0.0,
            a1: 0.0,
            a2: 0.0,
            q1: 0.0,
            q2: 0.0,
            setting: 1.0,
            target_setting: 1.0,
            direction: 1,
            full_state: FullState::NotFull,
            capacity_limited: false,
            quality: Vec::new(),
        }
    }
}

impl Link {
    /// Create a conduit link
    pub fn new_conduit(
        id: String,
        from_node: String,
        to_node: String,
        props: ConduitProps,
    ) -> Self {
        Self {
            id,
            kind: LinkKind::Conduit(props),
            from_node,
            to_node,
            offset1: 0.0,
            offset2: 0.0,
            init_flow: 0.0,
            node1: 0,
            node2: 0,
            state: LinkState::default(),
        }
    }

    /// Check if the link is a conduit
    pub fn is_conduit(&self) -> bool {
        matches!(self.kind, LinkKind::Conduit(_))
    }

    /// Check if the link is a pump
    pub fn is_pump(&self) -> bool {
        matches!(self.kind, LinkKind::Pump(_))
    }

    /// Check if the link conveys flow without hydraulics: a dummy conduit
    /// or an ideal pump. Such links must be the sole outlet of their
    /// upstream node.
    pub fn is_ideal(&self) -> bool {
        match &self.kind {
            LinkKind::Conduit(props) => matches!(props.xsect, XsectShape::Dummy),
            LinkKind::Pump(props) => matches!(props.curve, PumpCurve::Ideal),
            _ => false,
        }
    }

    /// Conduit properties, if this link is a conduit
    pub fn conduit(&self) -> Option<&ConduitProps> {
        match &self.kind {
            LinkKind::Conduit(props) => Some(props),
            _ => None,
        }
    }

    /// Mutable conduit properties, if this link is a conduit
    pub fn conduit_mut(&mut self) -> Option<&mut ConduitProps> {
        match &mut self.kind {
            LinkKind::Conduit(props) => Some(props),
            _ => None,
        }
    }

    /// Derive conduit slope, conveyance factor, and full-flow capacity
    /// from the end invert elevations `z1` (upstream) and `z2`
    /// (downstream). Returns the computed slope.
    pub fn compute_conduit_params(&mut self, z1: f64, z2: f64) -> f64 {
        let props = match &mut self.kind {
            LinkKind::Conduit(props) => props,
            _ => return 0.0,
        };
        let slope = if props.length > 0.0 {
            (z1 - z2) / props.length
        } else {
            0.0
        };
        props.slope = slope;
        if slope > 0.0 && props.roughness > 0.0 {
            props.beta = MANNING_PHI * slope.sqrt() / props.roughness;
            props.q_full = props.beta * props.xsect.s_full();
        } else {
            props.beta = 0.0;
            props.q_full = 0.0;
        }
        slope
    }

    /// Flip the link so that node1 is the topographically higher end.
    /// Records the reversal through `state.direction`.
    pub fn reverse(&mut self) {
        std::mem::swap(&mut self.from_node, &mut self.to_node);
        std::mem::swap(&mut self.node1, &mut self.node2);
        std::mem::swap(&mut self.offset1, &mut self.offset2);
        self.state.direction = -self.state.direction;
    }

    /// Normal flow through the conduit at wetted area `a` per barrel (cfs)
    pub fn normal_flow_of_area(&self, a: f64) -> f64 {
        match &self.kind {
            LinkKind::Conduit(props) => {
                let y = props.xsect.depth_of_area(a);
                props.beta * props.xsect.section_factor_of_depth(y)
            }
            _ => 0.0,
        }
    }

    /// Discharge of a regulator link under driving head `head` (ft),
    /// scaled by the current control setting. Conduits and pumps return
    /// zero; their flow comes from the routing solvers.
    pub fn regulator_flow(&self, head: f64) -> f64 {
        if head <= 0.0 {
            return 0.0;
        }
        let q = match &self.kind {
            LinkKind::Orifice(props) => {
                let a = props.xsect.a_full();
                props.discharge_coeff * a * (2.0 * crate::xsect::GRAVITY * head).sqrt()
            }
            LinkKind::Weir(props) => {
                props.discharge_coeff * props.crest_length * head.powf(props.exponent)
            }
            LinkKind::Outlet(props) => props.coeff * head.powf(props.exponent),
            _ => 0.0,
        };
        q * self.state.setting
    }
}
