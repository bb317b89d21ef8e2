//! Project metadata, unit definitions, and simulation options

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Project metadata and settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    /// Project name
    pub name: String,

    /// Project description (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Unit system for the project
    pub units: Units,

    /// Simulation options
    pub options: SimOptions,

    /// Project author (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    /// Creation timestamp (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
}

/// Unit system definitions
///
/// All internal computation is carried out in US customary units
/// (feet, seconds, cfs). The unit system selects how external inputs
/// are interpreted and how results are labeled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Units {
    /// Overall unit system (US customary or SI metric)
    pub system: UnitSystem,

    /// Flow rate units (optional, inferred from system if not specified)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow: Option<FlowUnit>,
}

/// Unit system (US customary or SI metric)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UnitSystem {
    /// US customary units (feet, inches, cfs, acres)
    US,
    /// SI metric units (meters, millimeters, cms, hectares)
    SI,
}

/// Flow rate units
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FlowUnit {
    /// Cubic feet per second
    #[serde(rename = "cfs")]
    Cfs,
    /// Gallons per minute
    #[serde(rename = "gpm")]
    Gpm,
    /// Million gallons per day
    #[serde(rename = "mgd")]
    Mgd,
    /// Cubic meters per second
    #[serde(rename = "cms")]
    Cms,
    /// Liters per second
    #[serde(rename = "lps")]
    Lps,
}

impl FlowUnit {
    /// Numeric code stored in binary interface files
    pub fn code(self) -> i32 {
        match self {
            FlowUnit::Cfs => 0,
            FlowUnit::Gpm => 1,
            FlowUnit::Mgd => 2,
            FlowUnit::Cms => 3,
            FlowUnit::Lps => 4,
        }
    }

    /// Recover a flow unit from its binary interface code
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(FlowUnit::Cfs),
            1 => Some(FlowUnit::Gpm),
            2 => Some(FlowUnit::Mgd),
            3 => Some(FlowUnit::Cms),
            4 => Some(FlowUnit::Lps),
            _ => None,
        }
    }
}

/// Flow routing model selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingModel {
    /// Instantaneous capacity-limited pass-through
    Steady,
    /// Kinematic-wave routing over a tree-shaped network
    KinematicWave,
    /// Dynamic-wave routing over a general network
    DynamicWave,
}

impl RoutingModel {
    /// Whether this model requires the tree-layout restrictions
    pub fn is_tree_model(self) -> bool {
        !matches!(self, RoutingModel::DynamicWave)
    }
}

/// Simulation control options
///
/// Time steps are in seconds. The runoff clock uses the wet step while
/// any surface is actively wet and the dry step otherwise; the routing
/// clock uses the routing step (an upper bound under dynamic-wave).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimOptions {
    /// Flow routing model
    #[serde(rename = "routingModel")]
    pub routing_model: RoutingModel,

    /// Simulation start date/time
    #[serde(rename = "startDate")]
    pub start_date: NaiveDateTime,

    /// Simulation end date/time
    #[serde(rename = "endDate")]
    pub end_date: NaiveDateTime,

    /// Runoff time step during wet weather (s)
    #[serde(rename = "wetStep")]
    pub wet_step: f64,

    /// Runoff time step during dry weather (s)
    #[serde(rename = "dryStep")]
    pub dry_step: f64,

    /// Flow routing time step (s); an upper bound under dynamic-wave
    #[serde(rename = "routingStep")]
    pub routing_step: f64,

    /// Reporting interval (s)
    #[serde(rename = "reportStep")]
    pub report_step: f64,

    /// Whether flooded nodes may pond excess volume above ground
    #[serde(rename = "allowPonding")]
    pub allow_ponding: bool,

    /// Courant safety factor for variable dynamic-wave steps
    #[serde(rename = "courantFactor")]
    #[serde(default = "default_courant_factor")]
    pub courant_factor: f64,

    /// Street-sweeping season as (start, end) day-of-year (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "sweepSeason")]
    pub sweep_season: Option<(u32, u32)>,
}

fn default_courant_factor() -> f64 {
    0.75
}

impl SimOptions {
    /// Total simulation duration (s)
    pub fn duration(&self) -> f64 {
        (self.end_date - self.start_date).num_milliseconds() as f64 / 1000.0
    }

    /// Whether `day` (day-of-year) falls inside the sweeping season
    pub fn in_sweep_season(&self, day: u32) -> bool {
        match self.sweep_season {
            Some((start, end)) if start <= end => day >= start && day <= end,
            // season wrapping the new year
            Some((start, end)) => day >= start || day <= end,
            None => false,
        }
    }
}

impl Units {
    /// Create a US customary unit system with standard units
    pub fn us_customary() -> Self {
        Self {
            system: UnitSystem::US,
            flow: Some(FlowUnit::Cfs),
        }
    }

    /// Create an SI metric unit system with standard units
    pub fn si_metric() -> Self {
        Self {
            system: UnitSystem::SI,
            flow: Some(FlowUnit::Cms),
        }
    }

    /// Effective flow unit, defaulting from the system
    pub fn flow_unit(&self) -> FlowUnit {
        self.flow.unwrap_or(match self.system {
            UnitSystem::US => FlowUnit::Cfs,
            UnitSystem::SI => FlowUnit::Cms,
        })
    }
}
