//! Pollutants, buildup, and washoff
//!
//! The routing core consumes surface quality through two operations:
//! buildup accretion during dry weather and a washoff rate while runoff
//! is underway. The chemistry itself lives in the land-use functions
//! below; the engine treats them as black boxes.

use serde::{Deserialize, Serialize};

/// A pollutant tracked through runoff and routing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pollutant {
    /// Unique pollutant identifier
    pub id: String,

    /// Concentration units label (e.g. "mg/L")
    pub units: String,

    /// Concentration in rainfall (mass per cu ft of rain)
    #[serde(rename = "rainQuality")]
    #[serde(default)]
    pub rain_quality: f64,
}

/// Dry-weather buildup function for one pollutant on one land use
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "form", rename_all = "kebab-case")]
pub enum BuildupFunc {
    /// No buildup
    None,

    /// `B = min(max, coeff·t^exponent)` with `t` in days
    Power { coeff: f64, exponent: f64, max: f64 },

    /// `B = max·(1 − e^(−coeff·t))` with `t` in days
    Exponential { coeff: f64, max: f64 },
}

impl BuildupFunc {
    /// Days of accumulation that would explain the current buildup `b`
    fn age_of(&self, b: f64) -> f64 {
        match *self {
            BuildupFunc::None => 0.0,
            BuildupFunc::Power {
                coeff,
                exponent,
                max,
            } => {
                if coeff <= 0.0 || b >= max {
                    return f64::MAX;
                }
                (b / coeff).powf(1.0 / exponent.max(1e-6))
            }
            BuildupFunc::Exponential { coeff, max } => {
                if coeff <= 0.0 || b >= max {
                    return f64::MAX;
                }
                -(1.0 - b / max).ln() / coeff
            }
        }
    }

    /// Buildup after `days` more days of accumulation on top of `current`
    pub fn accrete(&self, current: f64, days: f64) -> f64 {
        match *self {
            BuildupFunc::None => current,
            BuildupFunc::Power {
                coeff,
                exponent,
                max,
            } => {
                let age = self.age_of(current);
                if age == f64::MAX {
                    return current;
                }
                (coeff * (age + days).powf(exponent)).min(max)
            }
            BuildupFunc::Exponential { coeff, max } => {
                let age = self.age_of(current);
                if age == f64::MAX {
                    return current;
                }
                max * (1.0 - (-coeff * (age + days)).exp())
            }
        }
    }
}

/// Washoff function for one pollutant on one land use
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "form", rename_all = "kebab-case")]
pub enum WashoffFunc {
    /// No washoff
    None,

    /// `rate = coeff·q^exponent·B` where `q` is runoff (in/hr) and `B`
    /// the available buildup; rate is in buildup mass per second
    Exponential { coeff: f64, exponent: f64 },

    /// Event mean concentration: `rate = emc·Q` with `Q` the runoff
    /// volume rate; independent of buildup
    Emc { emc: f64 },
}

impl WashoffFunc {
    /// Washoff rate in buildup-mass units per second.
    ///
    /// `runoff` is the areal runoff rate (ft/s), `flow` the volumetric
    /// runoff (cfs), and `buildup` the mass currently available.
    pub fn rate(&self, runoff: f64, flow: f64, buildup: f64) -> f64 {
        match *self {
            WashoffFunc::None => 0.0,
            WashoffFunc::Exponential { coeff, exponent } => {
                if runoff <= 0.0 || buildup <= 0.0 {
                    return 0.0;
                }
                // exponential washoff is calibrated against in/hr runoff
                let q = runoff * 12.0 * 3600.0;
                coeff / 3600.0 * q.powf(exponent) * buildup
            }
            WashoffFunc::Emc { emc } => emc * flow.max(0.0),
        }
    }
}

/// A land use with per-pollutant buildup/washoff behavior
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LandUse {
    /// Unique land use identifier
    pub id: String,

    /// Buildup function per pollutant, in pollutant order
    pub buildup: Vec<BuildupFunc>,

    /// Washoff function per pollutant, in pollutant order
    pub washoff: Vec<WashoffFunc>,

    /// Fraction of buildup removed by one street-sweeping pass
    #[serde(rename = "sweepRemoval")]
    #[serde(default)]
    pub sweep_removal: f64,
}

impl LandUse {
    /// Apply one sweeping pass to the current buildup
    pub fn sweep(&self, buildup: f64) -> f64 {
        buildup * (1.0 - self.sweep_removal.clamp(0.0, 1.0))
    }
}
