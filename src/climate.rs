//! Rain gages and climate series
//!
//! Provides the precipitation and evaporation inputs the runoff engine
//! samples every tick. Series are step functions over elapsed simulation
//! time: a value holds from its time stamp until the next one. The
//! engine also asks when the next change occurs so it can bound the
//! runoff time step.
//!
//! ## CSV format
//!
//! Gage and evaporation series load from CSV with the columns
//! `elapsed_hours` and `value`. Gage values are rainfall intensity in
//! in/hr (optionally with a third `snow` column, also in/hr); evaporation
//! values are in in/day.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Conversion from in/hr to ft/s
const IN_PER_HR_TO_FT_PER_SEC: f64 = 1.0 / 12.0 / 3600.0;

/// Conversion from in/day to ft/s
const IN_PER_DAY_TO_FT_PER_SEC: f64 = 1.0 / 12.0 / 86400.0;

/// A step-function time series over elapsed seconds
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TimeSeries {
    /// (elapsed seconds, value) points in ascending time order
    pub points: Vec<(f64, f64)>,
}

impl TimeSeries {
    /// Build a series from (seconds, value) pairs; pairs are sorted by time
    pub fn new(mut points: Vec<(f64, f64)>) -> Self {
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self { points }
    }

    /// A series holding `value` forever
    pub fn constant(value: f64) -> Self {
        Self {
            points: vec![(0.0, value)],
        }
    }

    /// Value in effect at elapsed time `t` (s)
    pub fn value_at(&self, t: f64) -> f64 {
        let mut value = 0.0;
        for &(ti, vi) in &self.points {
            if ti > t {
                break;
            }
            value = vi;
        }
        value
    }

    /// Elapsed time of the first change strictly after `t`, if any
    pub fn next_change(&self, t: f64) -> Option<f64> {
        self.points.iter().map(|p| p.0).find(|&ti| ti > t)
    }
}

/// A rain gage supplying precipitation to one or more subcatchments
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RainGage {
    /// Unique gage identifier
    pub id: String,

    /// Rainfall intensity series (ft/s internally)
    pub rain: TimeSeries,

    /// Snowfall intensity series (ft/s internally, optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snow: Option<TimeSeries>,
}

impl RainGage {
    /// Rain and snow intensity at elapsed time `t` (ft/s)
    pub fn precip_at(&self, t: f64) -> (f64, f64) {
        let rain = self.rain.value_at(t);
        let snow = self.snow.as_ref().map_or(0.0, |s| s.value_at(t));
        (rain, snow)
    }

    /// Whether any precipitation is falling at elapsed time `t`
    pub fn is_raining(&self, t: f64) -> bool {
        let (rain, snow) = self.precip_at(t);
        rain > 0.0 || snow > 0.0
    }

    /// Elapsed time of the next precipitation change after `t`, if any
    pub fn next_change(&self, t: f64) -> Option<f64> {
        let next_rain = self.rain.next_change(t);
        let next_snow = self.snow.as_ref().and_then(|s| s.next_change(t));
        match (next_rain, next_snow) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Evaporation input for the whole project
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Climate {
    /// Potential evaporation rate series (ft/s internally)
    pub evap: TimeSeries,
}

impl Default for Climate {
    fn default() -> Self {
        Self {
            evap: TimeSeries::constant(0.0),
        }
    }
}

impl Climate {
    /// Evaporation rate at elapsed time `t` (ft/s)
    pub fn evap_rate_at(&self, t: f64) -> f64 {
        self.evap.value_at(t)
    }

    /// Elapsed time of the next evaporation change after `t`, if any
    pub fn next_evap_change(&self, t: f64) -> Option<f64> {
        self.evap.next_change(t)
    }
}

/// CSV record for a gage or evaporation series row
#[derive(Debug, Deserialize)]
struct SeriesCsvRecord {
    /// Hours from simulation start
    elapsed_hours: f64,
    /// Rainfall in in/hr, or evaporation in in/day
    value: f64,
    /// Snowfall in in/hr (gage files only, optional)
    snow: Option<f64>,
}

/// Parse a rain-gage series CSV into a gage.
///
/// Values convert from in/hr to the internal ft/s.
pub fn parse_gage_csv<P: AsRef<Path>>(id: &str, path: P) -> Result<RainGage, EngineError> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| EngineError::Series(path.to_path_buf(), e.to_string()))?;

    let mut rain = Vec::new();
    let mut snow = Vec::new();
    let mut any_snow = false;
    for result in reader.deserialize() {
        let record: SeriesCsvRecord =
            result.map_err(|e| EngineError::Series(path.to_path_buf(), e.to_string()))?;
        let t = record.elapsed_hours * 3600.0;
        rain.push((t, record.value * IN_PER_HR_TO_FT_PER_SEC));
        let s = record.snow.unwrap_or(0.0);
        if s > 0.0 {
            any_snow = true;
        }
        snow.push((t, s * IN_PER_HR_TO_FT_PER_SEC));
    }

    Ok(RainGage {
        id: id.to_string(),
        rain: TimeSeries::new(rain),
        snow: if any_snow {
            Some(TimeSeries::new(snow))
        } else {
            None
        },
    })
}

/// Parse an evaporation series CSV.
///
/// Values convert from in/day to the internal ft/s.
pub fn parse_evap_csv<P: AsRef<Path>>(path: P) -> Result<Climate, EngineError> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| EngineError::Series(path.to_path_buf(), e.to_string()))?;

    let mut points = Vec::new();
    for result in reader.deserialize() {
        let record: SeriesCsvRecord =
            result.map_err(|e| EngineError::Series(path.to_path_buf(), e.to_string()))?;
        points.push((
            record.elapsed_hours * 3600.0,
            record.value * IN_PER_DAY_TO_FT_PER_SEC,
        ));
    }

    Ok(Climate {
        evap: TimeSeries::new(points),
    })
}
