//! # Stormflow
//!
//! A storm-water runoff and hydraulic flow routing engine. The library
//! propagates water and pollutant mass from rainfall inputs, across
//! pervious and impervious subcatchment surfaces, into a drainage
//! network of nodes and links, and out through outfalls.
//!
//! ## Overview
//!
//! The library is organized into several modules:
//!
//! - [`project`] - Project metadata, units, and simulation options
//! - [`model`] - The root model aggregate loadable from JSON
//! - [`network`] - Network topology (nodes and links)
//! - [`node`] - Node kinds (junctions, outfalls, storage, dividers)
//! - [`link`] - Link kinds (conduits, pumps, orifices, weirs, outlets)
//! - [`xsect`] - Conduit cross-section geometry
//! - [`subcatch`] - Subcatchments, sub-areas, and surface runoff
//! - [`runoff`] - The runoff clock and per-tick driver
//! - [`infil`] - Infiltration models
//! - [`climate`] - Rain gages and evaporation series
//! - [`quality`] - Pollutants, buildup, and washoff
//! - [`routing`] - The routing driver and whole-run simulation
//! - [`flowrout`] - Steady and kinematic-wave tree routing
//! - [`kinwave`] - The kinematic-wave link solver
//! - [`dynwave`] - The dynamic-wave network solver
//! - [`toposort`] - Topological link ordering
//! - [`massbal`] - Continuity accounting
//! - [`output`] - The binary results stream
//! - [`hotstart`] - Saved-state files
//! - [`odesolve`] - Adaptive ODE integration
//! - [`error`] - The error taxonomy
//!
//! ## Example
//!
//! ```no_run
//! use stormflow::model::StormwaterModel;
//! use stormflow::routing::Simulation;
//! use std::fs;
//!
//! let json = fs::read_to_string("model.json").unwrap();
//! let model = StormwaterModel::from_json(&json).unwrap();
//!
//! let mut sim = Simulation::new(model).unwrap();
//! sim.open_output("results.out").unwrap();
//! let summary = sim.run().unwrap();
//! println!("routing error: {:.2}%", summary.routing_error * 100.0);
//! ```

pub mod climate;
pub mod dynwave;
pub mod error;
pub mod flowrout;
pub mod hotstart;
pub mod infil;
pub mod kinwave;
pub mod link;
pub mod massbal;
pub mod model;
pub mod network;
pub mod node;
pub mod odesolve;
pub mod output;
pub mod project;
pub mod quality;
pub mod routing;
pub mod runoff;
pub mod subcatch;
pub mod toposort;
pub mod xsect;

pub use error::EngineError;
pub use model::StormwaterModel;
pub use routing::{RunSummary, Simulation};
