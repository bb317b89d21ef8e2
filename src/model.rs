//! Root model aggregate
//!
//! The top-level structure holding everything a simulation needs:
//! project options, the drainage network, subcatchments, climate inputs,
//! and the pollutant and land-use tables. Loadable from JSON; the
//! cross-reference indices and runtime state are rebuilt by
//! [`StormwaterModel::open`].

use crate::climate::{Climate, RainGage};
use crate::error::{EngineError, TopologyError};
use crate::network::Network;
use crate::project::Project;
use crate::quality::{LandUse, Pollutant};
use crate::subcatch::{Outlet, OutletIndex, Subcatchment};
use serde::{Deserialize, Serialize};

/// A complete storm-water model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StormwaterModel {
    /// Schema version (semantic versioning)
    pub version: String,

    /// Project metadata and simulation options
    pub project: Project,

    /// Network topology (nodes and links)
    pub network: Network,

    /// Subcatchments draining into the network
    #[serde(default)]
    pub subcatchments: Vec<Subcatchment>,

    /// Rain gages feeding the subcatchments
    #[serde(default)]
    pub gages: Vec<RainGage>,

    /// Evaporation input
    #[serde(default)]
    pub climate: Climate,

    /// Pollutants carried by runoff
    #[serde(default)]
    pub pollutants: Vec<Pollutant>,

    /// Land uses contributing buildup and washoff
    #[serde(rename = "landUses")]
    #[serde(default)]
    pub land_uses: Vec<LandUse>,
}

impl StormwaterModel {
    /// Load a model from a JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize the model to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Resolve all cross references and initialize runtime state.
    ///
    /// Must be called once before simulation; safe to call again to
    /// reset a model to its start-of-run state.
    pub fn open(&mut self) -> Result<(), EngineError> {
        self.network.resolve()?;

        let num_pollutants = self.pollutants.len();
        let num_land_uses = self.land_uses.len();

        for i in 0..self.subcatchments.len() {
            let (id, gage, outlet) = {
                let sc = &self.subcatchments[i];
                (sc.id.clone(), sc.gage.clone(), sc.outlet.clone())
            };

            let gage_index = self
                .gages
                .iter()
                .position(|g| g.id == gage)
                .ok_or_else(|| TopologyError::UnknownGage(id.clone(), gage.clone()))?;

            let outlet_index = match &outlet {
                Outlet::Node(node_id) => OutletIndex::Node(
                    self.network
                        .node_index(node_id)
                        .ok_or_else(|| TopologyError::UnknownOutlet(id.clone(), node_id.clone()))?,
                ),
                Outlet::Subcatchment(sc_id) => OutletIndex::Subcatchment(
                    self.subcatchments
                        .iter()
                        .position(|s| &s.id == sc_id)
                        .ok_or_else(|| TopologyError::UnknownOutlet(id.clone(), sc_id.clone()))?,
                ),
            };

            let sc = &mut self.subcatchments[i];
            sc.gage_index = gage_index;
            sc.outlet_index = outlet_index;
            sc.init_state(num_pollutants, num_land_uses);
        }

        for node in &mut self.network.nodes {
            node.state.quality = vec![0.0; num_pollutants];
        }
        for link in &mut self.network.links {
            link.state.quality = vec![0.0; num_pollutants];
        }
        Ok(())
    }

    /// Index of the subcatchment with the given ID
    pub fn subcatch_index(&self, id: &str) -> Option<usize> {
        self.subcatchments.iter().position(|s| s.id == id)
    }
}
