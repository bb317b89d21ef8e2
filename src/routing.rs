//! Routing driver
//!
//! Orchestrates one simulation: the runoff clock and the routing clock
//! advance independently, with runoff ticks producing subcatchment
//! outflows that each routing tick consumes as interpolated lateral
//! inflows. Reporting ticks append one record to the binary results
//! stream.
//!
//! The per-step routing work dispatches on the selected model: the tree
//! models run the sorted link loop in `flowrout`, dynamic-wave hands the
//! whole network to its coupled solver.

use crate::dynwave::DynWave;
use crate::error::EngineError;
use crate::flowrout;
use crate::massbal::{MassBalance, RoutingVolume};
use crate::model::StormwaterModel;
use crate::node::NodeKind;
use crate::output::OutputWriter;
use crate::project::RoutingModel;
use crate::runoff::RunoffEngine;
use log::info;

/// Routing clock and per-run counters
pub struct RoutingEngine {
    /// Selected routing model
    pub routing_model: RoutingModel,
    /// Topologically sorted link order (tree models only)
    pub sorted_links: Vec<usize>,
    /// Elapsed routing time (s)
    pub elapsed: f64,
    /// Routing steps taken
    pub step_count: u64,
    /// Steps on which the dynamic-wave solver left nodes unconverged
    pub non_converging_count: u64,
    /// Running mean of kinematic-wave sub-steps per routing step
    pub kinwave_steps_mean: f64,
    dynwave: Option<DynWave>,
}

impl RoutingEngine {
    /// Validate the network for the selected model and build the
    /// per-run routing state
    pub fn open(model: &mut StormwaterModel) -> Result<Self, EngineError> {
        let routing_model = model.project.options.routing_model;
        let sorted_links = flowrout::init(&mut model.network, routing_model)?;
        let dynwave = if routing_model.is_tree_model() {
            None
        } else {
            Some(DynWave::init(&model.network))
        };
        Ok(Self {
            routing_model,
            sorted_links,
            elapsed: 0.0,
            step_count: 0,
            non_converging_count: 0,
            kinwave_steps_mean: 0.0,
            dynwave,
        })
    }

    /// Routing step for the next tick (s): the fixed user step for the
    /// tree models, a Courant-limited variable step under dynamic-wave
    pub fn routing_step(&self, model: &StormwaterModel) -> f64 {
        let fixed = model.project.options.routing_step;
        match &self.dynwave {
            Some(dw) => dw.routing_step(
                &model.network,
                fixed,
                model.project.options.courant_factor,
            ),
            None => fixed,
        }
    }

    /// Execute one routing tick of `dt` seconds
    pub fn execute(
        &mut self,
        model: &mut StormwaterModel,
        runoff_engine: &mut RunoffEngine,
        dt: f64,
        massbal: &mut MassBalance,
    ) -> Result<(), EngineError> {
        if dt <= 0.0 {
            return Err(EngineError::NonPositiveStep(self.elapsed));
        }

        // shift the network to old state
        for node in &mut model.network.nodes {
            let state = &mut node.state;
            state.old_depth = state.new_depth;
            state.old_volume = state.new_volume;
            state.old_lat_flow = state.new_lat_flow;
            state.new_lat_flow = 0.0;
            state.inflow = 0.0;
            state.outflow = 0.0;
            state.losses = 0.0;
        }
        for link in &mut model.network.links {
            let state = &mut link.state;
            state.old_flow = state.new_flow;
            state.old_depth = state.new_depth;
            state.old_volume = state.new_volume;
            state.setting = state.target_setting;
        }

        // wet-weather lateral inflows, interpolated between runoff ticks
        let weighted = runoff_engine.weighted_outflow(model, self.elapsed);
        for (i, q) in weighted.iter().enumerate() {
            if *q <= 0.0 {
                continue;
            }
            if let crate::subcatch::OutletIndex::Node(n) = model.subcatchments[i].outlet_index {
                let state = &mut model.network.nodes[n].state;
                state.new_lat_flow += q;
                state.inflow += q;
                massbal.update_routing(RoutingVolume::LateralInflow, q * dt);
            }
        }

        // dispatch on the routing model
        match &mut self.dynwave {
            None => {
                let stats = flowrout::execute(
                    &mut model.network,
                    &self.sorted_links,
                    self.routing_model,
                    model.project.options.allow_ponding,
                    dt,
                )?;
                massbal.update_routing(RoutingVolume::Losses, stats.loss_volume);
                // running mean of the per-link sub-step average
                let n = self.step_count as f64;
                self.kinwave_steps_mean =
                    (self.kinwave_steps_mean * n + stats.kinwave_steps) / (n + 1.0);
            }
            Some(dw) => {
                dw.execute(
                    &mut model.network,
                    model.project.options.allow_ponding,
                    dt,
                );
                if dw.non_converged_nodes > 0 {
                    self.non_converging_count += 1;
                }
            }
        }

        // outfall discharge leaves the system, possibly landing back on
        // a subcatchment as runon
        for n in 0..model.network.node_count() {
            let NodeKind::Outfall { ref route_to, .. } = model.network.nodes[n].kind else {
                continue;
            };
            let q = model.network.nodes[n].state.inflow;
            if q <= 0.0 {
                continue;
            }
            massbal.update_routing(RoutingVolume::Outflow, q * dt);
            if let Some(sc_id) = route_to.clone() {
                if let Some(idx) = model.subcatch_index(&sc_id) {
                    runoff_engine.add_outfall_runon(idx, q * dt);
                }
            }
        }

        self.route_quality(model, dt);

        // flooding and stored volume
        let mut stored = 0.0;
        for node in &model.network.nodes {
            if node.state.overflow > 0.0 {
                massbal.update_routing(RoutingVolume::Flooding, node.state.overflow * dt);
            }
            stored += node.state.new_volume;
        }
        for link in &model.network.links {
            stored += link.state.new_volume;
        }
        massbal.routing.final_storage = stored;

        self.elapsed += dt;
        self.step_count += 1;
        Ok(())
    }
    /// Advect pollutant mass through the network behind the flow
    /// solution: washoff loads enter at outlet nodes, nodes mix, links
    /// carry their upstream node's concentration downstream. Storage
    /// nodes mix arriving mass into their stored volume.
    fn route_quality(&self, model: &mut StormwaterModel, dt: f64) {
        let np = model.pollutants.len();
        if np == 0 {
            return;
        }
        let num_nodes = model.network.node_count();

        // lateral mass rates from subcatchment washoff
        let mut mass_in = vec![vec![0.0; np]; num_nodes];
        for sc in &model.subcatchments {
            if let crate::subcatch::OutletIndex::Node(n) = sc.outlet_index {
                for p in 0..np {
                    mass_in[n][p] += sc.state.washoff[p];
                }
            }
        }

        let order: Vec<usize> = if self.sorted_links.is_empty() {
            (0..model.network.link_count()).collect()
        } else {
            self.sorted_links.clone()
        };

        let (nodes, links) = model.network.split_mut();
        let mut resolved = vec![false; num_nodes];
        for &j in &order {
            let n1 = links[j].node1;
            if !resolved[n1] {
                mix_node(&mut nodes[n1], &mass_in[n1], dt);
                resolved[n1] = true;
            }
            let q = links[j].state.new_flow.max(0.0);
            for p in 0..np {
                let c = nodes[n1].state.quality[p];
                links[j].state.quality[p] = c;
                mass_in[links[j].node2][p] += q * c;
            }
        }
        for n in 0..num_nodes {
            if !resolved[n] {
                mix_node(&mut nodes[n], &mass_in[n], dt);
            }
        }
    }
}

/// Complete-mix concentration update for one node
fn mix_node(node: &mut crate::node::Node, mass_in: &[f64], dt: f64) {
    let inflow = node.state.inflow;
    let v_old = node.state.old_volume;
    let v_new = node.state.new_volume;
    for (p, &m) in mass_in.iter().enumerate() {
        node.state.quality[p] = if node.is_storage() && v_new + node.state.outflow * dt > 0.0 {
            (m * dt + node.state.quality[p] * v_old) / (v_new + node.state.outflow * dt)
        } else if inflow > 1.0e-6 {
            m / inflow
        } else {
            0.0
        };
    }
}

/// End-of-run summary
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunSummary {
    /// Routing steps taken
    pub routing_steps: u64,
    /// Steps with unconverged dynamic-wave nodes
    pub non_converging_steps: u64,
    /// Mean kinematic-wave sub-steps per routing step
    pub kinwave_steps_mean: f64,
    /// Reporting periods written to the results stream
    pub periods_written: usize,
    /// Runoff continuity error (fraction)
    pub runoff_error: f64,
    /// Routing continuity error (fraction)
    pub routing_error: f64,
}

/// A complete simulation: model, engines, balances, and output stream
pub struct Simulation {
    /// The model being simulated
    pub model: StormwaterModel,
    /// Runoff clock
    pub runoff: RunoffEngine,
    /// Routing clock
    pub routing: RoutingEngine,
    /// Volume and mass balances
    pub massbal: MassBalance,
    output: Option<OutputWriter>,
    next_report: f64,
}

impl Simulation {
    /// Open a simulation over `model`. The model must not have been
    /// opened yet; this resolves references and initializes all state.
    pub fn new(mut model: StormwaterModel) -> Result<Self, EngineError> {
        model.open()?;
        let routing = RoutingEngine::open(&mut model)?;
        let runoff = RunoffEngine::new(model.subcatchments.len());
        let massbal = MassBalance::new(model.pollutants.len());
        let next_report = model.project.options.report_step;
        Ok(Self {
            model,
            runoff,
            routing,
            massbal,
            output: None,
            next_report,
        })
    }

    /// Attach a binary results stream
    pub fn open_output<P: AsRef<std::path::Path>>(&mut self, path: P) -> Result<(), EngineError> {
        self.output = Some(OutputWriter::open(path, &self.model)?);
        Ok(())
    }

    /// Restore state from a hot-start file
    pub fn load_hotstart<P: AsRef<std::path::Path>>(&mut self, path: P) -> Result<(), EngineError> {
        crate::hotstart::load(path, &mut self.model)?;
        Ok(())
    }

    /// Save current state to a hot-start file
    pub fn save_hotstart<P: AsRef<std::path::Path>>(&self, path: P) -> Result<(), EngineError> {
        crate::hotstart::save(path, &self.model)?;
        Ok(())
    }

    /// Advance the simulation by one routing tick. Returns `false` once
    /// the end of the simulation has been reached.
    pub fn step(&mut self) -> Result<bool, EngineError> {
        let duration = self.model.project.options.duration();
        if self.routing.elapsed >= duration {
            return Ok(false);
        }

        // keep the runoff clock at or ahead of the routing clock
        while self.runoff.elapsed <= self.routing.elapsed && self.runoff.elapsed < duration {
            let dt = self.runoff.time_step(&self.model);
            if dt <= 0.0 {
                return Err(EngineError::NonPositiveStep(self.runoff.elapsed));
            }
            self.runoff
                .execute(&mut self.model, dt, &mut self.massbal)?;
        }

        let dt = self.routing.routing_step(&self.model).min(duration - self.routing.elapsed);
        self.routing
            .execute(&mut self.model, &mut self.runoff, dt, &mut self.massbal)?;

        // reporting ticks append to the results stream
        if let Some(out) = self.output.as_mut() {
            let report_step = self.model.project.options.report_step;
            while self.routing.elapsed >= self.next_report - 1.0e-6 {
                let days = self.next_report / 86400.0;
                out.save_results(&self.model, days)?;
                self.next_report += report_step;
            }
        }

        Ok(self.routing.elapsed < duration)
    }

    /// Run to the end of the simulation and return the summary
    pub fn run(&mut self) -> Result<RunSummary, EngineError> {
        info!(
            "starting simulation '{}' ({:?})",
            self.model.project.name, self.model.project.options.routing_model
        );
        while self.step()? {}
        self.end()
    }

    /// Close the results stream and collect the run summary
    pub fn end(&mut self) -> Result<RunSummary, EngineError> {
        let periods_written = match self.output.take() {
            Some(out) => out.close(0)?,
            None => 0,
        };
        let summary = RunSummary {
            routing_steps: self.routing.step_count,
            non_converging_steps: self.routing.non_converging_count,
            kinwave_steps_mean: self.routing.kinwave_steps_mean,
            periods_written,
            runoff_error: self.massbal.runoff.continuity_error(),
            routing_error: self.massbal.routing.continuity_error(),
        };
        info!(
            "simulation finished: {} routing steps, runoff error {:.2}%, routing error {:.2}%",
            summary.routing_steps,
            summary.runoff_error * 100.0,
            summary.routing_error * 100.0
        );
        Ok(summary)
    }
}
