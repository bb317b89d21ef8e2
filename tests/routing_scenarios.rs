//! End-to-end routing scenarios
//!
//! Each test builds a small model programmatically, runs it through the
//! public simulation API (or the tree-routing entry points directly for
//! the link-level scenarios), and checks the hydraulics against
//! hand-computed values.

use approx::assert_relative_eq;
use chrono::NaiveDate;
use stormflow::climate::{Climate, RainGage, TimeSeries};
use stormflow::flowrout;
use stormflow::infil::{HortonInfil, InfilModel};
use stormflow::link::{ConduitProps, Link, LinkKind, OutletProps};
use stormflow::model::StormwaterModel;
use stormflow::network::Network;
use stormflow::node::{Node, OutfallBoundary, StorageCurve};
use stormflow::project::{Project, RoutingModel, SimOptions, Units};
use stormflow::routing::Simulation;
use stormflow::subcatch::{Outlet, RouteTarget, Subcatchment};
use stormflow::xsect::XsectShape;

fn options(routing_model: RoutingModel, hours: u32) -> SimOptions {
    SimOptions {
        routing_model,
        start_date: NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap(),
        end_date: NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(hours, 0, 0)
            .unwrap(),
        wet_step: 60.0,
        dry_step: 3600.0,
        routing_step: 30.0,
        report_step: 900.0,
        allow_ponding: false,
        courant_factor: 0.75,
        sweep_season: None,
    }
}

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

fn impervious_acre(id: &str, outlet: &str) -> Subcatchment {
    Subcatchment {
        id: id.to_string(),
        area: 1.0,
        width: 500.0,
        slope: 0.01,
        frac_imperv: 1.0,
        n_imperv: 0.015,
        n_perv: 0.24,
        dstore_imperv: 0.05,
        dstore_perv: 0.1,
        pct_zero_storage: 0.0,
        gage: "G1".to_string(),
        outlet: Outlet::Node(outlet.to_string()),
        route_to: RouteTarget::Outlet,
        pct_routed: 1.0,
        infiltration: InfilModel::Horton(HortonInfil::new(3.0, 0.5, 4.0, 0.0)),
        lid_area_frac: 0.0,
        land_uses: Vec::new(),
        gage_index: 0,
        outlet_index: Default::default(),
        subareas: Default::default(),
        state: Default::default(),
    }
}

/// One-hour 1 in/hr storm over one gage
fn storm_gage() -> RainGage {
    RainGage {
        id: "G1".to_string(),
        rain: TimeSeries::new(vec![(0.0, 1.0 / 12.0 / 3600.0), (3600.0, 0.0)]),
        snow: None,
    }
}

/// Scenario: a single impervious acre under 1 in/hr for an hour drains
/// through one conduit. Steady-state runoff approaches 1.008 cfs and the
/// storm total (one acre-inch = 3630 cu ft) leaves the outfall minus
/// what stayed in depression storage.
#[test]
fn single_impervious_acre_storm() {
    let mut network = Network::new();
    network.add_node(Node::new_junction("J1".to_string(), 104.0, 8.0));
    network.add_node(Node::new_outfall(
        "O1".to_string(),
        100.0,
        OutfallBoundary::Free,
    ));
    network.add_link(conduit("C1", "J1", "O1", 2.0));

    let model = StormwaterModel {
        version: "1.0.0".to_string(),
        project: Project {
            name: "Single Acre".to_string(),
            description: None,
            units: Units::us_customary(),
            options: options(RoutingModel::KinematicWave, 2),
            author: None,
            created: None,
        },
        network,
        subcatchments: vec![impervious_acre("S1", "J1")],
        gages: vec![storm_gage()],
        climate: Climate::default(),
        pollutants: Vec::new(),
        land_uses: Vec::new(),
    };

    let mut sim = Simulation::new(model).unwrap();
    let mut peak_runoff: f64 = 0.0;
    while sim.step().unwrap() {
        peak_runoff = peak_runoff.max(sim.model.subcatchments[0].state.new_runoff);
    }
    let summary = sim.end().unwrap();

    // 1 in/hr over 1 acre = 1.008 cfs at equilibrium
    assert_relative_eq!(peak_runoff, 1.008, max_relative = 0.02);

    // one acre-inch fell; depression storage held back ~0.05 in
    let acre_inch = 43560.0 / 12.0;
    let dstore = 0.05 / 12.0 * 43560.0;
    let outflow = sim.massbal.routing.outflow;
    assert!(
        outflow > acre_inch - dstore - 250.0 && outflow < acre_inch,
        "outfall volume = {outflow}"
    );
    assert!(summary.runoff_error.abs() < 0.01);
    assert!(summary.routing_error.abs() < 0.01);
}

/// Scenario: two nodes and one conduit under the steady model with 5 cfs
/// of inflow against a ~20 cfs capacity. Flow passes through unchanged
/// and the inlet area matches the section-factor inversion.
#[test]
fn steady_flow_below_capacity() {
    let mut network = Network::new();
    network.add_node(Node::new_junction("J1".to_string(), 104.0, 8.0));
    network.add_node(Node::new_outfall(
        "O1".to_string(),
        100.0,
        OutfallBoundary::Free,
    ));
    network.add_link(conduit("C1", "J1", "O1", 2.0));
    network.resolve().unwrap();
    let sorted = flowrout::init(&mut network, RoutingModel::Steady).unwrap();

    network.nodes[0].state.inflow = 5.0;
    network.nodes[0].state.new_lat_flow = 5.0;
    flowrout::execute(&mut network, &sorted, RoutingModel::Steady, false, 30.0).unwrap();

    let link = &network.links[0];
    assert_relative_eq!(link.state.new_flow, 5.0, epsilon = 1e-9);
    assert_relative_eq!(network.nodes[1].state.inflow, 5.0, epsilon = 1e-9);

    let props = link.conduit().unwrap();
    let expected_area = props.xsect.area_of_section_factor(5.0 / props.beta);
    assert_relative_eq!(link.state.a1, expected_area, epsilon = 1e-6);
}

/// Scenario: the same network with 20 cfs of inflow against a ~10 cfs
/// capacity (1.5 ft pipe). Inflow clamps to the full-flow capacity, the
/// inlet runs full, and the surplus shows up as overflow upstream.
#[test]
fn steady_flow_clamped_to_capacity() {
    let mut network = Network::new();
    network.add_node(Node::new_junction("J1".to_string(), 104.0, 8.0));
    network.add_node(Node::new_outfall(
        "O1".to_string(),
        100.0,
        OutfallBoundary::Free,
    ));
    network.add_link(conduit("C1", "J1", "O1", 1.5));
    network.resolve().unwrap();
    let sorted = flowrout::init(&mut network, RoutingModel::Steady).unwrap();
    let q_full = network.links[0].conduit().unwrap().q_full;
    assert!(q_full < 20.0);

    // run several steps so the midpoint integration settles
    for _ in 0..20 {
        for node in &mut network.nodes {
            node.state.old_volume = node.state.new_volume;
            node.state.inflow = 0.0;
            node.state.outflow = 0.0;
        }
        network.nodes[0].state.inflow = 20.0;
        network.nodes[0].state.new_lat_flow = 20.0;
        flowrout::execute(&mut network, &sorted, RoutingModel::Steady, false, 30.0).unwrap();
    }

    let link = &network.links[0];
    assert_relative_eq!(link.state.new_flow, q_full, epsilon = 1e-9);
    assert_relative_eq!(
        link.state.a1,
        link.conduit().unwrap().xsect.a_full(),
        epsilon = 1e-9
    );
    assert!(link.state.capacity_limited);
    // surplus accumulates as overflow at the upstream junction
    assert_relative_eq!(
        network.nodes[0].state.overflow,
        20.0 - q_full,
        max_relative = 0.01
    );
}

/// Scenario: a storage node with a linear rating (outflow = 2·depth over
/// a 1000 sq ft constant plan area, so O = 0.002·V) under a sudden 1 cfs
/// step inflow. The damped fixed-point updater settles at V = 1/k.
#[test]
fn storage_with_linear_rating_reaches_equilibrium() {
    let mut network = Network::new();
    network.add_node(Node::new_storage(
        "ST".to_string(),
        100.0,
        10.0,
        StorageCurve::Functional {
            coeff: 0.0,
            exponent: 0.0,
            constant: 1000.0,
        },
    ));
    network.add_node(Node::new_outfall(
        "O1".to_string(),
        99.0,
        OutfallBoundary::Free,
    ));
    network.add_link(Link {
        id: "REG".to_string(),
        kind: LinkKind::Outlet(OutletProps {
            coeff: 2.0,
            exponent: 1.0,
        }),
        from_node: "ST".to_string(),
        to_node: "O1".to_string(),
        offset1: 0.0,
        offset2: 0.0,
        init_flow: 0.0,
        node1: 0,
        node2: 0,
        state: Default::default(),
    });
    network.resolve().unwrap();
    let sorted = flowrout::init(&mut network, RoutingModel::Steady).unwrap();

    for _ in 0..3000 {
        for node in &mut network.nodes {
            node.state.old_volume = node.state.new_volume;
            node.state.old_depth = node.state.new_depth;
            node.state.inflow = 0.0;
            node.state.outflow = 0.0;
        }
        network.nodes[0].state.inflow = 1.0;
        flowrout::execute(&mut network, &sorted, RoutingModel::Steady, false, 30.0).unwrap();
    }

    // O = 0.002·V cfs, so V = 1/0.002 = 500 cu ft at steady state
    assert_relative_eq!(network.nodes[0].state.new_volume, 500.0, max_relative = 0.02);
    assert_relative_eq!(network.nodes[0].state.new_depth, 0.5, epsilon = 0.01);
    assert_relative_eq!(network.links[0].state.new_flow, 1.0, max_relative = 0.02);
}

/// Boundary: a subcatchment with Manning n = 0 spills everything above
/// its depression storage within one tick.
#[test]
fn zero_manning_n_spills_instantly() {
    let mut network = Network::new();
    network.add_node(Node::new_junction("J1".to_string(), 104.0, 8.0));
    network.add_node(Node::new_outfall(
        "O1".to_string(),
        100.0,
        OutfallBoundary::Free,
    ));
    network.add_link(conduit("C1", "J1", "O1", 2.0));

    let mut subcatch = impervious_acre("S1", "J1");
    subcatch.n_imperv = 0.0;

    let model = StormwaterModel {
        version: "1.0.0".to_string(),
        project: Project {
            name: "Zero n".to_string(),
            description: None,
            units: Units::us_customary(),
            options: options(RoutingModel::KinematicWave, 2),
            author: None,
            created: None,
        },
        network,
        subcatchments: vec![subcatch],
        gages: vec![storm_gage()],
        climate: Climate::default(),
        pollutants: Vec::new(),
        land_uses: Vec::new(),
    };

    let mut sim = Simulation::new(model).unwrap();
    let mut saw_runoff = false;
    while sim.step().unwrap() {
        let sc = &sim.model.subcatchments[0];
        if sc.state.new_runoff > 0.0 {
            saw_runoff = true;
            // with no conveyance the depth clamps back to the
            // depression storage every tick
            let dstore = sc.subareas[1].dstore;
            assert!(sc.subareas[1].depth <= dstore + 1e-9);
        }
    }
    assert!(saw_runoff);
    // the spill rate equals the rain rate once the depression is full
    assert!(sim.massbal.runoff.continuity_error().abs() < 0.01);
}

/// Boundary: a divider splits flow above its cutoff onto the diverted
/// link under tree routing.
#[test]
fn divider_splits_flow_at_cutoff() {
    let mut network = Network::new();
    network.add_node(Node {
        id: "DV".to_string(),
        kind: stormflow::node::NodeKind::Divider {
            cutoff: 3.0,
            diverted_link: "C2".to_string(),
        },
        invert_elevation: 106.0,
        full_depth: 6.0,
        ponded_area: 0.0,
        init_depth: 0.0,
        state: Default::default(),
    });
    network.add_node(Node::new_outfall(
        "O1".to_string(),
        100.0,
        OutfallBoundary::Free,
    ));
    network.add_node(Node::new_outfall(
        "O2".to_string(),
        100.0,
        OutfallBoundary::Free,
    ));
    network.add_link(conduit("C1", "DV", "O1", 2.0));
    network.add_link(conduit("C2", "DV", "O2", 2.0));
    network.resolve().unwrap();
    let sorted = flowrout::init(&mut network, RoutingModel::Steady).unwrap();

    network.nodes[0].state.inflow = 5.0;
    flowrout::execute(&mut network, &sorted, RoutingModel::Steady, false, 30.0).unwrap();

    let c1 = network.find_link("C1").unwrap();
    let c2 = network.find_link("C2").unwrap();
    assert_relative_eq!(c1.state.new_flow, 3.0, epsilon = 1e-9);
    assert_relative_eq!(c2.state.new_flow, 2.0, epsilon = 1e-9);
}

/// The dynamic-wave model routes the same storm as the tree models and
/// closes its balance.
#[test]
fn dynamic_wave_runs_the_storm() {
    let mut network = Network::new();
    network.add_node(Node::new_junction("J1".to_string(), 104.0, 8.0));
    network.add_node(Node::new_junction("J2".to_string(), 102.0, 8.0));
    network.add_node(Node::new_outfall(
        "O1".to_string(),
        100.0,
        OutfallBoundary::Free,
    ));
    network.add_link(conduit("C1", "J1", "J2", 2.0));
    network.add_link(conduit("C2", "J2", "O1", 2.0));

    let model = StormwaterModel {
        version: "1.0.0".to_string(),
        project: Project {
            name: "Dynamic Wave Storm".to_string(),
            description: None,
            units: Units::us_customary(),
            options: options(RoutingModel::DynamicWave, 3),
            author: None,
            created: None,
        },
        network,
        subcatchments: vec![impervious_acre("S1", "J1")],
        gages: vec![storm_gage()],
        climate: Climate::default(),
        pollutants: Vec::new(),
        land_uses: Vec::new(),
    };

    let mut sim = Simulation::new(model).unwrap();
    let summary = sim.run().unwrap();
    assert!(summary.routing_steps > 0);
    // most of the acre-inch makes it out of the outfall
    assert!(sim.massbal.routing.outflow > 2500.0);
}
