//! Error taxonomy for the simulation engine
//!
//! Fatal conditions are modeled as typed errors and propagate with `?`
//! through the per-step path. Solver convergence failures are not errors:
//! they are counted in the routing state and surfaced in the run summary.
//! Physical events (node overflow, flooding, capacity-limited flow) are
//! ordinary state transitions and never appear here.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Network layout defects detected during validation.
///
/// All of these are fatal: the simulation refuses to start on a network
/// that fails the layout rules for the selected routing model.
#[derive(Error, Debug)]
pub enum TopologyError {
    #[error("node '{0}' has more than one outflow link, which tree routing does not allow")]
    MultipleOutlets(String),

    #[error("divider node '{0}' must have exactly two outflow links, found {1}")]
    DividerOutletCount(String, usize),

    #[error("the network has no outfall node")]
    NoOutfall,

    #[error("outfall node '{0}' must have exactly one connecting link")]
    OutfallLinkCount(String),

    #[error("link '{0}' is a dummy conduit or ideal pump and must be the only outflow of node '{1}'")]
    DummyNotExclusive(String, String),

    #[error("conduit '{0}' has an adverse slope")]
    AdverseSlope(String),

    #[error("link '{0}' references unknown node '{1}'")]
    UnknownNode(String, String),

    #[error("subcatchment '{0}' references unknown outlet '{1}'")]
    UnknownOutlet(String, String),

    #[error("subcatchment '{0}' references unknown rain gage '{1}'")]
    UnknownGage(String, String),

    #[error("the network contains a flow cycle through node '{0}'")]
    FlowCycle(String),
}

/// Hot-start file failures.
#[derive(Error, Debug)]
pub enum HotStartError {
    #[error("cannot open hot-start file {0}: {1}")]
    Open(PathBuf, io::Error),

    #[error("file {0} is not a recognized hot-start file")]
    BadStamp(PathBuf),

    #[error("hot-start file {0} does not match the project ({1})")]
    Incompatible(PathBuf, String),

    #[error("hot-start file {0} is truncated or unreadable: {1}")]
    Read(PathBuf, io::Error),

    #[error("hot-start file {0} contains a non-finite value")]
    NotFinite(PathBuf),

    #[error("cannot write hot-start file {0}: {1}")]
    Write(PathBuf, io::Error),
}

/// Binary results stream failures.
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("cannot open results file {0}: {1}")]
    Open(PathBuf, io::Error),

    #[error("results file write failed: {0}")]
    Write(io::Error),

    #[error("results file read failed: {0}")]
    Read(io::Error),

    #[error("results file is corrupt: {0}")]
    Corrupt(String),

    #[error("reporting period {0} is out of range (file holds {1})")]
    PeriodOutOfRange(usize, usize),

    #[error("results file would exceed the maximum file size")]
    SizeOverflow,
}

/// Top-level engine error.
///
/// Every component on the per-step path returns `Result<_, EngineError>`,
/// so a fatal condition short-circuits the step immediately. Partial
/// state after a failed step is undefined and the run must be restarted.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error("routing time step became non-positive at elapsed time {0:.1} s")]
    NonPositiveStep(f64),

    #[error("ponded-depth integration failed for subcatchment '{0}'")]
    OdeFailure(String),

    #[error(transparent)]
    HotStart(#[from] HotStartError),

    #[error(transparent)]
    Output(#[from] OutputError),

    #[error("cannot read series file {0}: {1}")]
    Series(PathBuf, String),

    #[error(transparent)]
    Io(#[from] io::Error),
}
