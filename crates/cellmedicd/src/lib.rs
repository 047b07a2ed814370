//! Cellmedic daemon support: simulated fleet and shutdown reporting.

pub mod report;
pub mod simulation;

pub use report::{AttemptSummary, EngineReport, FaultSummary};
pub use simulation::SimulatedFleet;
