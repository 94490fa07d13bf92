//! Simulated sensor driving the engine end to end.

mod runner;
mod scene;
mod stats;

pub use runner::{Simulation, SimulationConfig};
pub use scene::Scene;
pub use stats::SimulationStats;
