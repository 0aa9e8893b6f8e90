//! Evochora simulation engine.
//!
//! Advances an N-dimensional molecular world one deterministic tick at a
//! time. Each tick runs three phases over the live organisms in ascending id
//! order: **Plan** (pure decoding of one instruction per organism into a
//! planned action), **Resolve** (cell-write conflicts decided by lowest
//! organism id), and **Execute** (committing the surviving actions, spawning
//! forks, excising the dead). The post-execution state is deep-copied into a
//! [`evochora_core::RawTickState`] and published to the tick queue.

pub mod energy;
pub mod environment;
pub mod isa;
mod organism;
mod plan;
pub mod service;
mod simulation;
mod snapshot;

pub use energy::{build_strategies, EnergyDistribution};
pub use environment::Environment;
pub use isa::{InstructionDescriptor, InstructionSet, Opcode, OperandKind};
pub use organism::Organism;
pub use service::{SimulationController, SimulationService};
pub use simulation::Simulation;

use thiserror::Error;

/// Fatal engine failures. Per-organism instruction failures are *not*
/// errors; they are recorded on the organism and the tick continues.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Startup input is unusable (bad placement, unknown strategy).
    #[error("engine setup error: {0}")]
    Setup(String),
    /// An internal invariant does not hold; the tick loop must stop.
    #[error("engine invariant breached: {0}")]
    Invariant(String),
}

/// The engine result type.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests;
