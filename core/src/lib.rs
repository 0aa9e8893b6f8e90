//! Evochora shared domain types.
//!
//! Everything that crosses a component boundary lives here: the molecule
//! encoding, register values, per-tick snapshot payloads, and program
//! artifacts produced by the (external) assembler.

pub mod artifact;
pub mod machine;
pub mod molecule;
pub mod tick_state;

pub use artifact::{ProcedureInfo, ProgramArtifact};
pub use machine::{
    fpr_slot, is_fpr_index, register_name, ProcFrame, RegisterValue, DATA_POINTER_COUNT,
    DATA_REGISTER_COUNT, DR_BASE, FORMAL_PARAM_REGISTER_COUNT, FPR_BASE, LOCATION_REGISTER_COUNT,
    LR_BASE, PROC_REGISTER_COUNT, PR_BASE, REGISTER_COUNT,
};
pub use molecule::{Molecule, MoleculeType};
pub use tick_state::{
    PreparedOrganismState, PreparedTickState, RawCellState, RawOrganismState, RawTickState,
};

/// A world coordinate: one signed component per environment axis.
pub type Coord = Vec<i32>;
