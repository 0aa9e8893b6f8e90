//! Shared helpers for engine tests: tiny assembled programs over a 2-D world.

use crate::{Environment, InstructionSet, Opcode, Simulation};
use evochora_core::{Coord, Molecule, MoleculeType, ProgramArtifact};
use std::sync::Arc;

pub fn simulation(shape: &[u32], toroidal: bool, seed: u64) -> Simulation {
    let env = Environment::new(shape, toroidal);
    let iset = Arc::new(InstructionSet::new(shape.len()));
    Simulation::new(env, iset, vec![], seed)
}

pub fn op(iset: &InstructionSet, opcode: Opcode) -> i32 {
    iset.encode(opcode).raw()
}

pub fn data(value: i32) -> i32 {
    Molecule::new(MoleculeType::Data, value).raw()
}

pub fn energy(value: i32) -> i32 {
    Molecule::new(MoleculeType::Energy, value).raw()
}

/// Lay `cells` left to right along the x axis starting at the origin.
pub fn row_layout(cells: &[i32]) -> Vec<(Coord, i32)> {
    cells
        .iter()
        .enumerate()
        .map(|(x, &cell)| (vec![x as i32, 0], cell))
        .collect()
}

pub fn artifact(program_id: &str, layout: Vec<(Coord, i32)>) -> Arc<ProgramArtifact> {
    Arc::new(ProgramArtifact::with_layout(program_id, layout))
}
