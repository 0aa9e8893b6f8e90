//! The pure raw-to-prepared transformation.
//!
//! Combines one [`RawTickState`] with the program artifacts and the
//! instruction set: registers and stacks become display strings, the
//! molecule at each organism's IP is disassembled, and call-stack frames
//! are resolved through their FPR-to-DR binding maps into lines that use
//! the procedure's declared parameter names.

use evochora_core::{
    fpr_slot, register_name, Coord, Molecule, PreparedOrganismState, PreparedTickState,
    ProgramArtifact, RawOrganismState, RawTickState, RegisterValue,
};
use evochora_engine::{InstructionSet, OperandKind};
use std::collections::HashMap;
use std::sync::Arc;

/// Renders raw ticks into their prepared form. Stateless and shareable
/// across transformation workers.
pub struct TickTransformer {
    iset: Arc<InstructionSet>,
    artifacts: HashMap<String, Arc<ProgramArtifact>>,
    shape: Vec<i32>,
    toroidal: bool,
}

impl TickTransformer {
    /// Build a transformer for the world geometry the run was configured
    /// with; disassembly walks operand molecules with the same wrap rule
    /// the engine used.
    pub fn new(
        iset: Arc<InstructionSet>,
        artifacts: HashMap<String, Arc<ProgramArtifact>>,
        shape: &[u32],
        toroidal: bool,
    ) -> TickTransformer {
        TickTransformer {
            iset,
            artifacts,
            shape: shape.iter().map(|&d| d as i32).collect(),
            toroidal,
        }
    }

    /// Transform one tick.
    pub fn transform(&self, raw: &RawTickState) -> PreparedTickState {
        let world = SparseWorld {
            shape: &self.shape,
            toroidal: self.toroidal,
            cells: raw
                .cells
                .iter()
                .map(|cell| (cell.pos.clone(), cell.molecule))
                .collect(),
        };
        PreparedTickState {
            tick_number: raw.tick_number,
            organisms: raw
                .organisms
                .iter()
                .map(|organism| self.transform_organism(organism, &world))
                .collect(),
            cells: raw.cells.clone(),
        }
    }

    fn transform_organism(
        &self,
        organism: &RawOrganismState,
        world: &SparseWorld<'_>,
    ) -> PreparedOrganismState {
        let artifact = self.artifacts.get(&organism.program_id);
        PreparedOrganismState {
            id: organism.id,
            parent_id: organism.parent_id,
            birth_tick: organism.birth_tick,
            program_id: organism.program_id.clone(),
            ip: organism.ip.clone(),
            dv: organism.dv.clone(),
            dps: organism.dps.clone(),
            active_dp_index: organism.active_dp_index,
            er: organism.er,
            drs: render_bank(&organism.drs),
            prs: render_bank(&organism.prs),
            fprs: render_bank(&organism.fprs),
            lrs: render_bank(&organism.lrs),
            data_stack: render_bank(&organism.data_stack),
            location_stack: organism.location_stack.iter().map(|c| render_coord(c)).collect(),
            call_stack: organism
                .call_stack
                .iter()
                .map(|frame| self.render_frame(organism, frame, artifact))
                .collect(),
            next_instruction: self.disassemble(organism, world, artifact),
            is_dead: organism.is_dead,
            instruction_failed: organism.instruction_failed,
            failure_reason: organism.failure_reason.clone(),
        }
    }

    /// One display line per frame:
    /// `MY_PROC WITH REG1[%DR0]=DATA:3, REG2[%DR1]=DATA:6`.
    fn render_frame(
        &self,
        organism: &RawOrganismState,
        frame: &evochora_core::ProcFrame,
        artifact: Option<&Arc<ProgramArtifact>>,
    ) -> String {
        let params = artifact
            .map(|a| a.params_of(&frame.proc_name))
            .unwrap_or(&[]);
        let mut args = Vec::new();
        for (slot, param) in params.iter().enumerate() {
            if let Some(Some(dr)) = frame.fpr_bindings.get(slot) {
                let value = organism
                    .drs
                    .get(*dr)
                    .map(render_value)
                    .unwrap_or_else(|| "?".to_string());
                args.push(format!("{}[%DR{}]={}", param, dr, value));
            }
        }
        if args.is_empty() {
            frame.proc_name.clone()
        } else {
            format!("{} WITH {}", frame.proc_name, args.join(", "))
        }
    }

    /// Disassemble the molecule at the organism's IP.
    ///
    /// Register operands in the FPR range are substituted with the binding
    /// from the topmost call frame, yielding `NAME[%DRk]` instead of the
    /// internal slot name.
    fn disassemble(
        &self,
        organism: &RawOrganismState,
        world: &SparseWorld<'_>,
        artifact: Option<&Arc<ProgramArtifact>>,
    ) -> String {
        let molecule = match world.get(&organism.ip) {
            Some(molecule) => molecule,
            None => return "<out of bounds>".to_string(),
        };
        let descriptor = match self.iset.decode(molecule) {
            Some(descriptor) => descriptor,
            None => return molecule.to_string(),
        };

        let mut parts = vec![descriptor.mnemonic.to_string()];
        let mut offset = 1i32;
        let mut argc = 0i32;
        for &kind in descriptor.operands {
            match self.render_operand(organism, world, kind, &mut offset, artifact) {
                Some(rendered) => {
                    if descriptor.variadic && kind == OperandKind::Literal {
                        argc = rendered.1;
                    }
                    parts.push(rendered.0);
                }
                None => return parts.join(" "),
            }
        }
        if descriptor.variadic {
            for _ in 0..argc.clamp(0, evochora_core::FORMAL_PARAM_REGISTER_COUNT as i32) {
                match world.step(&organism.ip, &organism.dv, offset) {
                    Some(pos) => {
                        offset += 1;
                        let value = world.get(&pos).map(|m| m.value()).unwrap_or(0);
                        parts.push(format!("%DR{}", value));
                    }
                    None => break,
                }
            }
        }
        parts.join(" ")
    }

    /// Render one operand; the i32 carries the literal's scalar for argc.
    fn render_operand(
        &self,
        organism: &RawOrganismState,
        world: &SparseWorld<'_>,
        kind: OperandKind,
        offset: &mut i32,
        artifact: Option<&Arc<ProgramArtifact>>,
    ) -> Option<(String, i32)> {
        match kind {
            OperandKind::Register => {
                let molecule = self.read(world, organism, offset)?;
                let index = molecule.value().max(0) as usize;
                Some((self.render_register(organism, index, artifact), 0))
            }
            OperandKind::Literal => {
                let molecule = self.read(world, organism, offset)?;
                Some((molecule.to_string(), molecule.value()))
            }
            OperandKind::Vector => {
                let mut components = Vec::with_capacity(self.shape.len());
                for _ in 0..self.shape.len() {
                    components.push(self.read(world, organism, offset)?.value());
                }
                Some((render_coord(&components), 0))
            }
        }
    }

    fn render_register(
        &self,
        organism: &RawOrganismState,
        index: usize,
        artifact: Option<&Arc<ProgramArtifact>>,
    ) -> String {
        if let Some(slot) = fpr_slot(index) {
            if let Some(frame) = organism.call_stack.last() {
                if let Some(Some(dr)) = frame.fpr_bindings.get(slot) {
                    let params = artifact
                        .map(|a| a.params_of(&frame.proc_name))
                        .unwrap_or(&[]);
                    if let Some(param) = params.get(slot) {
                        return format!("{}[%DR{}]", param, dr);
                    }
                    return format!("%DR{}", dr);
                }
            }
        }
        register_name(index)
    }

    fn read(
        &self,
        world: &SparseWorld<'_>,
        organism: &RawOrganismState,
        offset: &mut i32,
    ) -> Option<Molecule> {
        let pos = world.step(&organism.ip, &organism.dv, *offset)?;
        *offset += 1;
        // absent cells are empty space
        Some(world.get(&pos).unwrap_or(Molecule::EMPTY))
    }
}

fn render_bank(values: &[RegisterValue]) -> Vec<String> {
    values.iter().map(render_value).collect()
}

/// `DATA:7` for scalars, `[1,0]` for vectors.
pub fn render_value(value: &RegisterValue) -> String {
    match value {
        RegisterValue::Scalar(raw) => Molecule::from_raw(*raw).to_string(),
        RegisterValue::Vector(components) => render_coord(components),
    }
}

fn render_coord(components: &[i32]) -> String {
    let rendered: Vec<String> = components.iter().map(|c| c.to_string()).collect();
    format!("[{}]", rendered.join(","))
}

/// A tick's cells as a sparse lookup with the world's wrap rule.
struct SparseWorld<'a> {
    shape: &'a [i32],
    toroidal: bool,
    cells: HashMap<Coord, i32>,
}

impl<'a> SparseWorld<'a> {
    fn get(&self, coord: &[i32]) -> Option<Molecule> {
        let normalized = self.normalize(coord)?;
        Some(
            self.cells
                .get(&normalized)
                .map(|&raw| Molecule::from_raw(raw))
                .unwrap_or(Molecule::EMPTY),
        )
    }

    fn step(&self, start: &[i32], dv: &[i32], steps: i32) -> Option<Coord> {
        let raw: Coord = start
            .iter()
            .zip(dv.iter())
            .map(|(&c, &d)| c + steps * d)
            .collect();
        self.normalize(&raw)
    }

    fn normalize(&self, coord: &[i32]) -> Option<Coord> {
        if coord.len() != self.shape.len() {
            return None;
        }
        if self.toroidal {
            Some(
                coord
                    .iter()
                    .zip(self.shape.iter())
                    .map(|(&c, &d)| c.rem_euclid(d))
                    .collect(),
            )
        } else if coord.iter().zip(self.shape.iter()).all(|(&c, &d)| c >= 0 && c < d) {
            Some(coord.to_vec())
        } else {
            None
        }
    }
}
