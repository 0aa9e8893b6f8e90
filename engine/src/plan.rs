//! The Plan phase: decode one instruction per organism into a pure
//! description of its intended effects.
//!
//! Planning never mutates the environment. It may read any register or
//! stack of the planning organism. Every precondition violation turns into
//! a failed action carrying a human-readable reason; the organism still
//! pays the instruction's base cost and (where determinable) advances past
//! the instruction.

use crate::environment::Environment;
use crate::isa::{InstructionDescriptor, InstructionSet, Opcode, OperandKind};
use crate::organism::Organism;
use evochora_core::{
    Coord, Molecule, MoleculeType, ProcFrame, RegisterValue, DATA_POINTER_COUNT,
    DATA_REGISTER_COUNT, FORMAL_PARAM_REGISTER_COUNT, FPR_BASE, PR_BASE, REGISTER_COUNT,
};

/// One planned cell mutation, with the coordinate already normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellWrite {
    pub coord: Coord,
    pub molecule: Molecule,
}

/// A planned child spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkRequest {
    pub ip: Coord,
    pub dv: Coord,
    pub energy: i64,
}

/// Everything one instruction intends to do, in committable form.
#[derive(Debug)]
pub struct PlannedAction {
    pub organism_id: u64,
    pub reg_writes: Vec<(usize, RegisterValue)>,
    pub data_pops: usize,
    pub data_pushes: Vec<RegisterValue>,
    pub loc_pops: usize,
    pub loc_pushes: Vec<Coord>,
    pub call_push: Option<ProcFrame>,
    pub call_pop: bool,
    pub cell_writes: Vec<CellWrite>,
    pub next_ip: Coord,
    pub next_dv: Option<Coord>,
    pub dp_writes: Vec<(usize, Coord)>,
    pub next_active_dp: Option<usize>,
    /// Full energy effect on success, instruction cost included.
    pub energy_delta: i64,
    /// Documented cost, the only energy effect on failure.
    pub cost: i64,
    pub fork: Option<ForkRequest>,
    /// Register receiving a random molecule, drawn at execute time.
    pub rand_reg: Option<usize>,
    pub skip_ip_advance: bool,
    pub failed: bool,
    pub failure_reason: Option<String>,
}

impl PlannedAction {
    fn new(organism_id: u64, ip: Coord) -> PlannedAction {
        PlannedAction {
            organism_id,
            reg_writes: Vec::new(),
            data_pops: 0,
            data_pushes: Vec::new(),
            loc_pops: 0,
            loc_pushes: Vec::new(),
            call_push: None,
            call_pop: false,
            cell_writes: Vec::new(),
            next_ip: ip,
            next_dv: None,
            dp_writes: Vec::new(),
            next_active_dp: None,
            energy_delta: -1,
            cost: 1,
            fork: None,
            rand_reg: None,
            skip_ip_advance: false,
            failed: false,
            failure_reason: None,
        }
    }

    /// Mark this action failed. Conflict resolution uses the same path.
    pub fn fail(&mut self, reason: String) {
        self.failed = true;
        self.failure_reason = Some(reason);
    }
}

enum Operand {
    Register(usize),
    Literal(Molecule),
    Vector(Vec<i32>),
}

/// Plan one instruction for `org`. Pure with respect to the world.
pub fn plan_instruction(
    org: &Organism,
    env: &Environment,
    iset: &InstructionSet,
) -> PlannedAction {
    Planner { org, env, iset }.plan()
}

struct Planner<'a> {
    org: &'a Organism,
    env: &'a Environment,
    iset: &'a InstructionSet,
}

impl<'a> Planner<'a> {
    fn plan(&self) -> PlannedAction {
        let org = self.org;
        let mut action = PlannedAction::new(org.id, org.ip.clone());

        // Fetch.
        let molecule = match self.env.get(&org.ip) {
            Ok(m) => m,
            Err(_) => {
                action.skip_ip_advance = true;
                action.fail("instruction pointer out of bounds".to_string());
                return action;
            }
        };
        let descriptor = match self.iset.decode(molecule) {
            Some(d) => d,
            None => {
                // advance one molecule past the undecodable cell if possible
                match self.env.offset(&org.ip, &org.dv, 1) {
                    Ok(next) => action.next_ip = next,
                    Err(_) => action.skip_ip_advance = true,
                }
                action.fail(format!("cannot execute molecule {}", molecule));
                return action;
            }
        };
        action.cost = descriptor.base_cost;
        action.energy_delta = -descriptor.base_cost;

        // Read fixed operands along DV.
        let mut offset = 1i32;
        let mut operands = Vec::with_capacity(descriptor.operands.len());
        for &kind in descriptor.operands {
            match self.read_operand(kind, &mut offset) {
                Ok(operand) => operands.push(operand),
                Err(reason) => {
                    action.skip_ip_advance = true;
                    action.fail(reason);
                    return action;
                }
            }
        }

        // Variadic tail (CALL): `argc` register-index molecules.
        let mut extra = Vec::new();
        if descriptor.variadic {
            let argc = match &operands[1] {
                Operand::Literal(m) => m.value(),
                _ => 0,
            };
            if argc < 0 || argc as usize > FORMAL_PARAM_REGISTER_COUNT {
                action.fail(format!("argument count {} out of range", argc));
                return action;
            }
            for _ in 0..argc {
                match self.read_molecule(&mut offset) {
                    Ok(m) => extra.push(m),
                    Err(reason) => {
                        action.skip_ip_advance = true;
                        action.fail(reason);
                        return action;
                    }
                }
            }
        }

        // Default advance: one past the last operand molecule.
        match self.env.offset(&org.ip, &org.dv, offset) {
            Ok(next) => action.next_ip = next,
            Err(_) => {
                action.skip_ip_advance = true;
                action.fail("instruction pointer cannot advance".to_string());
                return action;
            }
        }

        self.plan_opcode(descriptor, &operands, &extra, &mut action);
        action
    }

    fn plan_opcode(
        &self,
        descriptor: &InstructionDescriptor,
        operands: &[Operand],
        extra: &[Molecule],
        action: &mut PlannedAction,
    ) {
        let org = self.org;
        match descriptor.opcode {
            Opcode::Nop => {}
            Opcode::Seti => {
                let (reg, lit) = (self.reg_at(operands, 0), self.lit_at(operands, 1));
                action
                    .reg_writes
                    .push((reg, RegisterValue::Scalar(lit.raw())));
            }
            Opcode::Setr => {
                let (dst, src) = (self.reg_at(operands, 0), self.reg_at(operands, 1));
                match org.register(src) {
                    Some(value) => action.reg_writes.push((dst, value.clone())),
                    None => action.fail(format!("invalid register index {}", src)),
                }
            }
            Opcode::Setv => {
                let reg = self.reg_at(operands, 0);
                let vector = self.vec_at(operands, 1);
                action
                    .reg_writes
                    .push((reg, RegisterValue::Vector(vector.to_vec())));
            }
            Opcode::Addi | Opcode::Subi => {
                let (reg, lit) = (self.reg_at(operands, 0), self.lit_at(operands, 1));
                match self.scalar_register(reg) {
                    Ok(current) => {
                        let sign = if descriptor.opcode == Opcode::Addi { 1 } else { -1 };
                        let result = Molecule::new(
                            current.molecule_type(),
                            current.value() + sign * lit.value(),
                        );
                        action
                            .reg_writes
                            .push((reg, RegisterValue::Scalar(result.raw())));
                    }
                    Err(reason) => action.fail(reason),
                }
            }
            Opcode::Addr => {
                let (dst, src) = (self.reg_at(operands, 0), self.reg_at(operands, 1));
                match (org.register(dst), org.register(src)) {
                    (Some(RegisterValue::Scalar(a)), Some(RegisterValue::Scalar(b))) => {
                        let (a, b) = (Molecule::from_raw(*a), Molecule::from_raw(*b));
                        let result = Molecule::new(a.molecule_type(), a.value() + b.value());
                        action
                            .reg_writes
                            .push((dst, RegisterValue::Scalar(result.raw())));
                    }
                    (Some(RegisterValue::Vector(a)), Some(RegisterValue::Vector(b)))
                        if a.len() == b.len() =>
                    {
                        let sum = a.iter().zip(b.iter()).map(|(x, y)| x + y).collect();
                        action.reg_writes.push((dst, RegisterValue::Vector(sum)));
                    }
                    (Some(_), Some(_)) => action.fail("operand shape mismatch".to_string()),
                    _ => action.fail("invalid register index".to_string()),
                }
            }
            Opcode::Push => {
                let reg = self.reg_at(operands, 0);
                match org.register(reg) {
                    Some(value) => action.data_pushes.push(value.clone()),
                    None => action.fail(format!("invalid register index {}", reg)),
                }
            }
            Opcode::Pop => {
                let reg = self.reg_at(operands, 0);
                match org.data_stack.last() {
                    Some(value) => {
                        action.reg_writes.push((reg, value.clone()));
                        action.data_pops = 1;
                    }
                    None => action.fail("data stack is empty".to_string()),
                }
            }
            Opcode::Pusi => {
                let lit = self.lit_at(operands, 0);
                action.data_pushes.push(RegisterValue::Scalar(lit.raw()));
            }
            Opcode::Turn => {
                let reg = self.reg_at(operands, 0);
                match self.unit_vector_register(reg) {
                    Ok(dv) => action.next_dv = Some(dv),
                    Err(reason) => action.fail(reason),
                }
            }
            Opcode::Sync => {
                action
                    .dp_writes
                    .push((org.active_dp, org.ip.clone()));
            }
            Opcode::Seek => {
                let reg = self.reg_at(operands, 0);
                match org.register(reg) {
                    Some(RegisterValue::Vector(v)) => {
                        match self.env.offset(org.active_dp_coord(), v, 1) {
                            Ok(coord) => action.dp_writes.push((org.active_dp, coord)),
                            Err(_) => action.fail("data pointer out of bounds".to_string()),
                        }
                    }
                    Some(RegisterValue::Scalar(_)) => {
                        action.fail("vector register required".to_string())
                    }
                    None => action.fail(format!("invalid register index {}", reg)),
                }
            }
            Opcode::Dpsw => {
                let lit = self.lit_at(operands, 0);
                let index = lit.value();
                if index >= 0 && (index as usize) < DATA_POINTER_COUNT {
                    action.next_active_dp = Some(index as usize);
                } else {
                    action.fail(format!("data pointer index {} out of range", index));
                }
            }
            Opcode::Peek => {
                let reg = self.reg_at(operands, 0);
                match self.env.get(org.active_dp_coord()) {
                    Ok(molecule) => action
                        .reg_writes
                        .push((reg, RegisterValue::Scalar(molecule.raw()))),
                    Err(_) => action.fail("data pointer out of bounds".to_string()),
                }
            }
            Opcode::Poke => self.plan_poke(operands, action),
            Opcode::Harv => self.plan_harvest(action),
            Opcode::Jmpi => {
                let vector = self.vec_at(operands, 0);
                match self.env.offset(&org.ip, vector, 1) {
                    Ok(target) => {
                        action.next_ip = target;
                        action.skip_ip_advance = true;
                    }
                    Err(_) => action.fail("jump target out of bounds".to_string()),
                }
            }
            Opcode::Jmpr => {
                let reg = self.reg_at(operands, 0);
                match org.register(reg) {
                    Some(RegisterValue::Vector(v)) => match self.env.offset(&org.ip, v, 1) {
                        Ok(target) => {
                            action.next_ip = target;
                            action.skip_ip_advance = true;
                        }
                        Err(_) => action.fail("jump target out of bounds".to_string()),
                    },
                    Some(RegisterValue::Scalar(_)) => {
                        action.fail("vector register required".to_string())
                    }
                    None => action.fail(format!("invalid register index {}", reg)),
                }
            }
            Opcode::Ifi | Opcode::Lti => {
                let (reg, lit) = (self.reg_at(operands, 0), self.lit_at(operands, 1));
                match self.scalar_register(reg) {
                    Ok(current) => {
                        let holds = match descriptor.opcode {
                            Opcode::Ifi => current.raw() == lit.raw(),
                            _ => current.value() < lit.value(),
                        };
                        if !holds {
                            self.plan_skip_next(action);
                        }
                    }
                    Err(reason) => action.fail(reason),
                }
            }
            Opcode::Call => self.plan_call(operands, extra, action),
            Opcode::Ret => self.plan_ret(action),
            Opcode::Nrg => {
                let reg = self.reg_at(operands, 0);
                let er = org.er.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32;
                action.reg_writes.push((
                    reg,
                    RegisterValue::Scalar(Molecule::new(MoleculeType::Data, er).raw()),
                ));
            }
            Opcode::Rand => {
                action.rand_reg = Some(self.reg_at(operands, 0));
            }
            Opcode::Fork => self.plan_fork(operands, action),
            Opcode::Lpsh => {
                action.loc_pushes.push(org.active_dp_coord().clone());
            }
            Opcode::Lpop => match org.location_stack.last() {
                Some(coord) => {
                    action.dp_writes.push((org.active_dp, coord.clone()));
                    action.loc_pops = 1;
                }
                None => action.fail("location stack is empty".to_string()),
            },
        }
    }

    fn plan_poke(&self, operands: &[Operand], action: &mut PlannedAction) {
        let reg = self.reg_at(operands, 0);
        let raw = match self.scalar_register(reg) {
            Ok(m) => m,
            Err(reason) => return action.fail(reason),
        };
        let target = self.org.active_dp_coord().clone();
        let existing = match self.env.get(&target) {
            Ok(m) => m,
            Err(_) => return action.fail("data pointer out of bounds".to_string()),
        };
        let owner = self.env.owner(&target).unwrap_or(0);
        let writable = owner == self.org.id || (owner == 0 && existing.is_empty());
        if !writable {
            return action.fail(format!(
                "cell {:?} is owned by organism {}",
                target, owner
            ));
        }
        if raw.molecule_type() == MoleculeType::Structure {
            action.energy_delta -= i64::from(raw.value().max(0));
        }
        action.cell_writes.push(CellWrite {
            coord: target,
            molecule: raw,
        });
    }

    fn plan_harvest(&self, action: &mut PlannedAction) {
        let target = self.org.active_dp_coord().clone();
        match self.env.get(&target) {
            Ok(molecule)
                if molecule.molecule_type() == MoleculeType::Energy && !molecule.is_empty() =>
            {
                action.energy_delta += i64::from(molecule.value().max(0));
                action.cell_writes.push(CellWrite {
                    coord: target,
                    molecule: Molecule::EMPTY,
                });
            }
            Ok(_) => action.fail(format!("no energy at {:?}", target)),
            Err(_) => action.fail("data pointer out of bounds".to_string()),
        }
    }

    fn plan_call(&self, operands: &[Operand], extra: &[Molecule], action: &mut PlannedAction) {
        let org = self.org;
        let vector = self.vec_at(operands, 0);
        let entry = match self.env.offset(&org.ip, vector, 1) {
            Ok(coord) => coord,
            Err(_) => return action.fail("call target out of bounds".to_string()),
        };

        let mut bindings = vec![None; FORMAL_PARAM_REGISTER_COUNT];
        for (slot, molecule) in extra.iter().enumerate() {
            let dr = molecule.value();
            if dr < 0 || dr as usize >= DATA_REGISTER_COUNT {
                return action.fail(format!(
                    "formal parameter must bind a data register, got {}",
                    dr
                ));
            }
            let dr = dr as usize;
            bindings[slot] = Some(dr);
            action
                .reg_writes
                .push((FPR_BASE + slot, org.drs[dr].clone()));
        }

        let proc_name = self
            .resolve_procedure(&entry)
            .unwrap_or_else(|| format!("PROC@{:?}", entry));

        action.call_push = Some(ProcFrame {
            proc_name,
            return_ip: action.next_ip.clone(),
            saved_prs: org.prs.clone(),
            saved_fprs: org.fprs.clone(),
            fpr_bindings: bindings,
        });
        action.next_ip = entry;
        action.skip_ip_advance = true;
    }

    fn plan_ret(&self, action: &mut PlannedAction) {
        let org = self.org;
        let frame = match org.call_stack.last() {
            Some(frame) => frame,
            None => return action.fail("call stack is empty".to_string()),
        };
        // Copy formal parameter outputs back to the bound caller registers
        // before restoring the banks.
        for (slot, binding) in frame.fpr_bindings.iter().enumerate() {
            if let Some(dr) = binding {
                action.reg_writes.push((*dr, org.fprs[slot].clone()));
            }
        }
        for (i, value) in frame.saved_prs.iter().enumerate() {
            action.reg_writes.push((PR_BASE + i, value.clone()));
        }
        for (i, value) in frame.saved_fprs.iter().enumerate() {
            action.reg_writes.push((FPR_BASE + i, value.clone()));
        }
        action.next_ip = frame.return_ip.clone();
        action.skip_ip_advance = true;
        action.call_pop = true;
    }

    fn plan_fork(&self, operands: &[Operand], action: &mut PlannedAction) {
        let org = self.org;
        let dir_reg = self.reg_at(operands, 0);
        let er_reg = self.reg_at(operands, 1);
        let dv = match self.unit_vector_register(dir_reg) {
            Ok(dv) => dv,
            Err(reason) => return action.fail(reason),
        };
        let energy = match self.scalar_register(er_reg) {
            Ok(m) => i64::from(m.value()),
            Err(reason) => return action.fail(reason),
        };
        if energy <= 0 {
            return action.fail(format!("fork energy must be positive, got {}", energy));
        }
        action.fork = Some(ForkRequest {
            ip: org.active_dp_coord().clone(),
            dv,
            energy,
        });
    }

    /// IP displacement that skips the instruction at `action.next_ip`.
    fn plan_skip_next(&self, action: &mut PlannedAction) {
        let next_pos = action.next_ip.clone();
        let mut skip_len = 1i32;
        if let Ok(molecule) = self.env.get(&next_pos) {
            if let Some(descriptor) = self.iset.decode(molecule) {
                skip_len = 1 + self.iset.fixed_operand_len(descriptor) as i32;
                if descriptor.variadic {
                    // argc literal sits after the entry vector
                    let argc_offset = 1 + self.iset.dims() as i32;
                    if let Ok(argc_pos) = self.env.offset(&next_pos, &self.org.dv, argc_offset) {
                        if let Ok(argc) = self.env.get(&argc_pos) {
                            skip_len += argc
                                .value()
                                .clamp(0, FORMAL_PARAM_REGISTER_COUNT as i32);
                        }
                    }
                }
            }
        }
        match self.env.offset(&next_pos, &self.org.dv, skip_len) {
            Ok(target) => action.next_ip = target,
            Err(_) => {
                action.skip_ip_advance = true;
                action.fail("skip target out of bounds".to_string());
            }
        }
    }

    fn resolve_procedure(&self, entry_abs: &[i32]) -> Option<String> {
        let org = self.org;
        // entry relative to the placement origin, wrapped like the world
        let raw: Coord = entry_abs
            .iter()
            .zip(org.origin.iter())
            .map(|(&e, &o)| e - o)
            .collect();
        let relative = if self.env.is_toroidal() {
            raw.iter()
                .zip(self.env.shape().iter())
                .map(|(&c, &d)| c.rem_euclid(d))
                .collect()
        } else {
            raw
        };
        org.artifact
            .procedure_at(&relative)
            .map(|(name, _)| name.to_string())
    }

    // ── operand access ───────────────────────────────────────────

    fn read_molecule(&self, offset: &mut i32) -> Result<Molecule, String> {
        let pos = self
            .env
            .offset(&self.org.ip, &self.org.dv, *offset)
            .map_err(|_| "operand fetch out of bounds".to_string())?;
        *offset += 1;
        self.env
            .get(&pos)
            .map_err(|_| "operand fetch out of bounds".to_string())
    }

    fn read_operand(&self, kind: OperandKind, offset: &mut i32) -> Result<Operand, String> {
        match kind {
            OperandKind::Register => {
                let molecule = self.read_molecule(offset)?;
                let index = molecule.value();
                if index < 0 || index as usize >= REGISTER_COUNT {
                    return Err(format!("invalid register index {}", index));
                }
                Ok(Operand::Register(index as usize))
            }
            OperandKind::Literal => Ok(Operand::Literal(self.read_molecule(offset)?)),
            OperandKind::Vector => {
                let mut components = Vec::with_capacity(self.iset.dims());
                for _ in 0..self.iset.dims() {
                    components.push(self.read_molecule(offset)?.value());
                }
                Ok(Operand::Vector(components))
            }
        }
    }

    fn reg_at(&self, operands: &[Operand], index: usize) -> usize {
        match &operands[index] {
            Operand::Register(r) => *r,
            _ => unreachable!("operand {} is not a register", index),
        }
    }

    fn lit_at(&self, operands: &[Operand], index: usize) -> Molecule {
        match &operands[index] {
            Operand::Literal(m) => *m,
            _ => unreachable!("operand {} is not a literal", index),
        }
    }

    fn vec_at<'b>(&self, operands: &'b [Operand], index: usize) -> &'b [i32] {
        match &operands[index] {
            Operand::Vector(v) => v,
            _ => unreachable!("operand {} is not a vector", index),
        }
    }

    fn scalar_register(&self, index: usize) -> Result<Molecule, String> {
        match self.org.register(index) {
            Some(RegisterValue::Scalar(raw)) => Ok(Molecule::from_raw(*raw)),
            Some(RegisterValue::Vector(_)) => Err("scalar register required".to_string()),
            None => Err(format!("invalid register index {}", index)),
        }
    }

    fn unit_vector_register(&self, index: usize) -> Result<Coord, String> {
        match self.org.register(index) {
            Some(RegisterValue::Vector(v)) => {
                let nonzero: Vec<_> = v.iter().filter(|&&c| c != 0).collect();
                if v.len() == self.env.dims() && nonzero.len() == 1 && nonzero[0].abs() == 1 {
                    Ok(v.clone())
                } else {
                    Err(format!("direction must be a unit vector, got {:?}", v))
                }
            }
            Some(RegisterValue::Scalar(_)) => Err("vector register required".to_string()),
            None => Err(format!("invalid register index {}", index)),
        }
    }
}
