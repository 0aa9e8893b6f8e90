//! The instruction set architecture.
//!
//! Every opcode is a variant of [`Opcode`]; its operand shape and cost live
//! in a static descriptor table. An [`InstructionSet`] is built once at
//! startup for a given world dimensionality and threaded through the engine
//! and indexer explicitly. There is no process-global registry.
//!
//! Operand molecules are read along the direction vector, one step per
//! molecule. A `Vector` operand occupies one molecule per axis. `CALL` is
//! the only variadic instruction: after its entry vector and argument count
//! it reads `argc` further molecules naming the caller data registers bound
//! to the formal parameter registers.

use evochora_core::{Molecule, MoleculeType};
use std::collections::HashMap;

/// Every instruction of the Evochora VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Nop,
    /// Write an immediate molecule to a register.
    Seti,
    /// Copy one register to another.
    Setr,
    /// Write a vector literal to a register.
    Setv,
    /// Add an immediate to a scalar register.
    Addi,
    /// Add one register into another (scalar+scalar or vector+vector).
    Addr,
    /// Subtract an immediate from a scalar register.
    Subi,
    /// Push a register onto the data stack.
    Push,
    /// Pop the data stack into a register.
    Pop,
    /// Push an immediate onto the data stack.
    Pusi,
    /// Set the direction vector from a unit-vector register.
    Turn,
    /// Set the active data pointer to the current IP.
    Sync,
    /// Move the active data pointer by a vector register.
    Seek,
    /// Switch the active data pointer index.
    Dpsw,
    /// Read the molecule at the active data pointer into a register.
    Peek,
    /// Write a register's molecule to the cell at the active data pointer.
    Poke,
    /// Harvest energy from the cell at the active data pointer.
    Harv,
    /// Jump by a vector literal.
    Jmpi,
    /// Jump by a vector register.
    Jmpr,
    /// Skip the next instruction unless register equals immediate.
    Ifi,
    /// Skip the next instruction unless register is less than immediate.
    Lti,
    /// Call a procedure, binding formal parameters to caller data registers.
    Call,
    /// Return from the topmost call frame.
    Ret,
    /// Read the energy register into a data register.
    Nrg,
    /// Write a random data molecule to a register.
    Rand,
    /// Spawn a child organism.
    Fork,
    /// Push the active data pointer onto the location stack.
    Lpsh,
    /// Pop the location stack into the active data pointer.
    Lpop,
}

/// The shape of one operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// A global register index (`DATA:<index>`).
    Register,
    /// An immediate molecule taken verbatim.
    Literal,
    /// One molecule per axis, combined into a vector of scalar values.
    Vector,
}

/// Static description of one instruction.
#[derive(Debug)]
pub struct InstructionDescriptor {
    /// The `CODE` molecule scalar that encodes this instruction.
    pub value: i32,
    pub opcode: Opcode,
    pub mnemonic: &'static str,
    /// Fixed operand shapes, in fetch order.
    pub operands: &'static [OperandKind],
    /// Energy cost deducted whether or not the instruction succeeds.
    pub base_cost: i64,
    /// Reads further operand molecules after the fixed ones (`CALL`).
    pub variadic: bool,
}

static INSTRUCTION_TABLE: &[InstructionDescriptor] = &[
    InstructionDescriptor {
        value: 1,
        opcode: Opcode::Nop,
        mnemonic: "NOP",
        operands: &[],
        base_cost: 1,
        variadic: false,
    },
    InstructionDescriptor {
        value: 2,
        opcode: Opcode::Seti,
        mnemonic: "SETI",
        operands: &[OperandKind::Register, OperandKind::Literal],
        base_cost: 1,
        variadic: false,
    },
    InstructionDescriptor {
        value: 3,
        opcode: Opcode::Setr,
        mnemonic: "SETR",
        operands: &[OperandKind::Register, OperandKind::Register],
        base_cost: 1,
        variadic: false,
    },
    InstructionDescriptor {
        value: 4,
        opcode: Opcode::Setv,
        mnemonic: "SETV",
        operands: &[OperandKind::Register, OperandKind::Vector],
        base_cost: 1,
        variadic: false,
    },
    InstructionDescriptor {
        value: 5,
        opcode: Opcode::Addi,
        mnemonic: "ADDI",
        operands: &[OperandKind::Register, OperandKind::Literal],
        base_cost: 1,
        variadic: false,
    },
    InstructionDescriptor {
        value: 6,
        opcode: Opcode::Addr,
        mnemonic: "ADDR",
        operands: &[OperandKind::Register, OperandKind::Register],
        base_cost: 1,
        variadic: false,
    },
    InstructionDescriptor {
        value: 7,
        opcode: Opcode::Subi,
        mnemonic: "SUBI",
        operands: &[OperandKind::Register, OperandKind::Literal],
        base_cost: 1,
        variadic: false,
    },
    InstructionDescriptor {
        value: 8,
        opcode: Opcode::Push,
        mnemonic: "PUSH",
        operands: &[OperandKind::Register],
        base_cost: 1,
        variadic: false,
    },
    InstructionDescriptor {
        value: 9,
        opcode: Opcode::Pop,
        mnemonic: "POP",
        operands: &[OperandKind::Register],
        base_cost: 1,
        variadic: false,
    },
    InstructionDescriptor {
        value: 10,
        opcode: Opcode::Pusi,
        mnemonic: "PUSI",
        operands: &[OperandKind::Literal],
        base_cost: 1,
        variadic: false,
    },
    InstructionDescriptor {
        value: 11,
        opcode: Opcode::Turn,
        mnemonic: "TURN",
        operands: &[OperandKind::Register],
        base_cost: 1,
        variadic: false,
    },
    InstructionDescriptor {
        value: 12,
        opcode: Opcode::Sync,
        mnemonic: "SYNC",
        operands: &[],
        base_cost: 1,
        variadic: false,
    },
    InstructionDescriptor {
        value: 13,
        opcode: Opcode::Seek,
        mnemonic: "SEEK",
        operands: &[OperandKind::Register],
        base_cost: 1,
        variadic: false,
    },
    InstructionDescriptor {
        value: 14,
        opcode: Opcode::Dpsw,
        mnemonic: "DPSW",
        operands: &[OperandKind::Literal],
        base_cost: 1,
        variadic: false,
    },
    InstructionDescriptor {
        value: 15,
        opcode: Opcode::Peek,
        mnemonic: "PEEK",
        operands: &[OperandKind::Register],
        base_cost: 1,
        variadic: false,
    },
    InstructionDescriptor {
        value: 16,
        opcode: Opcode::Poke,
        mnemonic: "POKE",
        operands: &[OperandKind::Register],
        base_cost: 3,
        variadic: false,
    },
    InstructionDescriptor {
        value: 17,
        opcode: Opcode::Harv,
        mnemonic: "HARV",
        operands: &[],
        base_cost: 1,
        variadic: false,
    },
    InstructionDescriptor {
        value: 18,
        opcode: Opcode::Jmpi,
        mnemonic: "JMPI",
        operands: &[OperandKind::Vector],
        base_cost: 1,
        variadic: false,
    },
    InstructionDescriptor {
        value: 19,
        opcode: Opcode::Jmpr,
        mnemonic: "JMPR",
        operands: &[OperandKind::Register],
        base_cost: 1,
        variadic: false,
    },
    InstructionDescriptor {
        value: 20,
        opcode: Opcode::Ifi,
        mnemonic: "IFI",
        operands: &[OperandKind::Register, OperandKind::Literal],
        base_cost: 1,
        variadic: false,
    },
    InstructionDescriptor {
        value: 21,
        opcode: Opcode::Lti,
        mnemonic: "LTI",
        operands: &[OperandKind::Register, OperandKind::Literal],
        base_cost: 1,
        variadic: false,
    },
    InstructionDescriptor {
        value: 22,
        opcode: Opcode::Call,
        mnemonic: "CALL",
        operands: &[OperandKind::Vector, OperandKind::Literal],
        base_cost: 2,
        variadic: true,
    },
    InstructionDescriptor {
        value: 23,
        opcode: Opcode::Ret,
        mnemonic: "RET",
        operands: &[],
        base_cost: 1,
        variadic: false,
    },
    InstructionDescriptor {
        value: 24,
        opcode: Opcode::Nrg,
        mnemonic: "NRG",
        operands: &[OperandKind::Register],
        base_cost: 1,
        variadic: false,
    },
    InstructionDescriptor {
        value: 25,
        opcode: Opcode::Rand,
        mnemonic: "RAND",
        operands: &[OperandKind::Register],
        base_cost: 1,
        variadic: false,
    },
    InstructionDescriptor {
        value: 26,
        opcode: Opcode::Fork,
        mnemonic: "FORK",
        operands: &[OperandKind::Register, OperandKind::Register],
        base_cost: 10,
        variadic: false,
    },
    InstructionDescriptor {
        value: 27,
        opcode: Opcode::Lpsh,
        mnemonic: "LPSH",
        operands: &[],
        base_cost: 1,
        variadic: false,
    },
    InstructionDescriptor {
        value: 28,
        opcode: Opcode::Lpop,
        mnemonic: "LPOP",
        operands: &[],
        base_cost: 1,
        variadic: false,
    },
];

/// The instruction set for one world dimensionality.
pub struct InstructionSet {
    dims: usize,
    by_value: HashMap<i32, &'static InstructionDescriptor>,
    by_opcode: HashMap<Opcode, &'static InstructionDescriptor>,
}

impl InstructionSet {
    /// Build the set for a world with `dims` axes.
    pub fn new(dims: usize) -> InstructionSet {
        let mut by_value = HashMap::new();
        let mut by_opcode = HashMap::new();
        for descriptor in INSTRUCTION_TABLE {
            by_value.insert(descriptor.value, descriptor);
            by_opcode.insert(descriptor.opcode, descriptor);
        }
        InstructionSet {
            dims,
            by_value,
            by_opcode,
        }
    }

    /// World dimensionality this set was built for.
    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Decode a molecule into its instruction descriptor.
    ///
    /// Only `CODE` molecules with a known opcode value decode; everything
    /// else is `None` (including empty space, `CODE:0`).
    pub fn decode(&self, molecule: Molecule) -> Option<&'static InstructionDescriptor> {
        if molecule.molecule_type() != MoleculeType::Code {
            return None;
        }
        self.by_value.get(&molecule.value()).copied()
    }

    /// The descriptor of an opcode.
    pub fn descriptor(&self, opcode: Opcode) -> &'static InstructionDescriptor {
        self.by_opcode[&opcode]
    }

    /// The `CODE` molecule encoding an opcode.
    pub fn encode(&self, opcode: Opcode) -> Molecule {
        Molecule::new(MoleculeType::Code, self.descriptor(opcode).value)
    }

    /// Molecules occupied by one operand.
    pub fn operand_len(&self, kind: OperandKind) -> usize {
        match kind {
            OperandKind::Vector => self.dims,
            OperandKind::Register | OperandKind::Literal => 1,
        }
    }

    /// Molecules occupied by an instruction's fixed operands.
    pub fn fixed_operand_len(&self, descriptor: &InstructionDescriptor) -> usize {
        descriptor
            .operands
            .iter()
            .map(|&kind| self.operand_len(kind))
            .sum()
    }
}
