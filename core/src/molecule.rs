//! The 32-bit typed molecule encoding.
//!
//! A molecule packs a type tag into the topmost [`MOLECULE_TYPE_BITS`] bits
//! and a signed scalar into the remaining [`MOLECULE_VALUE_BITS`] bits.
//! Encoding masks the scalar into range; decoding sign-extends it back.
//! Both are total: every `i32` is a valid molecule.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Bits reserved for the molecule type tag.
pub const MOLECULE_TYPE_BITS: u32 = 2;
/// Bits reserved for the signed scalar value.
pub const MOLECULE_VALUE_BITS: u32 = 30;
/// Mask covering the scalar value bits.
pub const MOLECULE_VALUE_MASK: i32 = (1 << MOLECULE_VALUE_BITS) - 1;
/// Largest representable scalar value.
pub const MOLECULE_VALUE_MAX: i32 = (1 << (MOLECULE_VALUE_BITS - 1)) - 1;
/// Smallest representable scalar value.
pub const MOLECULE_VALUE_MIN: i32 = -(1 << (MOLECULE_VALUE_BITS - 1));

/// The kind of matter a molecule is made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MoleculeType {
    /// Executable machine code. `CODE:0` is empty space.
    Code,
    /// Inert data.
    Data,
    /// Harvestable energy.
    Energy,
    /// Building material with interaction cost.
    Structure,
}

impl MoleculeType {
    /// Decode the type tag bits. Total over the tag domain.
    pub fn from_bits(bits: u32) -> MoleculeType {
        match bits & ((1 << MOLECULE_TYPE_BITS) - 1) {
            0 => MoleculeType::Code,
            1 => MoleculeType::Data,
            2 => MoleculeType::Energy,
            _ => MoleculeType::Structure,
        }
    }

    /// The type tag bits for this type.
    pub fn bits(self) -> u32 {
        match self {
            MoleculeType::Code => 0,
            MoleculeType::Data => 1,
            MoleculeType::Energy => 2,
            MoleculeType::Structure => 3,
        }
    }
}

impl fmt::Display for MoleculeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MoleculeType::Code => "CODE",
            MoleculeType::Data => "DATA",
            MoleculeType::Energy => "ENERGY",
            MoleculeType::Structure => "STRUCTURE",
        };
        write!(f, "{}", name)
    }
}

/// A typed 32-bit world atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Molecule(i32);

impl Molecule {
    /// Empty space: `CODE:0`, raw value zero.
    pub const EMPTY: Molecule = Molecule(0);

    /// Encode a molecule from type and scalar. Out-of-range scalars are
    /// masked into the value field's two's-complement range.
    pub fn new(ty: MoleculeType, value: i32) -> Molecule {
        let tag = (ty.bits() as i32) << MOLECULE_VALUE_BITS;
        Molecule(tag | (value & MOLECULE_VALUE_MASK))
    }

    /// Reinterpret a raw 32-bit cell value as a molecule.
    pub fn from_raw(raw: i32) -> Molecule {
        Molecule(raw)
    }

    /// The raw 32-bit representation stored in the environment.
    pub fn raw(self) -> i32 {
        self.0
    }

    /// The molecule's type tag.
    pub fn molecule_type(self) -> MoleculeType {
        MoleculeType::from_bits((self.0 as u32) >> MOLECULE_VALUE_BITS)
    }

    /// The sign-extended scalar value.
    pub fn value(self) -> i32 {
        let v = self.0 & MOLECULE_VALUE_MASK;
        if v & (1 << (MOLECULE_VALUE_BITS - 1)) != 0 {
            v | !MOLECULE_VALUE_MASK
        } else {
            v
        }
    }

    /// Is this molecule empty space (`CODE:0`)?
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Molecule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.molecule_type(), self.value())
    }
}
