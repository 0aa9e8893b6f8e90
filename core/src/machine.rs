//! Register values and call-stack frames.

use crate::Coord;
use serde::{Deserialize, Serialize};

/// Number of data registers (`%DR0..`) per organism.
pub const DATA_REGISTER_COUNT: usize = 8;
/// Number of procedure registers (`%PR0..`) per organism.
pub const PROC_REGISTER_COUNT: usize = 8;
/// Number of formal parameter registers (`%FPR0..`) per organism.
pub const FORMAL_PARAM_REGISTER_COUNT: usize = 8;
/// Number of location registers (`%LR0..`) per organism.
pub const LOCATION_REGISTER_COUNT: usize = 4;
/// Number of data pointers per organism.
pub const DATA_POINTER_COUNT: usize = 2;

/// First global register index of the DR bank.
pub const DR_BASE: usize = 0;
/// First global register index of the PR bank.
pub const PR_BASE: usize = DR_BASE + DATA_REGISTER_COUNT;
/// First global register index of the FPR bank.
pub const FPR_BASE: usize = PR_BASE + PROC_REGISTER_COUNT;
/// First global register index of the LR bank.
pub const LR_BASE: usize = FPR_BASE + FORMAL_PARAM_REGISTER_COUNT;
/// Total size of the global register index space.
pub const REGISTER_COUNT: usize = LR_BASE + LOCATION_REGISTER_COUNT;

/// Does a global register index address a formal parameter register?
pub fn is_fpr_index(index: usize) -> bool {
    (FPR_BASE..LR_BASE).contains(&index)
}

/// The FPR slot addressed by a global register index, if any.
pub fn fpr_slot(index: usize) -> Option<usize> {
    if is_fpr_index(index) {
        Some(index - FPR_BASE)
    } else {
        None
    }
}

/// Canonical register name for a global index, e.g. `%DR0` or `%FPR2`.
pub fn register_name(index: usize) -> String {
    if index < PR_BASE {
        format!("%DR{}", index - DR_BASE)
    } else if index < FPR_BASE {
        format!("%PR{}", index - PR_BASE)
    } else if index < LR_BASE {
        format!("%FPR{}", index - FPR_BASE)
    } else if index < REGISTER_COUNT {
        format!("%LR{}", index - LR_BASE)
    } else {
        format!("%R{}", index)
    }
}

/// A register or stack slot: either a scalar molecule or an N-vector.
///
/// Serialized untagged so scalars appear as JSON numbers and vectors as JSON
/// arrays, matching the tick payload schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegisterValue {
    /// A raw molecule int.
    Scalar(i32),
    /// A coordinate-shaped vector of ints.
    Vector(Vec<i32>),
}

impl RegisterValue {
    /// Scalar zero, the reset value of every register slot.
    pub fn zero() -> RegisterValue {
        RegisterValue::Scalar(0)
    }

    /// The scalar payload, if this is a scalar slot.
    pub fn as_scalar(&self) -> Option<i32> {
        match self {
            RegisterValue::Scalar(v) => Some(*v),
            RegisterValue::Vector(_) => None,
        }
    }

    /// The vector payload, if this is a vector slot.
    pub fn as_vector(&self) -> Option<&[i32]> {
        match self {
            RegisterValue::Scalar(_) => None,
            RegisterValue::Vector(v) => Some(v),
        }
    }

    /// Rough serialized size, used for queue byte accounting.
    pub fn estimated_bytes(&self) -> usize {
        match self {
            RegisterValue::Scalar(_) => 12,
            RegisterValue::Vector(v) => 4 + 12 * v.len(),
        }
    }
}

impl Default for RegisterValue {
    fn default() -> Self {
        RegisterValue::zero()
    }
}

/// A call-stack frame.
///
/// Carries the saved PR/FPR banks restored on `RET`, and the binding map
/// that records which caller data register each formal parameter slot was
/// resolved to. The binding map is what lets the indexer present call state
/// with semantic parameter names instead of internal FPR slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcFrame {
    /// Procedure name, resolved through the program artifact's symbol table.
    pub proc_name: String,
    /// Absolute IP to return to on `RET`.
    pub return_ip: Coord,
    /// Procedure register bank snapshot at call entry.
    pub saved_prs: Vec<RegisterValue>,
    /// Formal parameter register bank snapshot at call entry.
    pub saved_fprs: Vec<RegisterValue>,
    /// `fpr_bindings[i]` is the caller DR index bound to `%FPR{i}`.
    pub fpr_bindings: Vec<Option<usize>>,
}

impl ProcFrame {
    /// Rough serialized size, used for queue byte accounting.
    pub fn estimated_bytes(&self) -> usize {
        64 + self.proc_name.len()
            + 12 * self.return_ip.len()
            + self
                .saved_prs
                .iter()
                .chain(self.saved_fprs.iter())
                .map(RegisterValue::estimated_bytes)
                .sum::<usize>()
            + 8 * self.fpr_bindings.len()
    }
}
