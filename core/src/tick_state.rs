//! Per-tick snapshot payloads.
//!
//! [`RawTickState`] is the unit that flows engine → queue → persistence; it
//! is a deep copy with no references back into the live environment.
//! [`PreparedTickState`] is the indexer's enriched rendition of the same
//! skeleton. Field names serialize in camelCase, which is the canonical
//! wire schema for both stores.

use crate::machine::{ProcFrame, RegisterValue};
use crate::Coord;
use serde::{Deserialize, Serialize};

/// One non-empty cell of the environment at the end of a tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCellState {
    /// Cell coordinate.
    pub pos: Coord,
    /// Raw molecule int.
    pub molecule: i32,
    /// Owner organism id, 0 when unowned.
    pub owner_id: u64,
}

/// Full deep-copy snapshot of one organism at the end of a tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOrganismState {
    pub id: u64,
    pub parent_id: Option<u64>,
    pub birth_tick: u64,
    pub program_id: String,
    pub ip: Coord,
    pub dv: Coord,
    pub dps: Vec<Coord>,
    pub active_dp_index: usize,
    pub er: i64,
    pub drs: Vec<RegisterValue>,
    pub prs: Vec<RegisterValue>,
    pub fprs: Vec<RegisterValue>,
    pub lrs: Vec<RegisterValue>,
    pub data_stack: Vec<RegisterValue>,
    pub location_stack: Vec<Coord>,
    pub call_stack: Vec<ProcFrame>,
    pub is_dead: bool,
    pub instruction_failed: bool,
    pub failure_reason: Option<String>,
    pub skip_ip_advance: bool,
    pub ip_before_fetch: Coord,
    pub dv_before_fetch: Coord,
}

impl RawOrganismState {
    /// Rough serialized size, used for queue byte accounting.
    pub fn estimated_bytes(&self) -> usize {
        let regs: usize = self
            .drs
            .iter()
            .chain(self.prs.iter())
            .chain(self.fprs.iter())
            .chain(self.lrs.iter())
            .chain(self.data_stack.iter())
            .map(RegisterValue::estimated_bytes)
            .sum();
        let frames: usize = self.call_stack.iter().map(ProcFrame::estimated_bytes).sum();
        let coords = (self.dps.len() + self.location_stack.len() + 4) * 12 * self.ip.len().max(1);
        320 + regs + frames + coords + self.program_id.len()
    }
}

/// The queue/persistence unit: everything observable about tick `tick_number`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTickState {
    pub tick_number: u64,
    pub organisms: Vec<RawOrganismState>,
    pub cells: Vec<RawCellState>,
}

impl RawTickState {
    /// Byte-cost heuristic for queue admission accounting.
    ///
    /// Deliberately an estimate: serializing every message twice to learn its
    /// exact size would cost more than the accuracy is worth.
    pub fn estimated_bytes(&self) -> usize {
        64 + self
            .organisms
            .iter()
            .map(RawOrganismState::estimated_bytes)
            .sum::<usize>()
            + self.cells.len() * 56
    }
}

/// One organism of a prepared tick: the raw skeleton plus rendered strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedOrganismState {
    pub id: u64,
    pub parent_id: Option<u64>,
    pub birth_tick: u64,
    pub program_id: String,
    pub ip: Coord,
    pub dv: Coord,
    pub dps: Vec<Coord>,
    pub active_dp_index: usize,
    pub er: i64,
    /// Register banks rendered as `"<TYPE>:<value>"` / `"[x,y,…]"` strings.
    pub drs: Vec<String>,
    pub prs: Vec<String>,
    pub fprs: Vec<String>,
    pub lrs: Vec<String>,
    pub data_stack: Vec<String>,
    pub location_stack: Vec<String>,
    /// One display line per frame: `PROC_NAME WITH p1=<val>, p2=<val>`.
    pub call_stack: Vec<String>,
    /// Disassembly of the molecule at `ip`.
    pub next_instruction: String,
    pub is_dead: bool,
    pub instruction_failed: bool,
    pub failure_reason: Option<String>,
}

/// The indexer's query-ready rendition of one tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedTickState {
    pub tick_number: u64,
    pub organisms: Vec<PreparedOrganismState>,
    pub cells: Vec<RawCellState>,
}
