//! Program artifacts, the compiled input consumed by the engine.
//!
//! Artifacts are produced by the external assembler front end. The engine
//! only reads the machine-code layout, the initial world objects, and the
//! procedure symbol table; the indexer additionally uses the formal
//! parameter names for call-frame display.

use crate::Coord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One procedure in the artifact's symbol table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcedureInfo {
    /// Entry coordinate, relative to the program's placement origin.
    pub entry: Coord,
    /// Ordered formal parameter names, e.g. `["REG1", "REG2"]`.
    pub params: Vec<String>,
}

/// A compiled program: machine-code layout plus debug symbol tables.
///
/// Coordinates are relative to the placement origin chosen at seeding time;
/// layout and object lists keep insertion order for deterministic seeding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramArtifact {
    /// Stable program identifier, recorded on every organism it seeds.
    pub program_id: String,
    /// Machine-code molecules by coordinate.
    pub layout: Vec<(Coord, i32)>,
    /// Non-code world objects placed alongside the program.
    #[serde(default)]
    pub initial_objects: Vec<(Coord, i32)>,
    /// Procedure symbol table by name.
    #[serde(default)]
    pub procedures: BTreeMap<String, ProcedureInfo>,
}

impl ProgramArtifact {
    /// A program with a layout and no objects or procedures.
    pub fn with_layout(program_id: &str, layout: Vec<(Coord, i32)>) -> ProgramArtifact {
        ProgramArtifact {
            program_id: program_id.to_string(),
            layout,
            initial_objects: Vec::new(),
            procedures: BTreeMap::new(),
        }
    }

    /// Find the procedure whose entry point is `entry` (placement-relative).
    pub fn procedure_at(&self, entry: &[i32]) -> Option<(&str, &ProcedureInfo)> {
        self.procedures
            .iter()
            .find(|(_, info)| info.entry == entry)
            .map(|(name, info)| (name.as_str(), info))
    }

    /// Formal parameter names of a procedure, empty for unknown names.
    pub fn params_of(&self, proc_name: &str) -> &[String] {
        self.procedures
            .get(proc_name)
            .map(|info| info.params.as_slice())
            .unwrap_or(&[])
    }
}
