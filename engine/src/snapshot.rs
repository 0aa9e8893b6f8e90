//! The single serializer that deep-copies engine state into transport form.
//!
//! Nothing in the produced [`RawTickState`] aliases the live environment or
//! any organism.

use crate::environment::Environment;
use crate::organism::Organism;
use evochora_core::{RawCellState, RawOrganismState, RawTickState};
use std::collections::BTreeMap;

pub(crate) fn capture(
    tick_number: u64,
    organisms: &BTreeMap<u64, Organism>,
    env: &Environment,
) -> RawTickState {
    let organisms = organisms.values().map(capture_organism).collect();
    let mut cells = Vec::new();
    env.for_each_non_empty(|pos, molecule, owner_id| {
        cells.push(RawCellState {
            pos,
            molecule: molecule.raw(),
            owner_id,
        });
    });
    RawTickState {
        tick_number,
        organisms,
        cells,
    }
}

fn capture_organism(organism: &Organism) -> RawOrganismState {
    RawOrganismState {
        id: organism.id,
        parent_id: organism.parent_id,
        birth_tick: organism.birth_tick,
        program_id: organism.program_id.clone(),
        ip: organism.ip.clone(),
        dv: organism.dv.clone(),
        dps: organism.dps.clone(),
        active_dp_index: organism.active_dp,
        er: organism.er,
        drs: organism.drs.clone(),
        prs: organism.prs.clone(),
        fprs: organism.fprs.clone(),
        lrs: organism.lrs.clone(),
        data_stack: organism.data_stack.clone(),
        location_stack: organism.location_stack.clone(),
        call_stack: organism.call_stack.clone(),
        is_dead: organism.is_dead,
        instruction_failed: organism.instruction_failed,
        failure_reason: organism.failure_reason.clone(),
        skip_ip_advance: organism.skip_ip_advance,
        ip_before_fetch: organism.ip_before_fetch.clone(),
        dv_before_fetch: organism.dv_before_fetch.clone(),
    }
}
