//! The embodied organism and its machine state.

use evochora_core::{
    Coord, ProcFrame, ProgramArtifact, RegisterValue, DATA_POINTER_COUNT, DATA_REGISTER_COUNT,
    FORMAL_PARAM_REGISTER_COUNT, FPR_BASE, LOCATION_REGISTER_COUNT, LR_BASE,
    PROC_REGISTER_COUNT, PR_BASE, REGISTER_COUNT,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;

/// One live organism: identity, embodiment, register banks, stacks, and the
/// per-tick transient flags that end up in every snapshot.
pub struct Organism {
    pub id: u64,
    pub parent_id: Option<u64>,
    pub birth_tick: u64,
    pub program_id: String,
    /// Placement origin of the program this organism executes; procedure
    /// entries in the artifact are relative to it.
    pub origin: Coord,
    pub artifact: Arc<ProgramArtifact>,

    pub ip: Coord,
    pub dv: Coord,
    pub dps: Vec<Coord>,
    pub active_dp: usize,
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

    /// Deterministic per-organism randomness sub-stream.
    pub rng: StdRng,
}

impl Organism {
    /// Create an organism at `ip` with a fresh machine state.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u64,
        parent_id: Option<u64>,
        birth_tick: u64,
        artifact: Arc<ProgramArtifact>,
        origin: Coord,
        ip: Coord,
        energy: i64,
        master_seed: u64,
    ) -> Organism {
        let dims = ip.len();
        let mut dv = vec![0i32; dims];
        dv[0] = 1;
        Organism {
            id,
            parent_id,
            birth_tick,
            program_id: artifact.program_id.clone(),
            origin,
            artifact,
            ip: ip.clone(),
            dv: dv.clone(),
            dps: vec![ip.clone(); DATA_POINTER_COUNT],
            active_dp: 0,
            er: energy,
            drs: vec![RegisterValue::zero(); DATA_REGISTER_COUNT],
            prs: vec![RegisterValue::zero(); PROC_REGISTER_COUNT],
            fprs: vec![RegisterValue::zero(); FORMAL_PARAM_REGISTER_COUNT],
            lrs: vec![RegisterValue::zero(); LOCATION_REGISTER_COUNT],
            data_stack: Vec::new(),
            location_stack: Vec::new(),
            call_stack: Vec::new(),
            is_dead: false,
            instruction_failed: false,
            failure_reason: None,
            skip_ip_advance: false,
            ip_before_fetch: ip,
            dv_before_fetch: dv,
            rng: derive_rng(master_seed, id),
        }
    }

    /// Clear the transient flags and take the before-fetch snapshots. Runs
    /// once per tick, before planning.
    pub fn begin_tick(&mut self) {
        self.instruction_failed = false;
        self.failure_reason = None;
        self.skip_ip_advance = false;
        self.ip_before_fetch = self.ip.clone();
        self.dv_before_fetch = self.dv.clone();
    }

    /// Read a register by global index.
    pub fn register(&self, index: usize) -> Option<&RegisterValue> {
        if index < PR_BASE {
            self.drs.get(index)
        } else if index < FPR_BASE {
            self.prs.get(index - PR_BASE)
        } else if index < LR_BASE {
            self.fprs.get(index - FPR_BASE)
        } else if index < REGISTER_COUNT {
            self.lrs.get(index - LR_BASE)
        } else {
            None
        }
    }

    /// Write a register by global index. Out-of-range indices are rejected
    /// at planning time, so this only sees valid ones.
    pub fn set_register(&mut self, index: usize, value: RegisterValue) {
        if index < PR_BASE {
            self.drs[index] = value;
        } else if index < FPR_BASE {
            self.prs[index - PR_BASE] = value;
        } else if index < LR_BASE {
            self.fprs[index - FPR_BASE] = value;
        } else {
            self.lrs[index - LR_BASE] = value;
        }
    }

    /// The coordinate of the active data pointer.
    pub fn active_dp_coord(&self) -> &Coord {
        &self.dps[self.active_dp]
    }

    /// Is this organism alive? Alive means positive energy and not flagged
    /// dead.
    pub fn is_alive(&self) -> bool {
        self.er > 0 && !self.is_dead
    }
}

/// Derive the organism's randomness sub-stream from the run seed and its id.
pub fn derive_rng(master_seed: u64, organism_id: u64) -> StdRng {
    StdRng::seed_from_u64(master_seed ^ organism_id.wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn test_organism(id: u64) -> Organism {
        let artifact = Arc::new(ProgramArtifact::with_layout("prog", vec![]));
        Organism::new(id, None, 0, artifact, vec![0, 0], vec![0, 0], 100, 42)
    }

    #[test]
    fn fresh_organism_has_unit_dv_and_zeroed_banks() {
        let org = test_organism(1);
        assert_eq!(org.dv, vec![1, 0]);
        assert_eq!(org.drs.len(), DATA_REGISTER_COUNT);
        assert!(org.drs.iter().all(|r| *r == RegisterValue::zero()));
        assert_eq!(org.dps.len(), DATA_POINTER_COUNT);
        assert!(org.is_alive());
    }

    #[test]
    fn global_register_index_addresses_all_banks() {
        let mut org = test_organism(1);
        org.set_register(0, RegisterValue::Scalar(1));
        org.set_register(PR_BASE, RegisterValue::Scalar(2));
        org.set_register(FPR_BASE, RegisterValue::Scalar(3));
        org.set_register(LR_BASE, RegisterValue::Scalar(4));
        assert_eq!(org.drs[0], RegisterValue::Scalar(1));
        assert_eq!(org.prs[0], RegisterValue::Scalar(2));
        assert_eq!(org.fprs[0], RegisterValue::Scalar(3));
        assert_eq!(org.lrs[0], RegisterValue::Scalar(4));
        assert!(org.register(REGISTER_COUNT).is_none());
    }

    #[test]
    fn begin_tick_snapshots_ip_and_dv() {
        let mut org = test_organism(1);
        org.ip = vec![3, 4];
        org.dv = vec![0, 1];
        org.instruction_failed = true;
        org.failure_reason = Some("old".to_string());
        org.begin_tick();
        assert_eq!(org.ip_before_fetch, vec![3, 4]);
        assert_eq!(org.dv_before_fetch, vec![0, 1]);
        assert!(!org.instruction_failed);
        assert!(org.failure_reason.is_none());
    }

    #[test]
    fn rng_substream_is_deterministic_per_id() {
        let mut a = derive_rng(7, 1);
        let mut b = derive_rng(7, 1);
        let mut c = derive_rng(7, 2);
        let (x, y, z): (u64, u64, u64) = (a.gen(), b.gen(), c.gen());
        assert_eq!(x, y);
        assert_ne!(x, z);
    }

    #[test]
    fn alive_follows_energy_and_flag() {
        let mut org = test_organism(1);
        assert!(org.is_alive());
        org.er = 0;
        assert!(!org.is_alive());
        org.er = 5;
        org.is_dead = true;
        assert!(!org.is_alive());
    }
}
