//! The simulation: world + organisms + the Plan/Resolve/Execute tick.

use crate::energy::EnergyDistribution;
use crate::environment::Environment;
use crate::isa::InstructionSet;
use crate::organism::Organism;
use crate::plan::{plan_instruction, ForkRequest, PlannedAction};
use crate::snapshot;
use crate::{EngineError, Result};
use evochora_core::molecule::MOLECULE_VALUE_MAX;
use evochora_core::{Coord, Molecule, MoleculeType, ProgramArtifact, RawTickState, RegisterValue};
use log::{debug, trace};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// A deterministic simulation run.
///
/// Owns the environment exclusively; the only state that leaves is the deep
/// copy produced by [`Simulation::step`].
pub struct Simulation {
    env: Environment,
    organisms: BTreeMap<u64, Organism>,
    strategies: Vec<Box<dyn EnergyDistribution>>,
    iset: Arc<InstructionSet>,
    seed: u64,
    next_id: u64,
    tick: u64,
}

impl Simulation {
    /// Create a simulation over `env` with the given instruction set,
    /// energy strategies and master seed.
    pub fn new(
        env: Environment,
        iset: Arc<InstructionSet>,
        strategies: Vec<Box<dyn EnergyDistribution>>,
        seed: u64,
    ) -> Simulation {
        Simulation {
            env,
            organisms: BTreeMap::new(),
            strategies,
            iset,
            seed,
            next_id: 1,
            tick: 0,
        }
    }

    /// The tick the next `step` call will produce.
    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    /// Number of live organisms.
    pub fn organism_count(&self) -> usize {
        self.organisms.len()
    }

    /// The world, read-only.
    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// The instruction set this run executes.
    pub fn instruction_set(&self) -> &Arc<InstructionSet> {
        &self.iset
    }

    /// Place a molecule directly, for seeding and tests.
    pub fn place_molecule(&mut self, coord: &[i32], molecule: Molecule, owner: u64) -> Result<()> {
        self.env
            .set(coord, molecule, owner)
            .map_err(|err| EngineError::Setup(err.to_string()))
    }

    /// Write a program's layout into the world at `origin` and create the
    /// organism executing it. Returns the new organism id.
    pub fn seed_program(
        &mut self,
        artifact: Arc<ProgramArtifact>,
        origin: &[i32],
        energy: i64,
    ) -> Result<u64> {
        let origin = self
            .env
            .normalize(origin)
            .map_err(|err| EngineError::Setup(err.to_string()))?;
        let id = self.next_id;

        for (coord, raw) in &artifact.layout {
            let abs = self
                .translated(&origin, coord)
                .map_err(EngineError::Setup)?;
            self.env
                .set(&abs, Molecule::from_raw(*raw), id)
                .map_err(|err| EngineError::Setup(err.to_string()))?;
        }
        for (coord, raw) in &artifact.initial_objects {
            let abs = self
                .translated(&origin, coord)
                .map_err(EngineError::Setup)?;
            self.env
                .set(&abs, Molecule::from_raw(*raw), 0)
                .map_err(|err| EngineError::Setup(err.to_string()))?;
        }

        let organism = Organism::new(
            id,
            None,
            self.tick,
            artifact,
            origin.clone(),
            origin,
            energy,
            self.seed,
        );
        self.organisms.insert(id, organism);
        self.next_id += 1;
        debug!("seeded organism {} with energy {}", id, energy);
        Ok(id)
    }

    /// Run one tick and return its deep-copy snapshot.
    ///
    /// The snapshot includes organisms that died during this tick (flagged
    /// `is_dead`) and children born during it; the dead are excised before
    /// the next tick plans.
    pub fn step(&mut self) -> Result<RawTickState> {
        let tick = self.tick;
        trace!("tick {} begins with {} organisms", tick, self.organisms.len());

        for (index, strategy) in self.strategies.iter_mut().enumerate() {
            let mut rng = derive_strategy_rng(self.seed, tick, index);
            strategy.distribute(&mut self.env, tick, &mut rng);
        }

        // Plan, ascending id.
        for organism in self.organisms.values_mut() {
            organism.begin_tick();
        }
        let mut actions: Vec<PlannedAction> = self
            .organisms
            .values()
            .map(|organism| plan_instruction(organism, &self.env, &self.iset))
            .collect();

        resolve_conflicts(&mut actions);

        // Execute, ascending id.
        let mut forks: Vec<(u64, ForkRequest)> = Vec::new();
        for action in actions {
            let organism = self
                .organisms
                .get_mut(&action.organism_id)
                .ok_or_else(|| {
                    EngineError::Invariant(format!(
                        "planned action for unknown organism {}",
                        action.organism_id
                    ))
                })?;

            if action.failed {
                organism.er -= action.cost;
                organism.instruction_failed = true;
                organism.failure_reason = action.failure_reason;
                organism.skip_ip_advance = action.skip_ip_advance;
                organism.ip = action.next_ip;
                continue;
            }

            for _ in 0..action.data_pops {
                organism.data_stack.pop();
            }
            organism.data_stack.extend(action.data_pushes);
            for _ in 0..action.loc_pops {
                organism.location_stack.pop();
            }
            organism.location_stack.extend(action.loc_pushes);
            for (index, value) in action.reg_writes {
                organism.set_register(index, value);
            }
            if action.call_pop {
                organism.call_stack.pop();
            }
            if let Some(frame) = action.call_push {
                organism.call_stack.push(frame);
            }
            for (dp, coord) in action.dp_writes {
                organism.dps[dp] = coord;
            }
            if let Some(active) = action.next_active_dp {
                organism.active_dp = active;
            }
            if let Some(reg) = action.rand_reg {
                let value = organism.rng.gen_range(0..=MOLECULE_VALUE_MAX);
                organism.set_register(
                    reg,
                    RegisterValue::Scalar(Molecule::new(MoleculeType::Data, value).raw()),
                );
            }
            for write in action.cell_writes {
                let owner = organism.id;
                self.env
                    .set(&write.coord, write.molecule, owner)
                    .map_err(|err| EngineError::Invariant(err.to_string()))?;
            }
            organism.er += action.energy_delta;
            if let Some(dv) = action.next_dv {
                organism.dv = dv;
            }
            organism.skip_ip_advance = action.skip_ip_advance;
            organism.ip = action.next_ip;
            if let Some(request) = action.fork {
                forks.push((organism.id, request));
            }
        }

        // Spawn forked children, ascending parent id. Children plan first on
        // the next tick, so they never join this tick's conflict resolution.
        for (parent_id, request) in forks {
            let child_id = self.next_id;
            let parent = self.organisms.get_mut(&parent_id).ok_or_else(|| {
                EngineError::Invariant(format!("forking organism {} vanished", parent_id))
            })?;
            if parent.er > request.energy {
                parent.er -= request.energy;
                let artifact = Arc::clone(&parent.artifact);
                let origin = parent.origin.clone();
                let mut child = Organism::new(
                    child_id,
                    Some(parent_id),
                    tick,
                    artifact,
                    origin,
                    request.ip,
                    request.energy,
                    self.seed,
                );
                child.dv = request.dv;
                child.dv_before_fetch = child.dv.clone();
                self.organisms.insert(child_id, child);
                self.next_id += 1;
                debug!("organism {} forked child {}", parent_id, child_id);
            } else {
                parent.instruction_failed = true;
                parent.failure_reason = Some(format!(
                    "insufficient energy to fork: have {}, need more than {}",
                    parent.er, request.energy
                ));
            }
        }

        // Deaths are flagged now, visible in this tick's snapshot, excised
        // before the next.
        for organism in self.organisms.values_mut() {
            if organism.er <= 0 {
                organism.is_dead = true;
                debug!("organism {} died at tick {}", organism.id, tick);
            }
        }

        let state = snapshot::capture(tick, &self.organisms, &self.env);

        self.organisms.retain(|_, organism| !organism.is_dead);
        self.tick += 1;
        Ok(state)
    }

    fn translated(&self, origin: &[i32], coord: &[i32]) -> std::result::Result<Coord, String> {
        if coord.len() != origin.len() {
            return Err(format!(
                "layout coordinate {:?} does not match world dimensionality",
                coord
            ));
        }
        let raw: Coord = origin.iter().zip(coord.iter()).map(|(&o, &c)| o + c).collect();
        self.env.normalize(&raw).map_err(|err| err.to_string())
    }
}

/// Resolve phase: for each coordinate claimed by more than one writer the
/// lowest organism id wins; every other claimant's whole action fails.
fn resolve_conflicts(actions: &mut [PlannedAction]) {
    let mut winners: HashMap<Coord, u64> = HashMap::new();
    for action in actions.iter().filter(|action| !action.failed) {
        for write in &action.cell_writes {
            winners
                .entry(write.coord.clone())
                .and_modify(|winner| *winner = (*winner).min(action.organism_id))
                .or_insert(action.organism_id);
        }
    }
    for action in actions.iter_mut() {
        if action.failed {
            continue;
        }
        let lost = action
            .cell_writes
            .iter()
            .find(|write| winners[&write.coord] != action.organism_id)
            .map(|write| (write.coord.clone(), winners[&write.coord]));
        if let Some((coord, winner)) = lost {
            action.fail(format!(
                "write conflict at {:?}: organism {} wins",
                coord, winner
            ));
        }
    }
}

fn derive_strategy_rng(seed: u64, tick: u64, index: usize) -> StdRng {
    let mixed = seed
        ^ tick.wrapping_mul(0x2545_F491_4F6C_DD1D)
        ^ (index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    StdRng::seed_from_u64(mixed)
}
