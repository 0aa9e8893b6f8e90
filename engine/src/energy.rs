//! Energy distribution strategies.
//!
//! Before each tick's Plan phase the engine invokes every registered
//! strategy with the environment, the tick number, and a deterministic rng
//! derived from the run seed. Strategies may place `ENERGY` molecules on
//! empty cells; they never touch occupied ones.

use crate::environment::Environment;
use crate::{EngineError, Result};
use evochora_app_config::EnergyStrategyConfig;
use evochora_core::{Coord, Molecule, MoleculeType};
use rand::rngs::StdRng;
use rand::Rng;

/// Capability the engine depends on: mutate the environment given the tick
/// number and a seeded rng.
pub trait EnergyDistribution: Send + std::fmt::Debug {
    /// Strategy name for logs and status.
    fn name(&self) -> &str;
    /// Place energy for tick `tick`.
    fn distribute(&mut self, env: &mut Environment, tick: u64, rng: &mut StdRng);
}

/// Scatter single energy molecules on random empty cells.
#[derive(Debug)]
pub struct RandomScatter {
    interval: u64,
    count: usize,
    amount: i32,
}

impl EnergyDistribution for RandomScatter {
    fn name(&self) -> &str {
        "random"
    }

    fn distribute(&mut self, env: &mut Environment, tick: u64, rng: &mut StdRng) {
        if tick % self.interval != 0 {
            return;
        }
        for _ in 0..self.count {
            let coord = random_coord(env, rng);
            if let Ok(molecule) = env.get(&coord) {
                if molecule.is_empty() {
                    let _ = env.set(&coord, Molecule::new(MoleculeType::Energy, self.amount), 0);
                }
            }
        }
    }
}

/// Lay a straight run of energy molecules along a random axis.
#[derive(Debug)]
pub struct Vein {
    interval: u64,
    length: usize,
    amount: i32,
}

impl EnergyDistribution for Vein {
    fn name(&self) -> &str {
        "vein"
    }

    fn distribute(&mut self, env: &mut Environment, tick: u64, rng: &mut StdRng) {
        if tick % self.interval != 0 {
            return;
        }
        let start = random_coord(env, rng);
        let axis = rng.gen_range(0..env.dims());
        let mut dv = vec![0i32; env.dims()];
        dv[axis] = 1;
        for step in 0..self.length {
            let coord = match env.offset(&start, &dv, step as i32) {
                Ok(coord) => coord,
                Err(_) => break,
            };
            if let Ok(molecule) = env.get(&coord) {
                if molecule.is_empty() {
                    let _ = env.set(&coord, Molecule::new(MoleculeType::Energy, self.amount), 0);
                }
            }
        }
    }
}

fn random_coord(env: &Environment, rng: &mut StdRng) -> Coord {
    env.shape().iter().map(|&d| rng.gen_range(0..d)).collect()
}

/// Build the strategies named in the configuration. Unknown strategy types
/// are a fatal startup error.
pub fn build_strategies(
    configs: &[EnergyStrategyConfig],
) -> Result<Vec<Box<dyn EnergyDistribution>>> {
    configs
        .iter()
        .map(|config| {
            let param = |key: &str, default: i64| -> i64 {
                config.params.get(key).copied().unwrap_or(default)
            };
            match config.strategy_type.as_str() {
                "random" => Ok(Box::new(RandomScatter {
                    interval: param("interval", 1).max(1) as u64,
                    count: param("count", 1).max(0) as usize,
                    amount: param("amount", 100) as i32,
                }) as Box<dyn EnergyDistribution>),
                "vein" => Ok(Box::new(Vein {
                    interval: param("interval", 10).max(1) as u64,
                    length: param("length", 5).max(0) as usize,
                    amount: param("amount", 50) as i32,
                }) as Box<dyn EnergyDistribution>),
                unknown => Err(EngineError::Setup(format!(
                    "unknown energy strategy type: {}",
                    unknown
                ))),
            }
        })
        .collect()
}
