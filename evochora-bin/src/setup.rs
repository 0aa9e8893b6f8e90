//! Service wiring: configuration in, a ready service manager out.

use evochora_app_config::{AppConfig, ExitCode};
use evochora_core::ProgramArtifact;
use evochora_db::TickStore;
use evochora_engine::{
    build_strategies, Environment, InstructionSet, Simulation, SimulationService,
};
use evochora_indexer::{IndexerOptions, IndexerService, TickTransformer};
use evochora_launcher::{ServiceControl, ServiceManager};
use evochora_persistence::PersistenceService;
use evochora_queue::TickQueue;
use log::info;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Fatal initialization failures, mapped onto process exit codes.
#[derive(Debug)]
pub enum SetupError {
    Config(String),
    Store(String),
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupError::Config(reason) => write!(f, "configuration error: {}", reason),
            SetupError::Store(reason) => write!(f, "store error: {}", reason),
        }
    }
}

impl SetupError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            SetupError::Config(_) => ExitCode::Config,
            SetupError::Store(_) => ExitCode::Io,
        }
    }
}

/// The wired pipeline.
pub struct Pipeline {
    pub manager: ServiceManager,
}

/// Build the whole pipeline from the configuration.
pub fn build(config: &AppConfig) -> Result<Pipeline, SetupError> {
    let shape = config.simulation.environment.shape.clone();
    let toroidal = config.simulation.environment.toroidal;
    let seed = config.simulation.seed;

    let strategies = build_strategies(&config.simulation.energy_strategies)
        .map_err(|err| SetupError::Config(err.to_string()))?;
    let iset = Arc::new(InstructionSet::new(shape.len()));
    let mut simulation = Simulation::new(
        Environment::new(&shape, toroidal),
        Arc::clone(&iset),
        strategies,
        seed,
    );

    let mut artifacts: HashMap<String, Arc<ProgramArtifact>> = HashMap::new();
    for seed_config in &config.simulation.organisms {
        let artifact = load_artifact(&seed_config.program)?;
        artifacts.insert(artifact.program_id.clone(), Arc::clone(&artifact));
        simulation
            .seed_program(artifact, &seed_config.placement, seed_config.energy)
            .map_err(|err| SetupError::Config(err.to_string()))?;
        info!(
            "seeded {} at {:?}",
            seed_config.program.display(),
            seed_config.placement
        );
    }

    let queue = Arc::new(TickQueue::new(config.pipeline.queue.max_bytes));

    let persistence_config = &config.pipeline.persistence;
    let raw_store = open_store(
        &persistence_config.path,
        &persistence_config.database,
        persistence_config.memory_optimization.enabled,
    )?;
    let indexer_config = &config.pipeline.indexer;
    let prepared_store = open_store(&indexer_config.path, &indexer_config.database, false)?;

    let mut manager = ServiceManager::new(STOP_TIMEOUT);
    manager.manage_queue(Arc::clone(&queue));

    // Registration order is also shutdown order: producer first.
    let sim_queue = Arc::clone(&queue);
    let max_ticks = config.simulation.max_ticks;
    manager.register(
        "simulation",
        true,
        Box::new(move || {
            let (handle, controller) =
                SimulationService::new(simulation, sim_queue, max_ticks).start(Some("SimulationService"));
            (handle, Box::new(controller) as Box<dyn ServiceControl>)
        }),
    );

    let persist_queue = Arc::clone(&queue);
    let persist_store = raw_store.clone();
    let batch_size = persistence_config.batch_size;
    let flush_interval = Duration::from_millis(persistence_config.flush_interval_ms);
    manager.register(
        "persistence",
        persistence_config.auto_start,
        Box::new(move || {
            let (handle, controller) =
                PersistenceService::new(persist_queue, persist_store, batch_size, flush_interval)
                    .start(Some("PersistenceService"));
            (handle, Box::new(controller) as Box<dyn ServiceControl>)
        }),
    );

    let transformer = Arc::new(TickTransformer::new(iset, artifacts, &shape, toroidal));
    let raw_path = persistence_config.path.clone();
    let options = IndexerOptions {
        batch_size: indexer_config.batch_size,
        poll_interval: Duration::from_millis(indexer_config.poll_interval_ms),
        compression: indexer_config.compression.enabled,
        parallel_threads: if indexer_config.parallel.enabled {
            if indexer_config.parallel.threads == 0 {
                num_cpus::get()
            } else {
                indexer_config.parallel.threads
            }
        } else {
            0
        },
        skip_failed: indexer_config.skip_failed,
    };
    let indexer_auto = indexer_config.auto_start;
    manager.register(
        "indexer",
        indexer_auto,
        Box::new(move || {
            let (handle, controller) =
                IndexerService::new(raw_path, prepared_store, transformer, options)
                    .start(Some("IndexerService"));
            (handle, Box::new(controller) as Box<dyn ServiceControl>)
        }),
    );

    Ok(Pipeline { manager })
}

fn load_artifact(path: &Path) -> Result<Arc<ProgramArtifact>, SetupError> {
    let bytes = std::fs::read(path).map_err(|err| {
        SetupError::Config(format!("cannot read program {}: {}", path.display(), err))
    })?;
    let artifact: ProgramArtifact = serde_json::from_slice(&bytes).map_err(|err| {
        SetupError::Config(format!("invalid program {}: {}", path.display(), err))
    })?;
    Ok(Arc::new(artifact))
}

fn open_store(
    path: &Path,
    tuning: &evochora_app_config::DBConfig,
    memory_optimized: bool,
) -> Result<TickStore, SetupError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|err| SetupError::Store(format!("cannot create {}: {}", parent.display(), err)))?;
    }
    let open = if memory_optimized {
        TickStore::open_memory_optimized(path, tuning)
    } else {
        TickStore::open(path, tuning)
    };
    open.map_err(|err| SetupError::Store(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use evochora_app_config::AppConfig;
    use std::io::Write;

    #[test]
    fn default_config_builds_a_pipeline() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.pipeline.persistence.path = tmp.path().join("raw");
        config.pipeline.indexer.path = tmp.path().join("prepared");
        let pipeline = build(&config).unwrap();
        assert_eq!(
            pipeline.manager.service_names(),
            vec!["simulation", "persistence", "indexer"]
        );
    }

    #[test]
    fn unknown_strategy_is_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.pipeline.persistence.path = tmp.path().join("raw");
        config.pipeline.indexer.path = tmp.path().join("prepared");
        config
            .simulation
            .energy_strategies
            .push(evochora_app_config::EnergyStrategyConfig {
                strategy_type: "warp".to_string(),
                params: Default::default(),
            });
        let err = build(&config).unwrap_err();
        assert!(matches!(err, SetupError::Config(_)));
        assert_eq!(err.exit_code(), ExitCode::Config);
    }

    #[test]
    fn seeded_artifact_is_loaded_from_json() {
        let tmp = tempfile::tempdir().unwrap();
        let program_path = tmp.path().join("prog.json");
        let artifact = ProgramArtifact::with_layout("demo", vec![(vec![0, 0], 1 << 30)]);
        let mut file = std::fs::File::create(&program_path).unwrap();
        file.write_all(serde_json::to_string(&artifact).unwrap().as_bytes())
            .unwrap();

        let mut config = AppConfig::default();
        config.pipeline.persistence.path = tmp.path().join("raw");
        config.pipeline.indexer.path = tmp.path().join("prepared");
        config
            .simulation
            .organisms
            .push(evochora_app_config::OrganismSeedConfig {
                program: program_path,
                placement: vec![0, 0],
                energy: 100,
            });
        build(&config).unwrap();
    }

    #[test]
    fn missing_program_file_is_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.pipeline.persistence.path = tmp.path().join("raw");
        config.pipeline.indexer.path = tmp.path().join("prepared");
        config
            .simulation
            .organisms
            .push(evochora_app_config::OrganismSeedConfig {
                program: tmp.path().join("nope.json"),
                placement: vec![0, 0],
                energy: 100,
            });
        assert!(matches!(build(&config), Err(SetupError::Config(_))));
    }
}
