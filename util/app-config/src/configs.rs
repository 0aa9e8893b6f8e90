//! Configuration structs mirroring the TOML schema.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Default queue byte budget: 512 MiB.
const DEFAULT_QUEUE_MAX_BYTES: usize = 512 << 20;
/// Default rows per atomic store commit.
const DEFAULT_BATCH_SIZE: usize = 1000;
/// Default persistence flush timeout in milliseconds.
const DEFAULT_FLUSH_INTERVAL_MS: u64 = 500;
/// Default indexer idle backoff in milliseconds.
const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// The simulated world and its seeding.
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// The data pipeline behind the engine.
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// `[simulation]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationConfig {
    /// World geometry.
    #[serde(default)]
    pub environment: EnvironmentConfig,
    /// Master RNG seed; all randomness in a run derives from it.
    #[serde(default)]
    pub seed: u64,
    /// Energy distribution creators invoked before each tick's Plan phase.
    #[serde(default)]
    pub energy_strategies: Vec<EnergyStrategyConfig>,
    /// Programs placed into the world at startup.
    #[serde(default)]
    pub organisms: Vec<OrganismSeedConfig>,
    /// Stop the engine after this many ticks; `None` runs until stopped.
    #[serde(default)]
    pub max_ticks: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            environment: EnvironmentConfig::default(),
            seed: 0,
            energy_strategies: Vec::new(),
            organisms: Vec::new(),
            max_ticks: None,
        }
    }
}

/// `[simulation.environment]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentConfig {
    /// World extents per axis.
    pub shape: Vec<u32>,
    /// Wrap-around edges when true, bounded edges when false.
    #[serde(default = "default_toroidal")]
    pub toroidal: bool,
}

fn default_toroidal() -> bool {
    true
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        EnvironmentConfig {
            shape: vec![100, 100],
            toroidal: true,
        }
    }
}

/// One `[[simulation.energy_strategies]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnergyStrategyConfig {
    /// Creator name, e.g. `"random"` or `"geyser"`.
    #[serde(rename = "type")]
    pub strategy_type: String,
    /// Creator-specific integer parameters.
    #[serde(default)]
    pub params: HashMap<String, i64>,
}

/// One `[[simulation.organisms]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrganismSeedConfig {
    /// Path to the program artifact JSON produced by the assembler.
    pub program: PathBuf,
    /// Placement origin for the program layout and the organism's IP.
    pub placement: Vec<i32>,
    /// Initial energy register value.
    pub energy: i64,
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Tick queue sizing.
    #[serde(default)]
    pub queue: QueueConfig,
    /// Raw tick persistence service.
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Debug indexer service.
    #[serde(default)]
    pub indexer: IndexerConfig,
    /// Read-side API (external collaborator; recognized but not managed here).
    #[serde(default)]
    pub server: ServerConfig,
}

/// `[pipeline.queue]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    /// Byte budget before producers block.
    #[serde(default = "default_queue_max_bytes")]
    pub max_bytes: usize,
}

fn default_queue_max_bytes() -> usize {
    DEFAULT_QUEUE_MAX_BYTES
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            max_bytes: DEFAULT_QUEUE_MAX_BYTES,
        }
    }
}

/// `[pipeline.persistence]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PersistenceConfig {
    /// Messages per atomic write.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Flush timeout since the oldest pending message, in milliseconds.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// Raw store directory.
    #[serde(default = "default_raw_path")]
    pub path: PathBuf,
    /// Start with the service manager.
    #[serde(default = "default_auto_start")]
    pub auto_start: bool,
    /// Store tuning knobs.
    #[serde(default)]
    pub database: DBConfig,
    /// Trade write-buffer memory for throughput.
    #[serde(default)]
    pub memory_optimization: MemoryOptimizationConfig,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_flush_interval_ms() -> u64 {
    DEFAULT_FLUSH_INTERVAL_MS
}

fn default_raw_path() -> PathBuf {
    PathBuf::from("data/raw_ticks")
}

fn default_prepared_path() -> PathBuf {
    PathBuf::from("data/prepared_ticks")
}

fn default_auto_start() -> bool {
    true
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        PersistenceConfig {
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            path: default_raw_path(),
            auto_start: true,
            database: DBConfig::default(),
            memory_optimization: MemoryOptimizationConfig::default(),
        }
    }
}

/// `[pipeline.indexer]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexerConfig {
    /// Prepared rows per atomic commit.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Idle backoff when no new raw rows are available, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Prepared store directory.
    #[serde(default = "default_prepared_path")]
    pub path: PathBuf,
    /// Start with the service manager.
    #[serde(default = "default_auto_start")]
    pub auto_start: bool,
    /// On-disk compression of prepared rows.
    #[serde(default)]
    pub compression: CompressionConfig,
    /// Concurrent tick transformation (commits stay ordered).
    #[serde(default)]
    pub parallel: ParallelConfig,
    /// Store tuning knobs.
    #[serde(default)]
    pub database: DBConfig,
    /// Skip a tick whose transformation fails instead of halting.
    #[serde(default)]
    pub skip_failed: bool,
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

impl Default for IndexerConfig {
    fn default() -> Self {
        IndexerConfig {
            batch_size: DEFAULT_BATCH_SIZE,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            path: default_prepared_path(),
            auto_start: true,
            compression: CompressionConfig::default(),
            parallel: ParallelConfig::default(),
            database: DBConfig::default(),
            skip_failed: false,
        }
    }
}

/// `[pipeline.server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Read-side API port.
    #[serde(default = "default_server_port")]
    pub port: u16,
    /// Start with the service manager.
    #[serde(default)]
    pub auto_start: bool,
}

fn default_server_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: default_server_port(),
            auto_start: false,
        }
    }
}

/// Store tuning. Performance only; never changes semantics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DBConfig {
    /// Block cache size in bytes; `Some(0)` disables the cache.
    #[serde(default)]
    pub cache_size: Option<usize>,
    /// Enable memory-mapped reads when positive.
    #[serde(default)]
    pub mmap_size: Option<usize>,
    /// On-disk block size in bytes.
    #[serde(default)]
    pub page_size: Option<usize>,
    /// Raw store options passed through to the backend.
    #[serde(default)]
    pub options: HashMap<String, String>,
}

/// `memory_optimization` toggle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryOptimizationConfig {
    /// Shrink write buffers at the cost of write throughput.
    #[serde(default)]
    pub enabled: bool,
}

/// `compression` toggle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompressionConfig {
    /// Compress prepared rows on disk.
    #[serde(default)]
    pub enabled: bool,
}

/// `parallel` worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParallelConfig {
    /// Transform ticks concurrently.
    #[serde(default)]
    pub enabled: bool,
    /// Worker count; 0 means "number of cores".
    #[serde(default)]
    pub threads: usize,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        ParallelConfig {
            enabled: false,
            threads: 0,
        }
    }
}
