//! The write side of a tick store.

use crate::{internal_error, Result};
use byteorder::{BigEndian, ByteOrder};
use evochora_app_config::DBConfig;
use rocksdb::ops::{GetColumnFamilys, GetPinnedCF, IterateCF, OpenCF, PutCF, SetOptions, WriteOps};
use rocksdb::{
    BlockBasedOptions, ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode,
    OptimisticTransaction, OptimisticTransactionDB, OptimisticTransactionOptions, Options,
    ReadOptions, WriteBatch, WriteOptions,
};
use std::path::Path;
use std::sync::Arc;

/// Tick rows, keyed by big-endian tick number.
pub(crate) const COLUMN_TICKS: &str = "ticks";
/// Store bookkeeping, e.g. the indexer's high-water mark.
pub(crate) const COLUMN_META: &str = "meta";
pub(crate) const COLUMN_NAMES: [&str; 2] = [COLUMN_TICKS, COLUMN_META];

const META_LAST_PROCESSED_TICK: &[u8] = b"last_processed_tick";

const DEFAULT_CACHE_SIZE: usize = 128 << 20;
const MEMORY_OPTIMIZED_WRITE_BUFFER_SIZE: usize = 4 << 20;

/// Encode a tick number as its row key. Big-endian, so the store's
/// lexicographic key order is the numeric tick order every range scan in
/// the pipeline relies on.
pub(crate) fn tick_key(tick_number: u64) -> [u8; 8] {
    let mut key = [0u8; 8];
    BigEndian::write_u64(&mut key, tick_number);
    key
}

pub(crate) fn tick_from_key(key: &[u8]) -> Option<u64> {
    if key.len() == 8 {
        Some(BigEndian::read_u64(key))
    } else {
        None
    }
}

/// Write-capable handle to one tick store.
///
/// Exactly one service owns one per store; everything a writer does goes
/// through an atomic unit, either a [`TickBatch`] or a [`TickTransaction`],
/// so a partially written batch is never visible.
#[derive(Clone)]
pub struct TickStore {
    inner: Arc<OptimisticTransactionDB>,
}

impl TickStore {
    /// Open (or create) a tick store with the configured tuning.
    pub fn open<P: AsRef<Path>>(path: P, config: &DBConfig) -> Result<TickStore> {
        Self::open_with(path, config, false)
    }

    /// Open a tick store in the given directory with default tuning.
    pub fn open_in<P: AsRef<Path>>(path: P) -> Result<TickStore> {
        Self::open_with(path, &DBConfig::default(), false)
    }

    /// Open a tick store with shrunken write buffers, trading write
    /// throughput for resident memory.
    pub fn open_memory_optimized<P: AsRef<Path>>(
        path: P,
        config: &DBConfig,
    ) -> Result<TickStore> {
        Self::open_with(path, config, true)
    }

    fn open_with<P: AsRef<Path>>(
        path: P,
        config: &DBConfig,
        memory_optimized: bool,
    ) -> Result<TickStore> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        if memory_optimized {
            opts.set_write_buffer_size(MEMORY_OPTIMIZED_WRITE_BUFFER_SIZE);
        }

        // cache_size maps to the block cache, page_size to the on-disk
        // block size, mmap_size toggles mmap reads; all performance only.
        let mut block_opts = BlockBasedOptions::default();
        if let Some(page_size) = config.page_size {
            block_opts.set_block_size(page_size);
        }
        match config.cache_size {
            Some(0) => {}
            Some(size) => block_opts.set_lru_cache(size),
            None => block_opts.set_lru_cache(DEFAULT_CACHE_SIZE),
        }
        opts.set_block_based_table_factory(&block_opts);
        if config.mmap_size.unwrap_or(0) > 0 {
            opts.set_allow_mmap_reads(true);
        }

        let cf_descriptors: Vec<_> = COLUMN_NAMES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();
        let db = OptimisticTransactionDB::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|err| internal_error(format!("failed to open tick store: {}", err)))?;

        if !config.options.is_empty() {
            let raw_options: Vec<(&str, &str)> = config
                .options
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect();
            db.set_options(&raw_options)
                .map_err(|_| internal_error("failed to set tick store option"))?;
        }

        Ok(TickStore {
            inner: Arc::new(db),
        })
    }

    /// The payload stored for one tick.
    pub fn tick(&self, tick_number: u64) -> Result<Option<Vec<u8>>> {
        let cf = cf_handle(&self.inner, COLUMN_TICKS)?;
        let value = self
            .inner
            .get_pinned_cf(cf, &tick_key(tick_number))
            .map_err(internal_error)?;
        Ok(value.map(|v| v.as_ref().to_vec()))
    }

    /// Stored ticks from `from` upward, ascending, at most `limit` rows.
    pub fn scan_ticks(&self, from: u64, limit: usize) -> Result<Vec<(u64, Vec<u8>)>> {
        let cf = cf_handle(&self.inner, COLUMN_TICKS)?;
        let from_key = tick_key(from);
        let iter = self
            .inner
            .iterator_cf_opt(
                cf,
                IteratorMode::From(&from_key, Direction::Forward),
                &ReadOptions::default(),
            )
            .map_err(internal_error)?;
        Ok(iter
            .take(limit)
            .filter_map(|(key, value)| {
                tick_from_key(&key).map(|tick| (tick, value.to_vec()))
            })
            .collect())
    }

    /// The indexer high-water mark, if one was ever committed.
    pub fn last_processed_tick(&self) -> Result<Option<u64>> {
        let cf = cf_handle(&self.inner, COLUMN_META)?;
        let value = self
            .inner
            .get_pinned_cf(cf, META_LAST_PROCESSED_TICK)
            .map_err(internal_error)?;
        Ok(value.and_then(|v| tick_from_key(v.as_ref())))
    }

    /// Begin an empty batch of tick rows.
    pub fn tick_batch(&self) -> TickBatch {
        TickBatch {
            db: Arc::clone(&self.inner),
            inner: WriteBatch::default(),
        }
    }

    /// Commit a batch atomically: every staged row becomes visible or none
    /// does.
    pub fn commit(&self, batch: &TickBatch) -> Result<()> {
        self.inner.write(&batch.inner).map_err(internal_error)
    }

    /// Begin a transaction over tick rows and store metadata, reading from
    /// a consistent snapshot.
    pub fn transaction(&self) -> TickTransaction {
        let write_options = WriteOptions::default();
        let mut transaction_options = OptimisticTransactionOptions::new();
        transaction_options.set_snapshot(true);

        TickTransaction {
            db: Arc::clone(&self.inner),
            inner: self.inner.transaction(&write_options, &transaction_options),
        }
    }
}

/// Tick rows staged for one atomic commit.
///
/// This is the persistence service's unit of work: a flush stages every
/// serialized tick of the in-memory batch and commits them in one write.
pub struct TickBatch {
    db: Arc<OptimisticTransactionDB>,
    inner: WriteBatch,
}

impl TickBatch {
    /// Stage one tick payload. Staging the same tick again replaces the
    /// row, which is what makes reprocessing idempotent.
    pub fn put_tick(&mut self, tick_number: u64, payload: &[u8]) -> Result<()> {
        let cf = cf_handle(&self.db, COLUMN_TICKS)?;
        self.inner
            .put_cf(cf, &tick_key(tick_number), payload)
            .map_err(internal_error)
    }

    /// Number of staged rows.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Does this batch hold no rows?
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// A transaction coupling tick rows with the store metadata that must move
/// with them.
///
/// The indexer commits every prepared batch together with its advanced
/// high-water mark through one of these, so a restart can trust
/// `last_processed_tick` to name a fully committed row.
pub struct TickTransaction {
    db: Arc<OptimisticTransactionDB>,
    inner: OptimisticTransaction,
}

impl TickTransaction {
    /// Write one tick payload inside the transaction.
    pub fn put_tick(&self, tick_number: u64, payload: &[u8]) -> Result<()> {
        let cf = cf_handle(&self.db, COLUMN_TICKS)?;
        self.inner
            .put_cf(cf, &tick_key(tick_number), payload)
            .map_err(internal_error)
    }

    /// Advance the high-water mark inside the transaction.
    pub fn set_last_processed_tick(&self, tick_number: u64) -> Result<()> {
        let cf = cf_handle(&self.db, COLUMN_META)?;
        self.inner
            .put_cf(cf, META_LAST_PROCESSED_TICK, &tick_key(tick_number))
            .map_err(internal_error)
    }

    /// Commit the transaction.
    pub fn commit(&self) -> Result<()> {
        self.inner.commit().map_err(internal_error)
    }

    /// Roll the transaction back.
    pub fn rollback(&self) -> Result<()> {
        self.inner.rollback().map_err(internal_error)
    }
}

#[inline]
pub(crate) fn cf_handle<'a>(
    db: &'a OptimisticTransactionDB,
    col: &str,
) -> Result<&'a ColumnFamily> {
    db.cf_handle(col)
        .ok_or_else(|| internal_error(format!("column {} not found", col)))
}
