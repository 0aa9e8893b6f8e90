//! Evochora debug indexer.
//!
//! A downstream consumer of the raw tick store: it re-reads raw rows in
//! ascending tick order, enriches them with disassembly and call-frame
//! resolution, and writes the result into the prepared store used by the
//! read-side API. The high-water mark `last_processed_tick` lives in the
//! prepared store's meta column and commits atomically with every batch, so
//! a restart resumes exactly after the last durable row. Transformation may
//! run on a worker pool; commits stay in strict ascending tick order.

mod transform;

pub use transform::{render_value, TickTransformer};

use evochora_channel::{
    bounded, Receiver, RecvTimeoutError, Request, Sender, TryRecvError, CONTROL_CHANNEL_SIZE,
};
use evochora_core::RawTickState;
use evochora_db::{ReadOnlyTickStore, TickStore};
use evochora_stop_handler::new_crossbeam_exit_rx;
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

const COMMIT_RETRY_LIMIT: u32 = 3;
const COMMIT_RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Indexer failures.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Store-level failure.
    #[error("indexer store error: {0}")]
    Db(#[from] evochora_db::Error),
    /// A raw row that does not deserialize.
    #[error("failed to decode raw tick {tick}: {reason}")]
    Decode {
        tick: u64,
        reason: String,
    },
}

/// Tuning knobs for the indexer worker.
#[derive(Debug, Clone)]
pub struct IndexerOptions {
    /// Raw rows per read-and-commit cycle.
    pub batch_size: usize,
    /// Idle backoff when no new raw rows exist.
    pub poll_interval: Duration,
    /// Compress prepared rows with snappy.
    pub compression: bool,
    /// Transformation worker count; 0 or 1 disables the pool.
    pub parallel_threads: usize,
    /// Skip a tick whose transformation fails instead of halting.
    pub skip_failed: bool,
}

impl Default for IndexerOptions {
    fn default() -> Self {
        IndexerOptions {
            batch_size: 1000,
            poll_interval: Duration::from_millis(100),
            compression: false,
            parallel_threads: 0,
            skip_failed: false,
        }
    }
}

/// Lifecycle commands accepted by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexerCommand {
    Pause,
    Resume,
    Stop,
}

/// Cloneable handle to a running indexer worker.
#[derive(Clone)]
pub struct IndexerController {
    control: Sender<Request<IndexerCommand, ()>>,
    // stored as tick + 1 so 0 means "nothing processed yet"
    last_processed: Arc<AtomicU64>,
}

impl IndexerController {
    /// Pause at the next batch boundary.
    pub fn pause(&self) -> bool {
        Request::call(&self.control, IndexerCommand::Pause).is_some()
    }

    /// Resume a paused worker.
    pub fn resume(&self) -> bool {
        Request::call(&self.control, IndexerCommand::Resume).is_some()
    }

    /// Stop the worker for good.
    pub fn stop(&self) -> bool {
        Request::call(&self.control, IndexerCommand::Stop).is_some()
    }

    /// Highest tick fully committed to the prepared store.
    pub fn last_processed_tick(&self) -> Option<u64> {
        match self.last_processed.load(Ordering::SeqCst) {
            0 => None,
            offset => Some(offset - 1),
        }
    }
}

/// The indexer background service.
pub struct IndexerService {
    raw_path: PathBuf,
    prepared: TickStore,
    transformer: Arc<TickTransformer>,
    options: IndexerOptions,
}

impl IndexerService {
    /// Create a service reading raw rows from the store at `raw_path` and
    /// writing prepared rows through `prepared`.
    ///
    /// The raw store is only ever opened read-only; it is re-opened per
    /// scan so rows committed by the persistence writer after our last
    /// open become visible.
    pub fn new(
        raw_path: PathBuf,
        prepared: TickStore,
        transformer: Arc<TickTransformer>,
        options: IndexerOptions,
    ) -> IndexerService {
        IndexerService {
            raw_path,
            prepared,
            transformer,
            options,
        }
    }

    /// Spawn the worker thread.
    pub fn start<S: ToString>(self, thread_name: Option<S>) -> (JoinHandle<()>, IndexerController) {
        let (control_tx, control_rx) = bounded(CONTROL_CHANNEL_SIZE);
        let last_processed = Arc::new(AtomicU64::new(0));

        let mut thread_builder = thread::Builder::new();
        if let Some(name) = thread_name {
            thread_builder = thread_builder.name(name.to_string());
        }
        let worker_mark = Arc::clone(&last_processed);
        let join_handle = thread_builder
            .spawn(move || self.run(control_rx, worker_mark))
            .expect("start IndexerService failed");

        (
            join_handle,
            IndexerController {
                control: control_tx,
                last_processed,
            },
        )
    }

    fn run(
        self,
        control_rx: Receiver<Request<IndexerCommand, ()>>,
        mark: Arc<AtomicU64>,
    ) {
        let signal_receiver = new_crossbeam_exit_rx();
        let mut paused = false;

        // Restart semantics: resume strictly after the last committed tick.
        let mut next_tick = match self.read_high_water_mark() {
            Ok(Some(tick)) => {
                info!("indexer resuming after tick {}", tick);
                mark.store(tick + 1, Ordering::SeqCst);
                tick + 1
            }
            Ok(None) => 0,
            Err(err) => {
                error!("indexer cannot read its high-water mark: {}", err);
                return;
            }
        };

        loop {
            // Batch boundary: control and exit first.
            match control_rx.try_recv() {
                Ok(request) => {
                    if Self::handle(request, &mut paused) {
                        break;
                    }
                    continue;
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => break,
            }
            if !matches!(signal_receiver.try_recv(), Err(TryRecvError::Empty)) {
                info!("IndexerService received exit signal, exit now");
                break;
            }
            if paused {
                // Idle but responsive while paused.
                match control_rx.recv_timeout(self.options.poll_interval) {
                    Ok(request) => {
                        if Self::handle(request, &mut paused) {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
                continue;
            }

            let rows = match self.scan_raw(next_tick) {
                Ok(rows) => rows,
                Err(err) => {
                    warn!("raw store scan failed, backing off: {}", err);
                    thread::sleep(self.options.poll_interval);
                    continue;
                }
            };
            if rows.is_empty() {
                thread::sleep(self.options.poll_interval);
                continue;
            }

            match self.process_batch(&rows) {
                Ok(Some(advanced_to)) => {
                    next_tick = advanced_to + 1;
                    mark.store(advanced_to + 1, Ordering::SeqCst);
                }
                Ok(None) => {
                    // nothing committed (halted on the first row); back off
                    thread::sleep(self.options.poll_interval);
                }
                Err(err) => {
                    warn!("prepared store commit failed, will retry: {}", err);
                    thread::sleep(self.options.poll_interval);
                }
            }
        }
    }

    fn handle(request: Request<IndexerCommand, ()>, paused: &mut bool) -> bool {
        let Request {
            responder,
            arguments,
        } = request;
        let stop = match arguments {
            IndexerCommand::Pause => {
                *paused = true;
                false
            }
            IndexerCommand::Resume => {
                *paused = false;
                false
            }
            IndexerCommand::Stop => true,
        };
        let _ = responder.send(());
        stop
    }

    fn read_high_water_mark(&self) -> Result<Option<u64>, IndexerError> {
        Ok(self.prepared.last_processed_tick()?)
    }

    /// Read up to `batch_size` raw rows starting at tick `from`.
    ///
    /// Raw tick numbers are dense (the engine never skips one), so the scan
    /// walks sequential ticks through the read-only handle and stops at the
    /// first missing row.
    fn scan_raw(&self, from: u64) -> Result<Vec<(u64, Vec<u8>)>, IndexerError> {
        let raw = match ReadOnlyTickStore::open(&self.raw_path)? {
            Some(store) => store,
            None => return Ok(Vec::new()), // store not created yet
        };
        let mut rows = Vec::new();
        for tick in from..from.saturating_add(self.options.batch_size as u64) {
            match raw.tick(tick)? {
                Some(payload) => rows.push((tick, payload)),
                None => break,
            }
        }
        Ok(rows)
    }

    /// Transform and commit one batch. Returns the tick the high-water
    /// mark advanced to, or `None` when the first row already failed under
    /// the halt policy.
    fn process_batch(&self, rows: &[(u64, Vec<u8>)]) -> Result<Option<u64>, IndexerError> {
        let results = self.transform_batch(rows);

        let mut prepared_rows = Vec::with_capacity(rows.len());
        let mut advance_to: Option<u64> = None;
        for ((tick, _), result) in rows.iter().zip(results) {
            match result {
                Ok(prepared) => {
                    prepared_rows.push((*tick, prepared));
                    advance_to = Some(*tick);
                }
                Err(err) if self.options.skip_failed => {
                    warn!("skipping tick {} after transformation error: {}", tick, err);
                    advance_to = Some(*tick);
                }
                Err(err) => {
                    error!(
                        "transformation of tick {} failed, halting advancement: {}",
                        tick, err
                    );
                    break;
                }
            }
        }
        let advance_to = match advance_to {
            Some(tick) => tick,
            None => return Ok(None),
        };

        self.commit(&prepared_rows, advance_to)?;
        debug!(
            "indexed {} ticks, high-water mark now {}",
            prepared_rows.len(),
            advance_to
        );
        Ok(Some(advance_to))
    }

    /// Transform rows, optionally on a bounded worker pool. Results keep
    /// their input positions, which is what keeps commits tick-ordered.
    fn transform_batch(
        &self,
        rows: &[(u64, Vec<u8>)],
    ) -> Vec<Result<evochora_core::PreparedTickState, IndexerError>> {
        let threads = self.options.parallel_threads;
        if threads <= 1 || rows.len() <= 1 {
            return rows.iter().map(|row| self.transform_row(row)).collect();
        }

        let chunk_size = rows.len().div_ceil(threads);
        let mut results: Vec<Option<Result<_, _>>> = (0..rows.len()).map(|_| None).collect();
        thread::scope(|scope| {
            for (row_chunk, result_chunk) in
                rows.chunks(chunk_size).zip(results.chunks_mut(chunk_size))
            {
                scope.spawn(move || {
                    for (row, slot) in row_chunk.iter().zip(result_chunk.iter_mut()) {
                        *slot = Some(self.transform_row(row));
                    }
                });
            }
        });
        results
            .into_iter()
            .map(|slot| slot.expect("transformation worker filled every slot"))
            .collect()
    }

    fn transform_row(
        &self,
        (tick, bytes): &(u64, Vec<u8>),
    ) -> Result<evochora_core::PreparedTickState, IndexerError> {
        let raw: RawTickState =
            serde_json::from_slice(bytes).map_err(|err| IndexerError::Decode {
                tick: *tick,
                reason: err.to_string(),
            })?;
        Ok(self.transformer.transform(&raw))
    }

    /// Write prepared rows plus the advanced high-water mark in a single
    /// store transaction, with bounded retry.
    fn commit(
        &self,
        rows: &[(u64, evochora_core::PreparedTickState)],
        advance_to: u64,
    ) -> Result<(), IndexerError> {
        let mut last_err = None;
        for attempt in 1..=COMMIT_RETRY_LIMIT {
            let txn = self.prepared.transaction();
            let staged = (|| -> Result<(), IndexerError> {
                for (tick, prepared) in rows {
                    let json = serde_json::to_vec(prepared).map_err(|err| {
                        IndexerError::Decode {
                            tick: *tick,
                            reason: err.to_string(),
                        }
                    })?;
                    let payload = if self.options.compression {
                        snap::raw::Encoder::new()
                            .compress_vec(&json)
                            .map_err(|err| evochora_db::Error::Internal(err.to_string()))?
                    } else {
                        json
                    };
                    txn.put_tick(*tick, &payload)?;
                }
                txn.set_last_processed_tick(advance_to)?;
                txn.commit()?;
                Ok(())
            })();
            match staged {
                Ok(()) => return Ok(()),
                Err(err) => {
                    let _ = txn.rollback();
                    warn!(
                        "prepared commit attempt {}/{} failed: {}",
                        attempt, COMMIT_RETRY_LIMIT, err
                    );
                    last_err = Some(err);
                    thread::sleep(COMMIT_RETRY_BACKOFF * attempt);
                }
            }
        }
        Err(last_err.expect("retry loop ran at least once"))
    }
}
