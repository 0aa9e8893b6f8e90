//! Evochora persistence service.
//!
//! Consumes [`RawTickState`] messages from the tick queue, serializes each
//! to its canonical JSON form, and appends them to the raw store in atomic
//! batches keyed by tick number. A batch commits when it reaches the
//! configured size, when the flush timeout since its oldest message elapses,
//! or at a pause/stop boundary. Transient store errors are retried with
//! bounded backoff; an uncommitted batch is never dropped.

use evochora_channel::{
    bounded, select, Receiver, Request, Sender, TryRecvError, CONTROL_CHANNEL_SIZE,
};
use evochora_core::RawTickState;
use evochora_db::TickStore;
use evochora_queue::TickQueue;
use evochora_stop_handler::new_crossbeam_exit_rx;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(50);
const RETRY_LIMIT: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Lifecycle commands accepted by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceCommand {
    Pause,
    Resume,
    Stop,
}

/// Cloneable handle to a running persistence worker.
#[derive(Clone)]
pub struct PersistenceController {
    control: Sender<Request<PersistenceCommand, ()>>,
    // stored as tick + 1 so 0 means "nothing persisted yet"
    last_persisted: Arc<AtomicU64>,
    commits: Arc<AtomicUsize>,
}

impl PersistenceController {
    /// Pause at the next batch boundary; the in-flight batch commits first.
    pub fn pause(&self) -> bool {
        Request::call(&self.control, PersistenceCommand::Pause).is_some()
    }

    /// Resume a paused worker.
    pub fn resume(&self) -> bool {
        Request::call(&self.control, PersistenceCommand::Resume).is_some()
    }

    /// Stop the worker, flushing pending messages first.
    pub fn stop(&self) -> bool {
        Request::call(&self.control, PersistenceCommand::Stop).is_some()
    }

    /// Highest tick number known to be committed.
    pub fn last_persisted_tick(&self) -> Option<u64> {
        match self.last_persisted.load(Ordering::SeqCst) {
            0 => None,
            offset => Some(offset - 1),
        }
    }

    /// Number of atomic store commits so far.
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

/// The persistence background service.
pub struct PersistenceService {
    queue: Arc<TickQueue>,
    store: TickStore,
    batch_size: usize,
    flush_interval: Duration,
}

impl PersistenceService {
    /// Create a service writing to `store` with the given batching
    /// parameters.
    pub fn new(
        queue: Arc<TickQueue>,
        store: TickStore,
        batch_size: usize,
        flush_interval: Duration,
    ) -> PersistenceService {
        PersistenceService {
            queue,
            store,
            batch_size,
            flush_interval,
        }
    }

    /// Spawn the worker thread.
    pub fn start<S: ToString>(
        self,
        thread_name: Option<S>,
    ) -> (JoinHandle<()>, PersistenceController) {
        let (control_tx, control_rx) = bounded(CONTROL_CHANNEL_SIZE);
        let last_persisted = Arc::new(AtomicU64::new(0));
        let commits = Arc::new(AtomicUsize::new(0));

        let mut thread_builder = thread::Builder::new();
        if let Some(name) = thread_name {
            thread_builder = thread_builder.name(name.to_string());
        }
        let worker = Worker {
            queue: self.queue,
            store: self.store,
            batch_size: self.batch_size,
            flush_interval: self.flush_interval,
            last_persisted: Arc::clone(&last_persisted),
            commits: Arc::clone(&commits),
            batch: Vec::new(),
            oldest_pending: None,
        };
        let join_handle = thread_builder
            .spawn(move || worker.run(control_rx))
            .expect("start PersistenceService failed");

        (
            join_handle,
            PersistenceController {
                control: control_tx,
                last_persisted,
                commits,
            },
        )
    }
}

struct Worker {
    queue: Arc<TickQueue>,
    store: TickStore,
    batch_size: usize,
    flush_interval: Duration,
    last_persisted: Arc<AtomicU64>,
    commits: Arc<AtomicUsize>,
    batch: Vec<RawTickState>,
    oldest_pending: Option<Instant>,
}

impl Worker {
    fn run(mut self, control_rx: Receiver<Request<PersistenceCommand, ()>>) {
        let signal_receiver = new_crossbeam_exit_rx();
        let mut paused = false;

        loop {
            if paused {
                select! {
                    recv(control_rx) -> msg => match msg {
                        Ok(request) => {
                            if self.handle(request, &mut paused) {
                                break;
                            }
                        }
                        Err(_) => break,
                    },
                    recv(signal_receiver) -> _ => {
                        info!("PersistenceService received exit signal, exit now");
                        self.flush();
                        break;
                    }
                }
                continue;
            }

            // Batch boundary: control and exit first.
            match control_rx.try_recv() {
                Ok(request) => {
                    if self.handle(request, &mut paused) {
                        break;
                    }
                    continue;
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    self.flush();
                    break;
                }
            }
            if !matches!(signal_receiver.try_recv(), Err(TryRecvError::Empty)) {
                info!("PersistenceService received exit signal, exit now");
                self.flush();
                break;
            }

            match self.queue.poll_timeout(QUEUE_POLL_INTERVAL) {
                Some(message) => {
                    if self.batch.is_empty() {
                        self.oldest_pending = Some(Instant::now());
                    }
                    self.batch.push(message);
                    if self.batch.len() >= self.batch_size {
                        self.flush();
                    }
                }
                None => {
                    if self.queue.is_closed() && self.queue.size() == 0 {
                        info!("tick queue closed and drained, persistence exits");
                        self.flush();
                        break;
                    }
                    let timed_out = self
                        .oldest_pending
                        .map(|oldest| oldest.elapsed() >= self.flush_interval)
                        .unwrap_or(false);
                    if timed_out && !self.batch.is_empty() {
                        self.flush();
                    }
                }
            }
        }
    }

    /// Apply a command; pause and stop flush first so the atomic unit of
    /// work completes before the acknowledgement.
    fn handle(&mut self, request: Request<PersistenceCommand, ()>, paused: &mut bool) -> bool {
        let Request {
            responder,
            arguments,
        } = request;
        let stop = match arguments {
            PersistenceCommand::Pause => {
                self.flush();
                *paused = true;
                false
            }
            PersistenceCommand::Resume => {
                *paused = false;
                false
            }
            PersistenceCommand::Stop => {
                self.flush();
                true
            }
        };
        let _ = responder.send(());
        stop
    }

    /// Commit the pending batch in one atomic write.
    ///
    /// On persistent store failure the batch is kept; the next loop turn
    /// retries. A message that cannot be serialized is dropped and logged;
    /// it never stalls the pipeline.
    fn flush(&mut self) {
        if self.batch.is_empty() {
            return;
        }

        let mut tick_batch = self.store.tick_batch();
        let mut highest = 0u64;
        let mut rows = 0usize;
        for message in &self.batch {
            let json = match serde_json::to_string(message) {
                Ok(json) => json,
                Err(err) => {
                    error!(
                        "dropping unserializable tick {}: {}",
                        message.tick_number, err
                    );
                    continue;
                }
            };
            if let Err(err) = tick_batch.put_tick(message.tick_number, json.as_bytes()) {
                error!("failed to stage tick {}: {}", message.tick_number, err);
                return;
            }
            highest = highest.max(message.tick_number);
            rows += 1;
        }
        if rows == 0 {
            self.batch.clear();
            self.oldest_pending = None;
            return;
        }

        for attempt in 1..=RETRY_LIMIT {
            match self.store.commit(&tick_batch) {
                Ok(()) => {
                    debug!("committed {} raw ticks up to {}", rows, highest);
                    self.commits.fetch_add(1, Ordering::SeqCst);
                    self.last_persisted
                        .fetch_max(highest + 1, Ordering::SeqCst);
                    self.batch.clear();
                    self.oldest_pending = None;
                    return;
                }
                Err(err) if attempt < RETRY_LIMIT => {
                    warn!(
                        "raw store commit failed (attempt {}/{}): {}",
                        attempt, RETRY_LIMIT, err
                    );
                    thread::sleep(RETRY_BACKOFF * attempt);
                }
                Err(err) => {
                    error!(
                        "raw store commit still failing after {} attempts, keeping batch: {}",
                        RETRY_LIMIT, err
                    );
                }
            }
        }
    }

}

#[cfg(test)]
mod tests;
