//! Cooperative exit signal broadcast.
//!
//! Every long-lived Evochora service registers an exit receiver through
//! [`new_crossbeam_exit_rx`] and selects on it at its loop boundaries.
//! [`broadcast_exit_signals`] closes all registered channels at once, which
//! wakes every waiting service exactly once. Threads registered through
//! [`register_thread`] can be joined from the process entry point with
//! [`wait_all_services_exit`].

use evochora_channel::{bounded, Receiver, Sender};
use evochora_util::Mutex;
use log::{debug, warn};
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

static EXIT_SENDERS: Lazy<Mutex<Vec<Sender<()>>>> = Lazy::new(|| Mutex::new(Vec::new()));
static THREAD_HANDLES: Lazy<Mutex<Vec<(String, JoinHandle<()>)>>> =
    Lazy::new(|| Mutex::new(Vec::new()));
static EXITING: AtomicBool = AtomicBool::new(false);

/// Create a new exit receiver wired into the process-wide broadcast.
///
/// The receiver becomes ready (disconnected) once [`broadcast_exit_signals`]
/// has been called. If the broadcast already happened, the returned receiver
/// is ready immediately.
pub fn new_crossbeam_exit_rx() -> Receiver<()> {
    let (tx, rx) = bounded(1);
    if EXITING.load(Ordering::SeqCst) {
        // drop tx: rx observes a disconnected channel right away
        return rx;
    }
    EXIT_SENDERS.lock().push(tx);
    rx
}

/// Has the process-wide exit been requested?
pub fn has_received_stop_signal() -> bool {
    EXITING.load(Ordering::SeqCst)
}

/// Signal every registered exit receiver. Idempotent.
pub fn broadcast_exit_signals() {
    if EXITING.swap(true, Ordering::SeqCst) {
        debug!("exit signal already broadcast");
        return;
    }
    debug!("broadcasting exit signal to all services");
    // Dropping the senders disconnects the channels; a disconnected channel
    // is permanently ready for `recv`, so late selects still observe it.
    EXIT_SENDERS.lock().clear();
}

/// Register a service thread for process-exit join.
pub fn register_thread<S: ToString>(name: S, handle: JoinHandle<()>) {
    THREAD_HANDLES.lock().push((name.to_string(), handle));
}

/// Join every registered service thread. Call after [`broadcast_exit_signals`].
pub fn wait_all_services_exit() {
    let mut handles = THREAD_HANDLES.lock();
    for (name, handle) in handles.drain(..) {
        debug!("waiting for service {} to exit", name);
        if handle.join().is_err() {
            warn!("service thread {} panicked before exit", name);
        }
    }
}
