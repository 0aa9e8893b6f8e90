//! Reexports `crossbeam_channel` to uniform the dependency version, plus
//! the control-channel plumbing shared by every Evochora service worker.

pub use crossbeam_channel::{
    after, bounded, never, select, tick, unbounded, Receiver, RecvError, RecvTimeoutError,
    SendError, Sender, TryRecvError, TrySendError,
};

/// Capacity of every service control channel. Lifecycle commands are rare
/// and tiny; a small bound keeps an abandoned controller from queueing
/// unbounded commands against a paused worker.
pub const CONTROL_CHANNEL_SIZE: usize = 32;

/// A capacity-1 channel for request/response round trips.
pub fn oneshot<T>() -> (Sender<T>, Receiver<T>) {
    bounded(1)
}

/// A control command paired with the channel its acknowledgement travels
/// back on.
///
/// Every Evochora worker (engine, persistence, indexer) reads its control
/// channel only between atomic units of work, so the acknowledgement the
/// caller blocks on doubles as the boundary guarantee: when [`Request::call`]
/// returns, a pause or stop has taken effect at a tick or batch edge, never
/// in the middle of one.
pub struct Request<A, R = ()> {
    /// Oneshot responder the worker acknowledges through.
    pub responder: Sender<R>,
    /// The command itself.
    pub arguments: A,
}

impl<A, R> Request<A, R> {
    /// Send `arguments` down `sender` and block for the acknowledgement.
    ///
    /// Returns `None` when the worker is gone (either side of the round
    /// trip disconnected), which controllers surface as "service stopped".
    pub fn call(sender: &Sender<Request<A, R>>, arguments: A) -> Option<R> {
        let (responder, response) = oneshot();
        sender
            .send(Request {
                responder,
                arguments,
            })
            .ok()?;
        response.recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn call_blocks_for_the_acknowledgement() {
        let (tx, rx) = bounded::<Request<i32, i32>>(CONTROL_CHANNEL_SIZE);
        let worker = thread::spawn(move || {
            while let Ok(Request {
                responder,
                arguments,
            }) = rx.recv()
            {
                let _ = responder.send(arguments * 2);
            }
        });
        assert_eq!(Request::call(&tx, 21), Some(42));
        drop(tx);
        worker.join().unwrap();
    }

    #[test]
    fn call_reports_a_gone_worker() {
        let (tx, rx) = bounded::<Request<(), ()>>(1);
        drop(rx);
        assert_eq!(Request::call(&tx, ()), None);
    }
}
