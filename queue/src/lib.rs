//! The tick queue: a bounded hand-off between one producer (the engine) and
//! competing consumers (persistence, further indexers).
//!
//! Capacity is a byte budget, not a message count: every message carries a
//! size estimate and admission blocks the producer while the running total
//! would exceed the budget. A message is delivered to exactly one consumer.
//! Closing the queue lets consumers drain the backlog; once drained, `take`
//! returns `None` and `put` fails fast.

use evochora_core::RawTickState;
use evochora_util::{Condvar, Mutex};
use log::trace;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors returned by queue operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The queue was closed; no further messages are accepted.
    #[error("queue is closed")]
    Closed,
}

struct Inner {
    messages: VecDeque<(RawTickState, usize)>,
    used_bytes: usize,
    closed: bool,
}

/// A byte-accounted blocking FIFO of [`RawTickState`] messages.
pub struct TickQueue {
    inner: Mutex<Inner>,
    not_full: Condvar,
    not_empty: Condvar,
    max_bytes: usize,
}

impl TickQueue {
    /// Create a queue admitting roughly `max_bytes` of estimated payload.
    pub fn new(max_bytes: usize) -> TickQueue {
        TickQueue {
            inner: Mutex::new(Inner {
                messages: VecDeque::new(),
                used_bytes: 0,
                closed: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            max_bytes,
        }
    }

    /// Enqueue a message, blocking while the byte budget is exhausted.
    ///
    /// An empty queue always admits one message regardless of its size, so a
    /// single oversized tick cannot wedge the producer.
    pub fn put(&self, msg: RawTickState) -> Result<(), QueueError> {
        let estimate = msg.estimated_bytes();
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return Err(QueueError::Closed);
            }
            if inner.messages.is_empty() || inner.used_bytes + estimate <= self.max_bytes {
                break;
            }
            trace!(
                "tick queue full ({} of {} bytes), producer blocked",
                inner.used_bytes,
                self.max_bytes
            );
            self.not_full.wait(&mut inner);
        }
        inner.used_bytes += estimate;
        inner.messages.push_back((msg, estimate));
        drop(inner);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Dequeue a message, blocking while the queue is empty.
    ///
    /// Returns `None` once the queue is closed and fully drained.
    pub fn take(&self) -> Option<RawTickState> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(msg) = Self::pop(&mut inner) {
                drop(inner);
                self.not_full.notify_one();
                return Some(msg);
            }
            if inner.closed {
                return None;
            }
            self.not_empty.wait(&mut inner);
        }
    }

    /// Dequeue without blocking. `None` means "nothing available right now"
    /// or "closed and drained"; use [`TickQueue::is_closed`] to distinguish.
    pub fn poll(&self) -> Option<RawTickState> {
        let mut inner = self.inner.lock();
        let msg = Self::pop(&mut inner);
        drop(inner);
        if msg.is_some() {
            self.not_full.notify_one();
        }
        msg
    }

    /// Dequeue, blocking up to `timeout` for a message to arrive.
    pub fn poll_timeout(&self, timeout: Duration) -> Option<RawTickState> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if let Some(msg) = Self::pop(&mut inner) {
                drop(inner);
                self.not_full.notify_one();
                return Some(msg);
            }
            if inner.closed {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let _ = self.not_empty.wait_for(&mut inner, deadline - now);
        }
    }

    /// Current queue depth in messages.
    pub fn size(&self) -> usize {
        self.inner.lock().messages.len()
    }

    /// Current accounted payload in bytes.
    pub fn used_bytes(&self) -> usize {
        self.inner.lock().used_bytes
    }

    /// Has the queue been closed?
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Close the queue: wake all blocked producers and consumers. The
    /// backlog stays drainable; further `put` calls fail fast.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        drop(inner);
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    fn pop(inner: &mut Inner) -> Option<RawTickState> {
        inner.messages.pop_front().map(|(msg, estimate)| {
            inner.used_bytes -= estimate;
            msg
        })
    }
}
