//! Evochora utilities.
//!
//! Re-exports the `parking_lot` synchronization primitives so the whole
//! workspace agrees on one lock implementation. `parking_lot` locks do not
//! poison, which removes a class of `unwrap` calls around every guard.

pub use parking_lot::{Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
