//! Evochora tick stores.
//!
//! Both pipeline stores are the same shape: a row-oriented map from tick
//! number to a serialized tick payload, plus a small meta column for
//! bookkeeping such as the indexer's high-water mark. This crate wraps
//! RocksDB into exactly that shape instead of exposing a generic key-value
//! surface: callers speak in tick numbers, and the big-endian key encoding
//! that makes lexicographic order equal tick order stays an implementation
//! detail of this crate.
//!
//! Access is split by capability. [`TickStore`] is the write handle, owned
//! by exactly one service per store (persistence for the raw store, the
//! indexer for the prepared one). [`ReadOnlyTickStore`] is the handle handed
//! to downstream readers, so a reader cannot write by construction.

mod read_only;
mod store;

pub use read_only::ReadOnlyTickStore;
pub use store::{TickBatch, TickStore, TickTransaction};

use thiserror::Error;

/// The error type of the store layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Any backend failure: open, read, write, commit.
    #[error("tick store error: {0}")]
    Internal(String),
}

/// The store layer result type.
pub type Result<T> = std::result::Result<T, Error>;

pub(crate) fn internal_error<S: ToString>(reason: S) -> Error {
    Error::Internal(reason.to_string())
}

#[cfg(test)]
mod tests;
