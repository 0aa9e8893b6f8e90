//! The read side of a tick store.

use crate::store::{tick_key, COLUMN_NAMES, COLUMN_TICKS};
use crate::{internal_error, Result};
use rocksdb::ops::{GetColumnFamilys, GetPinnedCF, OpenCF};
use rocksdb::{Options, ReadOnlyDB};
use std::path::Path;
use std::sync::Arc;

/// Read-only handle to a tick store.
///
/// This is the only handle type handed to downstream consumers (the indexer
/// reading raw ticks, the read-side API reading prepared ones), so a reader
/// cannot write by construction. Opening does not take the writer's lock; a
/// handle sees the rows committed up to the moment it was opened, which is
/// why the indexer re-opens one per scan.
pub struct ReadOnlyTickStore {
    inner: Arc<ReadOnlyDB>,
}

impl ReadOnlyTickStore {
    /// Open a tick store read-only.
    ///
    /// Returns `Ok(None)` while the store does not exist yet, so a reader
    /// can start before its writer has produced anything.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Option<ReadOnlyTickStore>> {
        let opts = Options::default();
        ReadOnlyDB::open_cf(&opts, path, COLUMN_NAMES).map_or_else(
            |err| {
                let err_str = err.as_ref();
                if err_str.starts_with("IO error: No such file or directory") {
                    Ok(None)
                } else {
                    Err(internal_error(format!(
                        "failed to open tick store read-only: {}",
                        err
                    )))
                }
            },
            |db| {
                Ok(Some(ReadOnlyTickStore {
                    inner: Arc::new(db),
                }))
            },
        )
    }

    /// The payload stored for one tick.
    pub fn tick(&self, tick_number: u64) -> Result<Option<Vec<u8>>> {
        let cf = self
            .inner
            .cf_handle(COLUMN_TICKS)
            .ok_or_else(|| internal_error(format!("column {} not found", COLUMN_TICKS)))?;
        let value = self
            .inner
            .get_pinned_cf(cf, &tick_key(tick_number))
            .map_err(internal_error)?;
        Ok(value.map(|v| v.as_ref().to_vec()))
    }
}
