//! The environment-wide table of published database handles.
//!
//! LMDB keeps a handle private to the transaction that opened it until that
//! transaction commits. It also forbids two transactions of one process from
//! opening handles at the same time. This table mirrors the published
//! handles and records which transaction family, if any, currently has
//! unpublished opens in flight.

use crate::{Database, DbiConfig, LmdbError, LmdbResult};
use parking_lot::Mutex;
use smallvec::SmallVec;

/// A handle opened by a transaction, waiting to be published.
#[derive(Debug, Clone)]
pub(crate) struct OpenedDb {
    pub(crate) name: Option<Box<str>>,
    pub(crate) db: Database,
    pub(crate) config: DbiConfig,
}

#[derive(Debug, Default)]
struct TableInner {
    shared: SmallVec<[OpenedDb; 16]>,
    /// Family of the transaction tree with unpublished opens.
    opener: Option<u64>,
}

/// Shared handle table, owned by the environment.
#[derive(Debug, Default)]
pub(crate) struct HandleTable {
    inner: Mutex<TableInner>,
}

impl HandleTable {
    /// Looks up a published handle by name.
    pub(crate) fn lookup(&self, name: Option<&str>) -> Option<OpenedDb> {
        self.inner.lock().shared.iter().find(|entry| entry.name.as_deref() == name).cloned()
    }

    /// Claims the right to open handles for `family`.
    pub(crate) fn claim(&self, family: u64) -> LmdbResult<()> {
        let mut inner = self.inner.lock();
        match inner.opener {
            Some(owner) if owner != family => Err(LmdbError::DbiOpenInProgress),
            _ => {
                inner.opener = Some(family);
                Ok(())
            }
        }
    }

    /// Publishes handles committed by `family` and releases its claim.
    pub(crate) fn publish(&self, family: u64, opened: impl IntoIterator<Item = OpenedDb>) {
        let mut inner = self.inner.lock();
        for entry in opened {
            tracing::debug!(target: "lmdb", name = ?entry.name, dbi = entry.db.dbi(), "published database handle");
            inner.shared.retain(|e| e.db.dbi() != entry.db.dbi() && e.name != entry.name);
            inner.shared.push(entry);
        }
        if inner.opener == Some(family) {
            inner.opener = None;
        }
    }

    /// Releases the claim of `family` without publishing anything.
    pub(crate) fn release(&self, family: u64) {
        let mut inner = self.inner.lock();
        if inner.opener == Some(family) {
            inner.opener = None;
        }
    }

    /// Forgets a handle that was dropped or closed.
    pub(crate) fn remove(&self, dbi: ffi::MDB_dbi) {
        self.inner.lock().shared.retain(|entry| entry.db.dbi() != dbi);
    }

    /// All published handles.
    pub(crate) fn snapshot(&self) -> Vec<(Option<String>, Database)> {
        self.inner
            .lock()
            .shared
            .iter()
            .map(|entry| (entry.name.as_deref().map(str::to_owned), entry.db))
            .collect()
    }
}
