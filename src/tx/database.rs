use crate::{Comparer, DatabaseFlags, LmdbError, LmdbResult, error::lmdb_result};

/// A handle to an individual database in an environment.
///
/// A database handle denotes the name and parameters of a database in an
/// environment. It is a plain index into the environment's handle table
/// and does not keep the environment alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Database {
    dbi: ffi::MDB_dbi,
    flags: DatabaseFlags,
}

impl Database {
    /// Creates a new database handle from the given dbi and flags.
    pub(crate) const fn new(dbi: ffi::MDB_dbi, flags: DatabaseFlags) -> Self {
        Self { dbi, flags }
    }

    /// Returns the underlying LMDB database handle (dbi).
    ///
    /// The caller **must** ensure that the handle is not used after the
    /// lifetime of the environment, or after the database has been closed.
    pub const fn dbi(&self) -> ffi::MDB_dbi {
        self.dbi
    }

    /// Returns the flags the database was opened with.
    pub const fn flags(&self) -> DatabaseFlags {
        self.flags
    }

    /// Returns `true` for [`DatabaseFlags::DUP_SORT`] databases.
    pub const fn is_dup_sort(&self) -> bool {
        self.flags.contains(DatabaseFlags::DUP_SORT)
    }

    pub(crate) const fn require_dup_sort(&self) -> LmdbResult<()> {
        if self.is_dup_sort() { Ok(()) } else { Err(LmdbError::RequiresDupSort) }
    }

    pub(crate) const fn require_dup_fixed(&self) -> LmdbResult<()> {
        if self.flags.contains(DatabaseFlags::DUP_FIXED) {
            Ok(())
        } else {
            Err(LmdbError::RequiresDupFixed)
        }
    }
}

/// Orderings to install when a database handle is opened.
///
/// `None` keeps LMDB's default ordering (or the one implied by
/// [`DatabaseFlags`] such as `INTEGER_KEY`). The same configuration must be
/// used every time the database is opened, by every process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DbiConfig {
    /// Key ordering.
    pub key: Option<Comparer>,
    /// Duplicate data ordering. Requires [`DatabaseFlags::DUP_SORT`].
    pub dup: Option<Comparer>,
}

impl DbiConfig {
    /// A configuration that keeps the default orderings.
    pub const fn new() -> Self {
        Self { key: None, dup: None }
    }

    /// Sets the key ordering.
    pub const fn with_key(mut self, comparer: Comparer) -> Self {
        self.key = Some(comparer);
        self
    }

    /// Sets the duplicate data ordering.
    pub const fn with_dup(mut self, comparer: Comparer) -> Self {
        self.dup = Some(comparer);
        self
    }

    /// Returns `true` if no ordering is overridden.
    pub const fn is_default(&self) -> bool {
        self.key.is_none() && self.dup.is_none()
    }

    /// Checks that every custom slot used has a registration.
    pub(crate) fn validate(&self) -> LmdbResult<()> {
        self.key.into_iter().chain(self.dup).try_for_each(Comparer::ensure_available)
    }

    /// Installs the orderings on a freshly opened handle.
    ///
    /// # Safety
    ///
    /// `txn` must be a live transaction in which `db` was just opened, with
    /// no data accessed through it yet.
    pub(crate) unsafe fn apply(&self, txn: *mut ffi::MDB_txn, db: Database) -> LmdbResult<()> {
        if self.dup.is_some() {
            db.require_dup_sort()?;
        }
        if let Some(key) = self.key {
            lmdb_result(unsafe { ffi::mdb_set_compare(txn, db.dbi(), key.as_ffi()) })?;
        }
        if let Some(dup) = self.dup {
            lmdb_result(unsafe { ffi::mdb_set_dupsort(txn, db.dbi(), dup.as_ffi()) })?;
        }
        Ok(())
    }
}
