//! A view of data borrowed from a transaction.
//!
//! This module provides [`Value`], a wrapper that checks the owning
//! transaction before handing out the engine's memory, and [`ValueRef`], the
//! guard through which the memory is actually read.

use crate::{
    LmdbError, LmdbResult,
    tx::{BorrowPin, TxnNode},
};
use std::{fmt, ops::Deref};

/// A view of a key or data item owned by the engine.
///
/// The bytes live in the memory map (or in a dirty page of a write
/// transaction) and are only meaningful while the transaction that read them
/// is open and unmodified. The borrow ties a `Value` to its transaction, so it
/// can never outlive a commit, abort or reset. Writes made through the same
/// transaction while the view is held are caught at runtime: they bump the
/// transaction's epoch and accessors then fail with
/// [`LmdbError::StaleValue`].
///
/// The bytes themselves are only reachable through a [`ValueRef`], which
/// blocks writes to the transaction for as long as it lives.
///
/// # Example
///
/// ```no_run
/// # use signet_lmdb::{Environment, LmdbError, LmdbResult, WriteFlags};
/// # fn run(env: &Environment) -> LmdbResult<()> {
/// let txn = env.begin_rw_txn()?;
/// let db = txn.open_db(None)?;
/// txn.put(db, b"k", b"v1", WriteFlags::empty())?;
///
/// let value = txn.get(db, b"k")?.expect("present");
/// {
///     let bytes = value.try_get()?;
///     assert_eq!(bytes, b"v1");
///     let err = txn.put(db, b"k", b"v2", WriteFlags::empty()).unwrap_err();
///     assert_eq!(err, LmdbError::ValueBorrowed);
/// }
///
/// txn.put(db, b"k", b"v2", WriteFlags::empty())?;
/// assert!(!value.is_valid());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Copy)]
pub struct Value<'tx> {
    data: &'tx [u8],
    node: &'tx TxnNode,
    epoch: u64,
}

impl<'tx> Value<'tx> {
    /// Creates a new `Value` from an engine buffer.
    ///
    /// # Safety
    ///
    /// `val` must have just been filled in by the engine for the transaction
    /// behind `node`.
    #[inline]
    pub(crate) unsafe fn from_val(val: &ffi::MDB_val, node: &'tx TxnNode) -> Self {
        let data = if val.mv_size == 0 || val.mv_data.is_null() {
            &[][..]
        } else {
            // SAFETY: the engine guarantees `mv_size` readable bytes at
            // `mv_data` until the transaction is modified or ends.
            unsafe { std::slice::from_raw_parts(val.mv_data as *const u8, val.mv_size) }
        };
        Self { data, node, epoch: node.epoch() }
    }

    /// Checks if the data view is still valid.
    ///
    /// Returns `false` once the transaction has been written to since the
    /// read, or has ended.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.node.is_readable() && self.node.epoch() == self.epoch
    }

    /// Enforce that the view is still valid.
    #[inline]
    pub fn enforce_valid(&self) -> LmdbResult<()> {
        if !self.is_valid() {
            return Err(LmdbError::StaleValue);
        }
        Ok(())
    }

    /// Borrows the data after checking validity.
    ///
    /// Returns `Err(LmdbError::StaleValue)` if the transaction was modified
    /// after the read. While the returned guard is alive, writes to the
    /// transaction (and commits or aborts that would free its pages) fail
    /// with [`LmdbError::ValueBorrowed`].
    #[inline]
    pub fn try_get(&self) -> LmdbResult<ValueRef<'_>> {
        self.enforce_valid()?;
        Ok(ValueRef { data: self.data, _pin: self.node.pin() })
    }

    /// Copies the data into an owned buffer.
    pub fn to_vec(&self) -> LmdbResult<Vec<u8>> {
        Ok(self.try_get()?.to_vec())
    }

    /// Access the data after checking validity.
    ///
    /// The transaction is pinned while `f` runs, as with
    /// [`try_get`](Self::try_get).
    #[inline]
    pub fn inspect<T>(&self, f: impl FnOnce(&[u8]) -> T) -> LmdbResult<T> {
        let data = self.try_get()?;
        Ok(f(&data))
    }

    /// Access the data without validity check.
    ///
    /// # Safety
    ///
    /// The caller must ensure the transaction was not written to since the
    /// read.
    #[inline]
    pub const unsafe fn get_unchecked(&self) -> &'tx [u8] {
        self.data
    }

    /// Returns the length of the data.
    ///
    /// The length is recorded at read time and stays available after the
    /// view goes stale.
    #[inline]
    pub const fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the data is empty.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for Value<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Check validity before displaying data to avoid showing stale data
        if self.is_valid() {
            f.debug_struct("Value").field("data", &self.data).finish()
        } else {
            f.debug_struct("Value").field("data", &"<stale>").finish()
        }
    }
}

/// Checked access to the bytes of a [`Value`].
///
/// Obtained from [`Value::try_get`]. Dereferences to `[u8]`.
pub struct ValueRef<'v> {
    data: &'v [u8],
    _pin: BorrowPin<'v>,
}

impl Deref for ValueRef<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.data
    }
}

impl AsRef<[u8]> for ValueRef<'_> {
    fn as_ref(&self) -> &[u8] {
        self.data
    }
}

impl<T> PartialEq<T> for ValueRef<'_>
where
    T: AsRef<[u8]> + ?Sized,
{
    fn eq(&self, other: &T) -> bool {
        self.data == other.as_ref()
    }
}

impl fmt::Debug for ValueRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ValueRef").field(&self.data).finish()
    }
}
