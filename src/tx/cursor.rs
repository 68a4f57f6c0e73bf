use crate::{
    Database, Environment, LmdbError, LmdbResult, RO, RW, Transaction, TransactionKind, TxnState,
    Value,
    entries::Pair,
    error::lmdb_result,
    flags::{DatabaseFlags, WriteFlags},
    tx::{
        assertions,
        iter::{Iter, IterDupOf, IterRev},
    },
};
use ffi::{
    MDB_FIRST, MDB_FIRST_DUP, MDB_GET_BOTH, MDB_GET_BOTH_RANGE, MDB_GET_CURRENT, MDB_GET_MULTIPLE,
    MDB_LAST, MDB_LAST_DUP, MDB_NEXT, MDB_NEXT_DUP, MDB_NEXT_MULTIPLE, MDB_NEXT_NODUP, MDB_PREV,
    MDB_PREV_DUP, MDB_PREV_NODUP, MDB_SET, MDB_SET_KEY, MDB_SET_RANGE, MDB_cursor_op,
};
use std::{ffi::c_void, fmt, ptr};

/// A cursor for navigating the items within a database.
///
/// A cursor borrows its transaction, so it cannot outlive a commit or abort.
/// Positioning methods return `Ok(None)` when the engine reports no matching
/// item.
pub struct Cursor<'tx, K>
where
    K: TransactionKind,
{
    txn: &'tx Transaction<K>,
    cursor: *mut ffi::MDB_cursor,
    db: Database,
    closed: bool,
}

impl<'tx, K> Cursor<'tx, K>
where
    K: TransactionKind,
{
    pub(crate) fn new(txn: &'tx Transaction<K>, db: Database) -> LmdbResult<Self> {
        let txn_ptr = txn.txn_ptr()?;
        let mut cursor: *mut ffi::MDB_cursor = ptr::null_mut();
        txn.observe(lmdb_result(unsafe { ffi::mdb_cursor_open(txn_ptr, db.dbi(), &mut cursor) }))?;
        Ok(Self { txn, cursor, db, closed: false })
    }

    /// Returns the transaction associated with this cursor.
    pub const fn txn(&self) -> &'tx Transaction<K> {
        self.txn
    }

    /// Returns a raw pointer to the underlying LMDB cursor.
    ///
    /// The caller **must** ensure that the pointer is not used after the
    /// lifetime of the cursor.
    pub const fn cursor(&self) -> *mut ffi::MDB_cursor {
        self.cursor
    }

    /// Returns the database associated with this cursor.
    pub const fn db(&self) -> Database {
        self.db
    }

    /// Returns the flags of the database associated with this cursor.
    pub const fn db_flags(&self) -> DatabaseFlags {
        self.db.flags()
    }

    /// Returns `true` once [`close`](Self::close) was called.
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Checks that the cursor and its transaction are usable.
    #[inline]
    fn usable(&self) -> LmdbResult<()> {
        if self.closed {
            return Err(LmdbError::CursorClosed);
        }
        self.txn.txn_ptr().map(|_| ())
    }

    /// Runs a cursor op and returns the raw key and data buffers.
    ///
    /// Ops that take a key or data argument are followed by
    /// [`MDB_GET_CURRENT`], since the engine may leave the caller's buffers
    /// in place instead of pointing at its own memory.
    fn get_raw(
        &self,
        key: Option<&[u8]>,
        data: Option<&[u8]>,
        op: MDB_cursor_op,
    ) -> LmdbResult<Option<(ffi::MDB_val, ffi::MDB_val)>> {
        self.usable()?;
        let mut key_val = slice_to_val(key);
        let mut data_val = slice_to_val(data);

        match unsafe { ffi::mdb_cursor_get(self.cursor, &mut key_val, &mut data_val, op) } {
            ffi::MDB_SUCCESS if key.is_some() || data.is_some() => {
                self.get_raw(None, None, MDB_GET_CURRENT)
            }
            ffi::MDB_SUCCESS => Ok(Some((key_val, data_val))),
            ffi::MDB_NOTFOUND => Ok(None),
            code => self.txn.observe(lmdb_result(code)).map(|_| None),
        }
    }

    fn get_full(
        &self,
        key: Option<&[u8]>,
        data: Option<&[u8]>,
        op: MDB_cursor_op,
    ) -> LmdbResult<Option<Pair<'tx>>> {
        let node = self.txn.node();
        Ok(self.get_raw(key, data, op)?.map(|(k, v)| unsafe {
            (Value::from_val(&k, node), Value::from_val(&v, node))
        }))
    }

    fn get_value(
        &self,
        key: Option<&[u8]>,
        data: Option<&[u8]>,
        op: MDB_cursor_op,
    ) -> LmdbResult<Option<Value<'tx>>> {
        let node = self.txn.node();
        Ok(self.get_raw(key, data, op)?.map(|(_, v)| unsafe { Value::from_val(&v, node) }))
    }

    /// Moves the cursor by `op`, for iterators.
    pub(crate) fn step(&mut self, op: MDB_cursor_op) -> LmdbResult<Option<Pair<'tx>>> {
        self.get_full(None, None, op)
    }

    /// Position at first key/data item.
    pub fn first(&mut self) -> LmdbResult<Option<Pair<'tx>>> {
        self.get_full(None, None, MDB_FIRST)
    }

    /// [`DatabaseFlags::DUP_SORT`]-only: Position at first data item of
    /// current key.
    pub fn first_dup(&mut self) -> LmdbResult<Option<Value<'tx>>> {
        self.db.require_dup_sort()?;
        self.get_value(None, None, MDB_FIRST_DUP)
    }

    /// [`DatabaseFlags::DUP_SORT`]-only: Position at key/data pair.
    pub fn get_both(&mut self, k: &[u8], v: &[u8]) -> LmdbResult<Option<Value<'tx>>> {
        self.db.require_dup_sort()?;
        self.get_value(Some(k), Some(v), MDB_GET_BOTH)
    }

    /// [`DatabaseFlags::DUP_SORT`]-only: Position at given key and at first
    /// data greater than or equal to specified data.
    pub fn get_both_range(&mut self, k: &[u8], v: &[u8]) -> LmdbResult<Option<Value<'tx>>> {
        self.db.require_dup_sort()?;
        self.get_value(Some(k), Some(v), MDB_GET_BOTH_RANGE)
    }

    /// Return key/data at current cursor position.
    pub fn get_current(&mut self) -> LmdbResult<Option<Pair<'tx>>> {
        self.get_full(None, None, MDB_GET_CURRENT)
    }

    /// [`DatabaseFlags::DUP_FIXED`]-only: Return up to a page of duplicate
    /// data items from current cursor position. Move cursor to prepare for
    /// [`Self::next_multiple`].
    ///
    /// The items are returned back to back in one buffer.
    pub fn get_multiple(&mut self) -> LmdbResult<Option<Value<'tx>>> {
        self.db.require_dup_fixed()?;
        self.get_value(None, None, MDB_GET_MULTIPLE)
    }

    /// Position at last key/data item.
    pub fn last(&mut self) -> LmdbResult<Option<Pair<'tx>>> {
        self.get_full(None, None, MDB_LAST)
    }

    /// [`DatabaseFlags::DUP_SORT`]-only: Position at last data item of
    /// current key.
    pub fn last_dup(&mut self) -> LmdbResult<Option<Value<'tx>>> {
        self.db.require_dup_sort()?;
        self.get_value(None, None, MDB_LAST_DUP)
    }

    /// Position at next data item.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> LmdbResult<Option<Pair<'tx>>> {
        self.get_full(None, None, MDB_NEXT)
    }

    /// [`DatabaseFlags::DUP_SORT`]-only: Position at next data item of
    /// current key.
    pub fn next_dup(&mut self) -> LmdbResult<Option<Pair<'tx>>> {
        self.db.require_dup_sort()?;
        self.get_full(None, None, MDB_NEXT_DUP)
    }

    /// [`DatabaseFlags::DUP_FIXED`]-only: Return up to a page of duplicate
    /// data items from next cursor position. Move cursor to prepare for
    /// another call.
    pub fn next_multiple(&mut self) -> LmdbResult<Option<Value<'tx>>> {
        self.db.require_dup_fixed()?;
        self.get_value(None, None, MDB_NEXT_MULTIPLE)
    }

    /// Position at first data item of next key.
    pub fn next_nodup(&mut self) -> LmdbResult<Option<Pair<'tx>>> {
        self.get_full(None, None, MDB_NEXT_NODUP)
    }

    /// Position at previous data item.
    pub fn prev(&mut self) -> LmdbResult<Option<Pair<'tx>>> {
        self.get_full(None, None, MDB_PREV)
    }

    /// [`DatabaseFlags::DUP_SORT`]-only: Position at previous data item of
    /// current key.
    pub fn prev_dup(&mut self) -> LmdbResult<Option<Pair<'tx>>> {
        self.db.require_dup_sort()?;
        self.get_full(None, None, MDB_PREV_DUP)
    }

    /// Position at last data item of previous key.
    pub fn prev_nodup(&mut self) -> LmdbResult<Option<Pair<'tx>>> {
        self.get_full(None, None, MDB_PREV_NODUP)
    }

    /// Position at specified key, returning its (first) data item.
    pub fn set(&mut self, key: &[u8]) -> LmdbResult<Option<Value<'tx>>> {
        self.get_value(Some(key), None, MDB_SET)
    }

    /// Position at specified key, return both key and data.
    pub fn set_key(&mut self, key: &[u8]) -> LmdbResult<Option<Pair<'tx>>> {
        self.get_full(Some(key), None, MDB_SET_KEY)
    }

    /// Position at first key greater than or equal to specified key.
    pub fn set_range(&mut self, key: &[u8]) -> LmdbResult<Option<Pair<'tx>>> {
        self.get_full(Some(key), None, MDB_SET_RANGE)
    }

    /// [`DatabaseFlags::DUP_SORT`]-only: Returns the number of data items
    /// of the current key.
    ///
    /// Fails with [`LmdbError::NotFound`] if the cursor is not positioned.
    pub fn count_duplicates(&self) -> LmdbResult<usize> {
        self.db.require_dup_sort()?;
        self.usable()?;
        let mut count: ffi::mdb_size_t = 0;
        match lmdb_result(unsafe { ffi::mdb_cursor_count(self.cursor, &mut count) }) {
            Ok(()) => Ok(count as usize),
            // The engine reports an unpositioned cursor as EINVAL.
            Err(LmdbError::InvalidArgument) => Err(LmdbError::NotFound),
            Err(err) => self.txn.observe(Err(err)),
        }
    }

    /// Iterate over database items from the current position onward.
    ///
    /// An unpositioned cursor starts at the first item.
    pub fn iter<'cur>(&'cur mut self) -> Iter<'tx, 'cur, K> {
        Iter::new(self, None)
    }

    /// Iterate over database items starting from the beginning of the
    /// database.
    pub fn iter_start<'cur>(&'cur mut self) -> Iter<'tx, 'cur, K> {
        let first = self.first();
        Iter::new(self, Some(first))
    }

    /// Iterate over database items starting from the first key greater than
    /// or equal to `key`.
    pub fn iter_from<'cur>(&'cur mut self, key: &[u8]) -> Iter<'tx, 'cur, K> {
        let first = self.set_range(key);
        Iter::new(self, Some(first))
    }

    /// Iterate over the duplicates of the item in the database with the given
    /// key.
    pub fn iter_dup_of<'cur>(&'cur mut self, key: &[u8]) -> IterDupOf<'tx, 'cur, K> {
        let first = self.set_key(key);
        Iter::new(self, Some(first))
    }

    /// Iterate over database items from the last one backwards.
    pub fn iter_rev<'cur>(&'cur mut self) -> IterRev<'tx, 'cur, K> {
        let first = self.last();
        Iter::new(self, Some(first))
    }

    /// Closes the cursor. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        // Write cursors are freed by the engine with their transaction.
        if K::IS_READ_ONLY || self.txn.state() == TxnState::Ready {
            unsafe { ffi::mdb_cursor_close(self.cursor) };
        }
        self.closed = true;
    }
}

impl<'tx> Cursor<'tx, RW> {
    /// Puts a key/data pair into the database. The cursor will be positioned
    /// at the new data item, or on failure usually near it.
    ///
    /// [`WriteFlags::CURRENT`] replaces the item at the current position.
    ///
    /// [`WriteFlags::RESERVE`] is rejected with [`LmdbError::ReserveInPut`].
    pub fn put(&mut self, key: &[u8], data: &[u8], flags: WriteFlags) -> LmdbResult<()> {
        if flags.contains(WriteFlags::RESERVE) {
            return Err(LmdbError::ReserveInPut);
        }
        assertions::debug_assert_put(self.txn.env().key_limit(), self.db.flags(), key, data);
        self.usable()?;
        self.txn.node().ensure_writable()?;
        self.txn.node().bump_epoch();
        let mut key_val = slice_to_val(Some(key));
        let mut data_val = slice_to_val(Some(data));
        self.txn.observe(lmdb_result(unsafe {
            ffi::mdb_cursor_put(self.cursor, &mut key_val, &mut data_val, flags.bits())
        }))
    }

    /// Deletes the current key/data pair.
    pub fn del(&mut self) -> LmdbResult<()> {
        self.del_with(0)
    }

    /// [`DatabaseFlags::DUP_SORT`]-only: Deletes all data items of the
    /// current key.
    pub fn del_all_dups(&mut self) -> LmdbResult<()> {
        self.db.require_dup_sort()?;
        self.del_with(WriteFlags::NO_DUP_DATA.bits())
    }

    fn del_with(&mut self, flags: std::ffi::c_uint) -> LmdbResult<()> {
        self.usable()?;
        self.txn.node().ensure_writable()?;
        self.txn.node().bump_epoch();
        self.txn.observe(lmdb_result(unsafe { ffi::mdb_cursor_del(self.cursor, flags) }))
    }
}

impl<'tx> Cursor<'tx, RO> {
    /// Detaches the cursor from its transaction so it can survive a
    /// [`Transaction::reset`] and be renewed afterwards.
    pub fn unbind(mut self) -> LmdbResult<UnboundCursor> {
        if self.closed {
            return Err(LmdbError::CursorClosed);
        }
        let env = self.txn.env().clone();
        env.retain_live();
        self.closed = true;
        Ok(UnboundCursor { cursor: self.cursor, db: self.db, env, closed: false })
    }

    /// Rebinds the cursor to another read-only transaction.
    pub fn renew<'n>(self, txn: &'n Transaction<RO>) -> LmdbResult<Cursor<'n, RO>> {
        self.unbind()?.renew(txn)
    }
}

impl<K> fmt::Debug for Cursor<'_, K>
where
    K: TransactionKind,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor").field("db", &self.db).field("closed", &self.closed).finish()
    }
}

impl<K> Drop for Cursor<'_, K>
where
    K: TransactionKind,
{
    fn drop(&mut self) {
        self.close();
    }
}

/// A read-only cursor detached from any transaction.
///
/// Obtained from [`Cursor::unbind`]. The cursor keeps the environment open
/// until it is renewed or closed.
pub struct UnboundCursor {
    cursor: *mut ffi::MDB_cursor,
    db: Database,
    env: Environment,
    closed: bool,
}

impl UnboundCursor {
    /// Returns the database the cursor was opened on.
    pub const fn db(&self) -> Database {
        self.db
    }

    /// Binds the cursor to `txn`, which must be a ready read-only
    /// transaction of the same environment.
    ///
    /// A transaction of another environment fails with
    /// [`LmdbError::CursorEnvMismatch`] and the cursor is closed.
    pub fn renew(mut self, txn: &Transaction<RO>) -> LmdbResult<Cursor<'_, RO>> {
        if !self.env.same_as(txn.env()) {
            return Err(LmdbError::CursorEnvMismatch);
        }
        let txn_ptr = txn.txn_ptr()?;
        txn.observe(lmdb_result(unsafe { ffi::mdb_cursor_renew(txn_ptr, self.cursor) }))?;
        self.closed = true;
        self.env.release_live();
        Ok(Cursor { txn, cursor: self.cursor, db: self.db, closed: false })
    }

    /// Closes the cursor. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        unsafe { ffi::mdb_cursor_close(self.cursor) };
        self.closed = true;
        self.env.release_live();
    }
}

impl fmt::Debug for UnboundCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnboundCursor").field("db", &self.db).finish_non_exhaustive()
    }
}

impl Drop for UnboundCursor {
    fn drop(&mut self) {
        self.close();
    }
}

pub(crate) const fn slice_to_val(slice: Option<&[u8]>) -> ffi::MDB_val {
    match slice {
        Some(slice) => ffi::MDB_val { mv_size: slice.len(), mv_data: slice.as_ptr() as *mut c_void },
        None => ffi::MDB_val { mv_size: 0, mv_data: ptr::null_mut() },
    }
}
