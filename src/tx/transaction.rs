use crate::{
    Cursor, Database, DbiConfig, Environment, LmdbError, LmdbResult, Stat, TxnState, Value,
    error::lmdb_result,
    flags::{DatabaseFlags, TransactionFlags, WriteFlags},
    sys::handles::OpenedDb,
    tx::{
        RO, RW, TransactionKind, TxnNode,
        assertions,
        cursor::slice_to_val,
    },
};
use std::{
    cmp::Ordering,
    ffi::{CString, c_int, c_uint},
    fmt,
    marker::PhantomData,
    ptr, slice,
    sync::Arc,
};
use tracing::instrument;

/// An LMDB transaction.
///
/// All database operations require a transaction. The kind marker `K` is
/// either [`RO`] or [`RW`]; writes exist only on `Transaction<RW>`.
///
/// Lifecycle transitions ([`commit`](Self::commit), [`abort`](Self::abort),
/// [`reset`](Transaction::reset)) take `&mut self`, so no [`Value`] or
/// [`Cursor`] borrowed from the transaction survives them. Dropping the
/// transaction aborts it if it is still open.
///
/// A nested transaction is ended by its parent's commit or abort. Those fail
/// with [`LmdbError::ValueBorrowed`] while a [`ValueRef`](crate::ValueRef)
/// into the child is alive. Dropping the parent in that situation postpones
/// its abort until the child ends.
pub struct Transaction<K>
where
    K: TransactionKind,
{
    node: Arc<TxnNode>,
    env: Environment,
    span: tracing::Span,
    _marker: PhantomData<fn() -> K>,
}

impl<K> Transaction<K>
where
    K: TransactionKind,
{
    /// Begins a root transaction.
    pub(crate) fn begin(env: Environment, flags: TransactionFlags) -> LmdbResult<Self> {
        if !K::IS_READ_ONLY {
            env.acquire_writer()?;
        }
        let ptr = match env.txn_begin(ptr::null_mut(), K::OPEN_FLAGS | flags.bits()) {
            Ok(ptr) => ptr,
            Err(err) => {
                if !K::IS_READ_ONLY {
                    env.release_writer();
                }
                return Err(err);
            }
        };
        let node = TxnNode::root(ptr, env.next_family(), !K::IS_READ_ONLY);
        Ok(Self::from_node(env, node))
    }

    fn from_node(env: Environment, node: Arc<TxnNode>) -> Self {
        // SAFETY: the node was just created from a live transaction.
        let txn_id = unsafe { ffi::mdb_txn_id(node.ptr()) } as usize;
        let span = K::new_span(txn_id, node.is_nested());
        tracing::trace!(target: "lmdb", parent: &span, "began transaction");
        Self { node, env, span, _marker: PhantomData }
    }

    /// Rebuilds the owner of a node whose close was postponed.
    fn revive(env: Environment, node: Arc<TxnNode>) -> Self {
        Self { node, env, span: tracing::Span::none(), _marker: PhantomData }
    }

    /// Returns the transaction pointer, if the transaction is usable.
    #[inline]
    fn ready(&self) -> LmdbResult<*mut ffi::MDB_txn> {
        self.node.ensure_ready()?;
        Ok(self.node.ptr())
    }

    #[inline]
    fn check(&self, code: c_int) -> LmdbResult<()> {
        self.env.observe(lmdb_result(code))
    }

    pub(crate) fn node(&self) -> &TxnNode {
        &self.node
    }

    /// Returns the pointer for use by a cursor, checking readiness.
    pub(crate) fn txn_ptr(&self) -> LmdbResult<*mut ffi::MDB_txn> {
        self.ready()
    }

    pub(crate) fn observe<T>(&self, res: LmdbResult<T>) -> LmdbResult<T> {
        self.env.observe(res)
    }

    /// Returns the environment the transaction belongs to.
    pub fn env(&self) -> &Environment {
        &self.env
    }

    /// Returns the tracing span for this transaction.
    pub const fn span(&self) -> &tracing::Span {
        &self.span
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> TxnState {
        self.node.state()
    }

    /// Returns `true` for [`RO`] transactions.
    pub const fn is_read_only(&self) -> bool {
        K::IS_READ_ONLY
    }

    /// Returns `true` if this is a nested transaction.
    pub fn is_nested(&self) -> bool {
        self.node.is_nested()
    }

    /// Returns the transaction id, the snapshot a read transaction observes.
    pub fn id(&self) -> LmdbResult<u64> {
        let txn = self.ready()?;
        Ok(unsafe { ffi::mdb_txn_id(txn) } as u64)
    }

    /// Gets an item from a database.
    ///
    /// This function retrieves the data associated with the given key in the
    /// database. If the database supports duplicate keys
    /// ([`DatabaseFlags::DUP_SORT`]) then the first data item for the key will
    /// be returned. Retrieval of other items requires the use of [`Cursor`].
    /// If the item is not in the database, then [`None`] will be returned.
    pub fn get(&self, db: Database, key: impl AsRef<[u8]>) -> LmdbResult<Option<Value<'_>>> {
        let txn = self.ready()?;
        let key = key.as_ref();
        let mut key_val = slice_to_val(Some(key));
        let mut data_val = slice_to_val(None);

        match unsafe { ffi::mdb_get(txn, db.dbi(), &mut key_val, &mut data_val) } {
            ffi::MDB_SUCCESS => Ok(Some(unsafe { Value::from_val(&data_val, &self.node) })),
            ffi::MDB_NOTFOUND => Ok(None),
            code => self.check(code).map(|_| None),
        }
    }

    /// Opens a handle to a database.
    ///
    /// If `name` is `None`, then the returned handle will be for the default
    /// database. Named databases require
    /// [`EnvironmentBuilder::set_max_dbs`](crate::EnvironmentBuilder::set_max_dbs).
    ///
    /// Handles published by a committed transaction are shared by the whole
    /// environment and returned without touching the engine. A handle opened
    /// here stays private to this transaction until it commits.
    ///
    /// The database name may not contain the null character.
    pub fn open_db(&self, name: Option<&str>) -> LmdbResult<Database> {
        self.open_inner(name, DatabaseFlags::empty(), None)
    }

    /// Opens a handle to a database, installing the orderings of `config`.
    ///
    /// The orderings are installed right after the engine opens the handle,
    /// before any data is accessed through it. If the handle is already
    /// shared with a different configuration, the shared handle is returned
    /// unchanged and a warning is logged.
    pub fn open_db_with(
        &self,
        name: Option<&str>,
        flags: DatabaseFlags,
        config: DbiConfig,
    ) -> LmdbResult<Database> {
        self.open_inner(name, flags, Some(config))
    }

    fn open_inner(
        &self,
        name: Option<&str>,
        flags: DatabaseFlags,
        config: Option<DbiConfig>,
    ) -> LmdbResult<Database> {
        let txn = self.ready()?;

        if let Some(shared) = self.env.handles().lookup(name) {
            let wanted = flags - DatabaseFlags::CREATE;
            if shared.db.flags().contains(wanted) {
                if let Some(config) = config.filter(|c| *c != shared.config) {
                    tracing::warn!(
                        target: "lmdb",
                        ?name,
                        requested = ?config,
                        installed = ?shared.config,
                        "database already open with different comparers, keeping the installed ones"
                    );
                }
                return Ok(shared.db);
            }
        }

        if let Some(config) = &config {
            config.validate()?;
        }
        let c_name = name
            .map(CString::new)
            .transpose()
            .map_err(|_| LmdbError::InvalidArgument)?;
        let name_ptr = c_name.as_ref().map_or(ptr::null(), |s| s.as_ptr());

        if flags.contains(DatabaseFlags::CREATE) {
            // creating a database inserts a record into the main database
            self.node.ensure_writable()?;
            self.node.bump_epoch();
        }

        let family = self.node.family();
        self.env.handles().claim(family)?;

        let opened = (|| -> LmdbResult<(Database, DbiConfig)> {
            let mut dbi: ffi::MDB_dbi = 0;
            self.check(unsafe { ffi::mdb_dbi_open(txn, name_ptr, flags.bits(), &mut dbi) })?;

            let mut actual: c_uint = 0;
            self.check(unsafe { ffi::mdb_dbi_flags(txn, dbi, &mut actual) })?;
            let db = Database::new(dbi, DatabaseFlags::from_bits_truncate(actual));

            let config = config.unwrap_or_default();
            unsafe { config.apply(txn, db) }?;
            Ok((db, config))
        })();

        match opened {
            Ok((db, config)) => {
                tracing::debug!(target: "lmdb", parent: &self.span, ?name, dbi = db.dbi(), "opened database handle");
                self.node.record_opened(OpenedDb { name: name.map(Into::into), db, config });
                Ok(db)
            }
            Err(err) => {
                if !self.node.tree_has_opened() {
                    self.env.handles().release(family);
                }
                Err(err)
            }
        }
    }

    /// Gets the option flags for the given database in the transaction.
    pub fn db_flags(&self, db: Database) -> LmdbResult<DatabaseFlags> {
        let txn = self.ready()?;
        let mut flags: c_uint = 0;
        self.check(unsafe { ffi::mdb_dbi_flags(txn, db.dbi(), &mut flags) })?;
        Ok(DatabaseFlags::from_bits_truncate(flags))
    }

    /// Retrieves database statistics.
    pub fn db_stat(&self, db: Database) -> LmdbResult<Stat> {
        let txn = self.ready()?;
        let mut stat = Stat::new();
        self.check(unsafe { ffi::mdb_stat(txn, db.dbi(), stat.mdb_stat()) })?;
        Ok(stat)
    }

    /// Compares two keys using the database's key ordering.
    pub fn compare(&self, db: Database, a: &[u8], b: &[u8]) -> LmdbResult<Ordering> {
        let txn = self.ready()?;
        let (a, b) = (slice_to_val(Some(a)), slice_to_val(Some(b)));
        Ok(unsafe { ffi::mdb_cmp(txn, db.dbi(), &a, &b) }.cmp(&0))
    }

    /// Compares two data items using the database's duplicate ordering.
    ///
    /// Requires a [`DatabaseFlags::DUP_SORT`] database.
    pub fn dup_compare(&self, db: Database, a: &[u8], b: &[u8]) -> LmdbResult<Ordering> {
        db.require_dup_sort()?;
        let txn = self.ready()?;
        let (a, b) = (slice_to_val(Some(a)), slice_to_val(Some(b)));
        Ok(unsafe { ffi::mdb_dcmp(txn, db.dbi(), &a, &b) }.cmp(&0))
    }

    /// Open a new cursor on the given database.
    pub fn cursor(&self, db: Database) -> LmdbResult<Cursor<'_, K>> {
        Cursor::new(self, db)
    }

    /// Commits the transaction.
    ///
    /// Any pending operations will be saved. An open child transaction is
    /// aborted first. For a nested transaction the writes become part of the
    /// parent, durable only when the root commits.
    #[instrument(skip(self), parent = &self.span)]
    pub fn commit(&mut self) -> LmdbResult<()> {
        self.node.expect_state(TxnState::Ready)?;
        self.node.ensure_can_end(true)?;
        self.node.abort_open_child();

        let res = self.check(unsafe { ffi::mdb_txn_commit(self.node.ptr()) });
        self.node.set_state(TxnState::Done);

        let opened = self.node.take_opened();
        match (self.node.parent(), res.is_ok()) {
            (Some(parent), true) => {
                opened.into_iter().for_each(|db| parent.record_opened(db));
                parent.bump_epoch();
            }
            (Some(_), false) => {}
            (None, true) => self.env.handles().publish(self.node.family(), opened),
            (None, false) => self.env.handles().release(self.node.family()),
        }
        self.finish();
        res
    }

    /// Aborts the transaction, discarding its writes and the handles it
    /// opened. An open child transaction is aborted first.
    pub fn abort(&mut self) -> LmdbResult<()> {
        self.node.expect_state(TxnState::Ready)?;
        self.node.ensure_can_end(false)?;
        self.node.abort_open_child();

        unsafe { ffi::mdb_txn_abort(self.node.ptr()) };
        self.node.set_state(TxnState::Done);
        self.node.take_opened();
        if !self.node.is_nested() {
            self.env.handles().release(self.node.family());
        }
        self.finish();
        tracing::debug!(target: "lmdb", parent: &self.span, "aborted transaction");
        Ok(())
    }

    /// Bookkeeping after the engine transaction is gone.
    fn finish(&self) {
        self.node.detach_from_parent();
        if self.node.take_writer() {
            self.env.release_writer();
        }
        if !self.node.is_nested() {
            self.env.release_live();
        }
        if let Some(parent) = self.node.parent()
            && let Some(env) = parent.take_pending_close()
        {
            tracing::debug!(target: "lmdb", "running postponed close of parent transaction");
            drop(Transaction::<RW>::revive(env, parent));
        }
    }

    /// Closes the transaction, aborting it if still open.
    ///
    /// Idempotent. The transaction cannot be used afterwards.
    pub fn close(&mut self) {
        match self.node.state() {
            TxnState::Ready if self.node.subtree_pinned() => {
                tracing::warn!(
                    target: "lmdb",
                    parent: &self.span,
                    "value of a nested transaction still borrowed, postponing close"
                );
                self.node.defer_close(self.env.clone());
                return;
            }
            TxnState::Ready => {
                let _ = self.abort();
            }
            TxnState::Reset => {
                unsafe { ffi::mdb_txn_abort(self.node.ptr()) };
                self.finish();
            }
            TxnState::Done | TxnState::Released => {}
        }
        self.node.set_state(TxnState::Released);
    }
}

impl<K> fmt::Debug for Transaction<K>
where
    K: TransactionKind,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("read_only", &K::IS_READ_ONLY)
            .field("state", &self.node.state())
            .field("nested", &self.node.is_nested())
            .finish_non_exhaustive()
    }
}

impl<K> Drop for Transaction<K>
where
    K: TransactionKind,
{
    fn drop(&mut self) {
        self.close();
    }
}

impl Transaction<RW> {
    /// Opens a handle to a database, creating the database if necessary.
    ///
    /// If the database is already created, the given option flags will be
    /// added to it.
    pub fn create_db(&self, name: Option<&str>, flags: DatabaseFlags) -> LmdbResult<Database> {
        self.open_inner(name, flags | DatabaseFlags::CREATE, None)
    }

    /// As [`create_db`](Self::create_db), installing the orderings of
    /// `config`.
    pub fn create_db_with(
        &self,
        name: Option<&str>,
        flags: DatabaseFlags,
        config: DbiConfig,
    ) -> LmdbResult<Database> {
        self.open_inner(name, flags | DatabaseFlags::CREATE, Some(config))
    }

    /// Marks every value read so far as stale and returns the pointer.
    fn ready_for_write(&self) -> LmdbResult<*mut ffi::MDB_txn> {
        let txn = self.ready()?;
        self.node.ensure_writable()?;
        self.node.bump_epoch();
        Ok(txn)
    }

    /// Stores an item into a database.
    ///
    /// This function stores key/data pairs in the database. The default
    /// behavior is to enter the new key/data pair, replacing any previously
    /// existing key if duplicates are disallowed, or adding a duplicate data
    /// item if duplicates are allowed ([`DatabaseFlags::DUP_SORT`]).
    ///
    /// With [`WriteFlags::NO_OVERWRITE`] or [`WriteFlags::NO_DUP_DATA`] an
    /// existing item fails the call with [`LmdbError::KeyExist`], as does an
    /// out-of-order key under [`WriteFlags::APPEND`].
    ///
    /// [`WriteFlags::RESERVE`] is rejected with [`LmdbError::ReserveInPut`];
    /// use [`with_reservation`](Self::with_reservation) instead.
    pub fn put(
        &self,
        db: Database,
        key: impl AsRef<[u8]>,
        data: impl AsRef<[u8]>,
        flags: WriteFlags,
    ) -> LmdbResult<()> {
        if flags.contains(WriteFlags::RESERVE) {
            return Err(LmdbError::ReserveInPut);
        }
        let key = key.as_ref();
        let data = data.as_ref();
        assertions::debug_assert_put(self.env.key_limit(), db.flags(), key, data);

        let txn = self.ready_for_write()?;
        let mut key_val = slice_to_val(Some(key));
        let mut data_val = slice_to_val(Some(data));
        self.check(unsafe { ffi::mdb_put(txn, db.dbi(), &mut key_val, &mut data_val, flags.bits()) })
    }

    /// Returns a buffer which can be used to write a value into the item at
    /// the given key and with the given length. The buffer must be completely
    /// filled by the caller.
    ///
    /// Fails with [`LmdbError::ReserveOnDupSort`] on
    /// [`DatabaseFlags::DUP_SORT`] databases.
    ///
    /// # Safety
    ///
    /// The caller must ensure that the returned buffer is not used after any
    /// other call on this transaction.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn reserve(
        &self,
        db: Database,
        key: impl AsRef<[u8]>,
        len: usize,
        flags: WriteFlags,
    ) -> LmdbResult<&mut [u8]> {
        if db.is_dup_sort() {
            return Err(LmdbError::ReserveOnDupSort);
        }
        let key = key.as_ref();
        assertions::debug_assert_key(self.env.key_limit(), db.flags(), key);

        let txn = self.ready_for_write()?;
        let mut key_val = slice_to_val(Some(key));
        let mut data_val = ffi::MDB_val { mv_size: len, mv_data: ptr::null_mut() };
        self.check(unsafe {
            ffi::mdb_put(txn, db.dbi(), &mut key_val, &mut data_val, flags.bits() | ffi::MDB_RESERVE)
        })?;
        if len == 0 {
            return Ok(&mut []);
        }
        Ok(unsafe { slice::from_raw_parts_mut(data_val.mv_data as *mut u8, data_val.mv_size) })
    }

    /// Reserves space for a value of the given length at the given key, and
    /// calls the given closure with a mutable slice to write into.
    ///
    /// This is a safe wrapper around [`Transaction::reserve`]. Writes to the
    /// transaction from inside `f` fail with [`LmdbError::ValueBorrowed`].
    pub fn with_reservation(
        &self,
        db: Database,
        key: impl AsRef<[u8]>,
        len: usize,
        flags: WriteFlags,
        f: impl FnOnce(&mut [u8]),
    ) -> LmdbResult<()> {
        let buf = unsafe { self.reserve(db, key, len, flags)? };
        let _pin = self.node.pin();
        f(buf);
        Ok(())
    }

    /// Delete items from a database.
    ///
    /// If `data` is [`Some`] only the matching data item is deleted.
    /// Otherwise all values of the key are deleted.
    ///
    /// Returns `true` if the key/value pair was present.
    pub fn del(
        &self,
        db: Database,
        key: impl AsRef<[u8]>,
        data: Option<&[u8]>,
    ) -> LmdbResult<bool> {
        let key = key.as_ref();
        assertions::debug_assert_key(self.env.key_limit(), db.flags(), key);

        let txn = self.ready_for_write()?;
        let mut key_val = slice_to_val(Some(key));
        let mut data_val = data.map(|d| slice_to_val(Some(d)));
        let data_ptr = data_val.as_mut().map_or(ptr::null_mut(), |d| d as *mut ffi::MDB_val);

        match unsafe { ffi::mdb_del(txn, db.dbi(), &mut key_val, data_ptr) } {
            ffi::MDB_SUCCESS => Ok(true),
            ffi::MDB_NOTFOUND => Ok(false),
            code => self.check(code).map(|_| false),
        }
    }

    /// Empties the given database. All items will be removed and the handle
    /// stays open.
    pub fn clear_db(&self, db: Database) -> LmdbResult<()> {
        let txn = self.ready_for_write()?;
        self.check(unsafe { ffi::mdb_drop(txn, db.dbi(), 0) })
    }

    /// Deletes the database from the environment and closes its handle.
    ///
    /// The handle must not be used again, by this or any other transaction.
    pub fn drop_db(&mut self, db: Database) -> LmdbResult<()> {
        let txn = self.ready_for_write()?;
        self.check(unsafe { ffi::mdb_drop(txn, db.dbi(), 1) })?;
        self.node.forget_dbi(db.dbi());
        self.env.handles().remove(db.dbi());
        tracing::debug!(target: "lmdb", parent: &self.span, dbi = db.dbi(), "dropped database");
        Ok(())
    }

    /// Begins a new nested transaction inside of this transaction.
    ///
    /// Until the child commits or aborts, this transaction only accepts
    /// [`commit`](Self::commit), [`abort`](Self::abort) and
    /// [`close`](Self::close); everything else fails with
    /// [`LmdbError::ChildTransactionOpen`].
    pub fn begin_nested_txn(&self) -> LmdbResult<Self> {
        if self.env.is_write_map() {
            return Err(LmdbError::NestedWithWriteMap);
        }
        let parent = self.ready()?;
        let ptr = self.env.txn_begin(parent, RW::OPEN_FLAGS)?;
        let node = TxnNode::nested(ptr, &self.node);
        Ok(Self::from_node(self.env.clone(), node))
    }
}

impl Transaction<RO> {
    /// Releases the snapshot while keeping the transaction for a later
    /// [`renew`](Self::renew).
    ///
    /// Handles opened by this transaction are discarded.
    pub fn reset(&mut self) -> LmdbResult<()> {
        self.node.expect_state(TxnState::Ready)?;
        unsafe { ffi::mdb_txn_reset(self.node.ptr()) };
        self.node.set_state(TxnState::Reset);
        self.node.take_opened();
        self.env.handles().release(self.node.family());
        Ok(())
    }

    /// Acquires a new snapshot after [`reset`](Self::reset).
    pub fn renew(&mut self) -> LmdbResult<()> {
        self.node.expect_state(TxnState::Reset)?;
        self.check(unsafe { ffi::mdb_txn_renew(self.node.ptr()) })?;
        self.node.bump_epoch();
        self.node.set_state(TxnState::Ready);
        Ok(())
    }

    /// Wraps the transaction so it can be moved to another thread.
    ///
    /// Requires an environment opened with
    /// [`EnvironmentFlags::NO_TLS`](crate::EnvironmentFlags::NO_TLS).
    /// Otherwise the transaction is closed and
    /// [`LmdbError::RequiresNoTls`] is returned.
    pub fn into_sendable(self) -> LmdbResult<SendableRoTxn> {
        if !self.env.is_no_tls() {
            return Err(LmdbError::RequiresNoTls);
        }
        Ok(SendableRoTxn(self))
    }
}

/// A read-only transaction that may cross threads.
///
/// Obtained from [`Transaction::into_sendable`].
#[derive(Debug)]
pub struct SendableRoTxn(Transaction<RO>);

impl SendableRoTxn {
    /// Unwraps the transaction on the receiving thread.
    pub fn into_inner(self) -> Transaction<RO> {
        self.0
    }
}

// SAFETY: with NO_TLS the reader slot belongs to the transaction rather than
// the thread. No borrows of the transaction can exist while it is wrapped,
// and the node is owned by this transaction alone.
unsafe impl Send for SendableRoTxn {}
