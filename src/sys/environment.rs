use crate::{
    Database, EnvironmentFlags, LmdbError, LmdbResult, RO, RW, Transaction, TransactionFlags,
    error::lmdb_result,
    sys::handles::HandleTable,
};
use parking_lot::{Condvar, Mutex, RwLock};
use std::{
    ffi::{CString, c_int, c_uint},
    fmt, mem,
    path::{Path, PathBuf},
    ptr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
};

/// Map size used when the builder is not given one: 50 MiB.
pub const DEFAULT_MAP_SIZE: usize = 50 * 1024 * 1024;

/// File mode used by [`EnvironmentBuilder::open`].
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// What a second write transaction does while another one is active in the
/// same process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum WriteWait {
    /// Block until the active writer finishes.
    #[default]
    Block,
    /// Fail immediately with [`LmdbError::WriterBusy`].
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnvState {
    Open,
    Closed,
}

/// An environment supports multiple databases, all residing in the same
/// shared-memory map.
///
/// Accessing the environment is thread-safe. The environment is closed when
/// [`Environment::close`] succeeds or when the last clone is dropped.
#[derive(Clone)]
pub struct Environment {
    inner: Arc<EnvironmentInner>,
}

struct EnvironmentInner {
    env: *mut ffi::MDB_env,
    path: PathBuf,
    flags: EnvironmentFlags,
    max_dbs: u32,
    max_key_size: usize,
    write_wait: WriteWait,
    lifecycle: RwLock<EnvState>,
    poisoned: AtomicBool,
    /// Live transactions and unbound cursors.
    live: AtomicUsize,
    writer: Mutex<bool>,
    writer_released: Condvar,
    handles: HandleTable,
    next_family: AtomicU64,
}

// SAFETY: LMDB environments may be used from any thread. Closing is
// serialised by the lifecycle lock.
unsafe impl Send for EnvironmentInner {}
// SAFETY: see above.
unsafe impl Sync for EnvironmentInner {}

impl Drop for EnvironmentInner {
    fn drop(&mut self) {
        if *self.lifecycle.get_mut() == EnvState::Open {
            // SAFETY: every transaction and cursor holds a clone of the
            // environment, so nothing can use the pointer any more.
            unsafe { ffi::mdb_env_close(self.env) };
            tracing::debug!(target: "lmdb", path = %self.path.display(), "closed environment on drop");
        }
    }
}

impl Environment {
    /// Creates a new builder for specifying options for opening an LMDB
    /// environment.
    pub fn builder() -> EnvironmentBuilder {
        EnvironmentBuilder::default()
    }

    /// Runs `f` with the environment pointer while the environment is
    /// guaranteed to stay open.
    pub(crate) fn with_env<T>(
        &self,
        f: impl FnOnce(*mut ffi::MDB_env) -> LmdbResult<T>,
    ) -> LmdbResult<T> {
        let state = self.inner.lifecycle.read();
        if *state == EnvState::Closed {
            return Err(LmdbError::EnvironmentClosed);
        }
        self.observe(f(self.inner.env))
    }

    /// Marks the environment poisoned if `res` carries a fatal error.
    pub(crate) fn observe<T>(&self, res: LmdbResult<T>) -> LmdbResult<T> {
        if let Err(err) = &res {
            if err.is_fatal() && !self.inner.poisoned.swap(true, Ordering::AcqRel) {
                tracing::error!(target: "lmdb", %err, "fatal engine error, environment must be closed");
            }
        }
        res
    }

    /// Returns the path the environment was opened at.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Returns the flags the environment was opened with.
    pub fn open_flags(&self) -> EnvironmentFlags {
        self.inner.flags
    }

    /// Returns `true` if the environment was opened in
    /// [`EnvironmentFlags::READ_ONLY`] mode.
    pub fn is_read_only(&self) -> bool {
        self.inner.flags.contains(EnvironmentFlags::READ_ONLY)
    }

    /// Returns `true` if the environment was opened in
    /// [`EnvironmentFlags::WRITE_MAP`] mode.
    pub fn is_write_map(&self) -> bool {
        self.inner.flags.contains(EnvironmentFlags::WRITE_MAP)
    }

    /// Returns `true` if read transactions are not tied to threads.
    pub fn is_no_tls(&self) -> bool {
        self.inner.flags.contains(EnvironmentFlags::NO_TLS)
    }

    /// Returns `true` once the environment is closed.
    pub fn is_closed(&self) -> bool {
        *self.inner.lifecycle.read() == EnvState::Closed
    }

    /// Returns `true` if a fatal engine error was observed.
    pub fn is_poisoned(&self) -> bool {
        self.inner.poisoned.load(Ordering::Acquire)
    }

    /// Closes the environment.
    ///
    /// Fails with [`LmdbError::HandlesStillOpen`] while transactions or
    /// unbound cursors created from this environment are alive. Closing an
    /// already closed environment is a no-op.
    pub fn close(&self) -> LmdbResult<()> {
        let mut state = self.inner.lifecycle.write();
        if *state == EnvState::Closed {
            return Ok(());
        }
        let live = self.inner.live.load(Ordering::Acquire);
        if live > 0 {
            return Err(LmdbError::HandlesStillOpen(live));
        }
        // SAFETY: the write lock excludes every other user of the pointer and
        // no transaction is live.
        unsafe { ffi::mdb_env_close(self.inner.env) };
        *state = EnvState::Closed;
        tracing::debug!(target: "lmdb", path = %self.inner.path.display(), "closed environment");
        Ok(())
    }

    /// Create a read-only transaction for use with the environment.
    pub fn begin_ro_txn(&self) -> LmdbResult<Transaction<RO>> {
        Transaction::begin(self.clone(), TransactionFlags::empty())
    }

    /// Create a read-write transaction for use with the environment.
    ///
    /// Only one write transaction may be active at a time. What happens to a
    /// second one is decided by [`EnvironmentBuilder::set_write_wait`].
    pub fn begin_rw_txn(&self) -> LmdbResult<Transaction<RW>> {
        Transaction::begin(self.clone(), TransactionFlags::empty())
    }

    /// Create a read-write transaction with per-transaction sync options.
    pub fn begin_rw_txn_with(&self, flags: TransactionFlags) -> LmdbResult<Transaction<RW>> {
        Transaction::begin(self.clone(), flags)
    }

    /// Begins an engine transaction and counts it as live.
    pub(crate) fn txn_begin(
        &self,
        parent: *mut ffi::MDB_txn,
        flags: c_uint,
    ) -> LmdbResult<*mut ffi::MDB_txn> {
        if self.is_poisoned() {
            return Err(LmdbError::EnvironmentPoisoned);
        }
        self.with_env(|env| {
            let mut txn: *mut ffi::MDB_txn = ptr::null_mut();
            lmdb_result(unsafe { ffi::mdb_txn_begin(env, parent, flags, &mut txn) })?;
            if parent.is_null() {
                self.inner.live.fetch_add(1, Ordering::AcqRel);
            }
            Ok(txn)
        })
    }

    /// Returns `true` if both handles refer to the same open environment.
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Counts one more live object that keeps the environment open.
    pub(crate) fn retain_live(&self) {
        self.inner.live.fetch_add(1, Ordering::AcqRel);
    }

    /// Releases one live object counted by [`Self::txn_begin`] or
    /// [`Self::retain_live`].
    pub(crate) fn release_live(&self) {
        self.inner.live.fetch_sub(1, Ordering::AcqRel);
    }

    /// A fresh identifier for a root transaction tree.
    pub(crate) fn next_family(&self) -> u64 {
        self.inner.next_family.fetch_add(1, Ordering::Relaxed)
    }

    /// Takes the in-process writer slot, honouring the configured
    /// [`WriteWait`].
    pub(crate) fn acquire_writer(&self) -> LmdbResult<()> {
        let mut busy = self.inner.writer.lock();
        if *busy {
            match self.inner.write_wait {
                WriteWait::Fail => return Err(LmdbError::WriterBusy),
                WriteWait::Block => {
                    tracing::warn!(target: "lmdb", "write transaction blocked waiting for the active writer");
                    while *busy {
                        self.inner.writer_released.wait(&mut busy);
                    }
                }
            }
        }
        *busy = true;
        Ok(())
    }

    pub(crate) fn release_writer(&self) {
        *self.inner.writer.lock() = false;
        self.inner.writer_released.notify_one();
    }

    pub(crate) fn handles(&self) -> &HandleTable {
        &self.inner.handles
    }

    /// Returns the published database handles, by name.
    pub fn databases(&self) -> Vec<(Option<String>, Database)> {
        self.inner.handles.snapshot()
    }

    /// Closes a published database handle.
    ///
    /// # Safety
    ///
    /// No transaction may be using the handle, and it must not be used again
    /// after this call.
    pub unsafe fn close_db(&self, db: Database) -> LmdbResult<()> {
        self.with_env(|env| {
            unsafe { ffi::mdb_dbi_close(env, db.dbi()) };
            Ok(())
        })?;
        self.inner.handles.remove(db.dbi());
        tracing::debug!(target: "lmdb", dbi = db.dbi(), "closed database handle");
        Ok(())
    }

    /// Retrieves statistics about this environment.
    pub fn stat(&self) -> LmdbResult<Stat> {
        self.with_env(|env| {
            let mut stat = Stat::new();
            lmdb_result(unsafe { ffi::mdb_env_stat(env, stat.mdb_stat()) })?;
            Ok(stat)
        })
    }

    /// Retrieves info about this environment.
    pub fn info(&self) -> LmdbResult<Info> {
        self.with_env(|env| {
            let mut info = Info::new();
            lmdb_result(unsafe { ffi::mdb_env_info(env, info.mdb_info()) })?;
            Ok(info)
        })
    }

    /// Returns the current size of the memory map.
    pub fn map_size(&self) -> LmdbResult<usize> {
        self.info().map(|info| info.map_size())
    }

    /// Sets the size of the memory map.
    ///
    /// May only be called while no write transaction is active in this
    /// process. The new size is persisted by the next write commit.
    pub fn set_map_size(&self, size: usize) -> LmdbResult<()> {
        self.with_env(|env| lmdb_result(unsafe { ffi::mdb_env_set_mapsize(env, size as _) }))
    }

    /// Returns the configured maximum number of named databases.
    pub fn max_dbs(&self) -> u32 {
        self.inner.max_dbs
    }

    /// Returns the maximum number of reader slots.
    pub fn max_readers(&self) -> LmdbResult<u32> {
        self.with_env(|env| {
            let mut readers: c_uint = 0;
            lmdb_result(unsafe { ffi::mdb_env_get_maxreaders(env, &mut readers) })?;
            Ok(readers)
        })
    }

    /// Returns the largest key, in bytes, the engine accepts. Duplicate-sort
    /// data items share this bound.
    pub fn max_key_size(&self) -> LmdbResult<usize> {
        self.with_env(|_| Ok(self.inner.max_key_size))
    }

    pub(crate) fn key_limit(&self) -> usize {
        self.inner.max_key_size
    }

    /// Clears reader slots left behind by dead processes or threads and
    /// returns how many were cleared.
    pub fn reader_check(&self) -> LmdbResult<usize> {
        self.with_env(|env| {
            let mut dead: c_int = 0;
            lmdb_result(unsafe { ffi::mdb_reader_check(env, &mut dead) })?;
            Ok(dead as usize)
        })
    }

    /// Returns the current environment flags.
    pub fn flags(&self) -> LmdbResult<EnvironmentFlags> {
        self.with_env(|env| {
            let mut flags: c_uint = 0;
            lmdb_result(unsafe { ffi::mdb_env_get_flags(env, &mut flags) })?;
            Ok(EnvironmentFlags::from_bits_truncate(flags))
        })
    }

    /// Turns runtime-mutable environment flags on or off.
    ///
    /// Only [`EnvironmentFlags::NO_SYNC`], [`EnvironmentFlags::NO_META_SYNC`],
    /// [`EnvironmentFlags::MAP_ASYNC`] and [`EnvironmentFlags::NO_MEM_INIT`]
    /// can be changed. The engine rejects anything else with
    /// [`LmdbError::InvalidArgument`].
    pub fn set_flags(&self, flags: EnvironmentFlags, on: bool) -> LmdbResult<()> {
        self.with_env(|env| {
            lmdb_result(unsafe { ffi::mdb_env_set_flags(env, flags.bits(), c_int::from(on)) })
        })
    }

    /// Flushes the data buffers to disk.
    ///
    /// With `force` the flush happens even when the environment was opened
    /// with [`EnvironmentFlags::NO_SYNC`] or
    /// [`EnvironmentFlags::MAP_ASYNC`].
    pub fn sync(&self, force: bool) -> LmdbResult<()> {
        self.with_env(|env| lmdb_result(unsafe { ffi::mdb_env_sync(env, c_int::from(force)) }))
    }

    /// Copies the environment into `path`, which must be an existing empty
    /// directory. With `compact` free pages are omitted and pages are
    /// renumbered sequentially.
    pub fn copy_to(&self, path: &Path, compact: bool) -> LmdbResult<()> {
        let c_path = path_to_cstring(path)?;
        let flags = if compact { ffi::MDB_CP_COMPACT } else { 0 };
        self.with_env(|env| {
            lmdb_result(unsafe { ffi::mdb_env_copy2(env, c_path.as_ptr(), flags as _) })
        })?;
        tracing::debug!(target: "lmdb", to = %path.display(), compact, "copied environment");
        Ok(())
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("path", &self.inner.path)
            .field("flags", &self.inner.flags)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

fn path_to_cstring(path: &Path) -> LmdbResult<CString> {
    CString::new(path.as_os_str().as_encoded_bytes()).map_err(|_| LmdbError::InvalidArgument)
}

/// Environment statistics.
///
/// Contains information about the size and layout of an LMDB environment or
/// database.
#[derive(Clone, Copy)]
#[repr(transparent)]
pub struct Stat(ffi::MDB_stat);

impl Stat {
    /// Create a new Stat with zero'd inner struct `ffi::MDB_stat`.
    pub(crate) const fn new() -> Self {
        // SAFETY: MDB_stat is plain integers.
        unsafe { Self(mem::zeroed()) }
    }

    /// Returns a mut pointer to `ffi::MDB_stat`.
    pub(crate) const fn mdb_stat(&mut self) -> *mut ffi::MDB_stat {
        &mut self.0
    }

    /// Size of a database page in bytes.
    #[inline]
    pub const fn page_size(&self) -> u32 {
        self.0.ms_psize as u32
    }

    /// Depth (height) of the B-tree.
    #[inline]
    pub const fn depth(&self) -> u32 {
        self.0.ms_depth as u32
    }

    /// Number of internal (non-leaf) pages.
    #[inline]
    pub const fn branch_pages(&self) -> usize {
        self.0.ms_branch_pages as usize
    }

    /// Number of leaf pages.
    #[inline]
    pub const fn leaf_pages(&self) -> usize {
        self.0.ms_leaf_pages as usize
    }

    /// Number of overflow pages.
    #[inline]
    pub const fn overflow_pages(&self) -> usize {
        self.0.ms_overflow_pages as usize
    }

    /// Number of data items.
    #[inline]
    pub const fn entries(&self) -> usize {
        self.0.ms_entries as usize
    }
}

impl fmt::Debug for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stat")
            .field("page_size", &self.page_size())
            .field("depth", &self.depth())
            .field("branch_pages", &self.branch_pages())
            .field("leaf_pages", &self.leaf_pages())
            .field("overflow_pages", &self.overflow_pages())
            .field("entries", &self.entries())
            .finish()
    }
}

/// Environment information.
#[derive(Clone, Copy)]
#[repr(transparent)]
pub struct Info(ffi::MDB_envinfo);

impl Info {
    pub(crate) const fn new() -> Self {
        // SAFETY: MDB_envinfo is a pointer and integers, zero is valid.
        unsafe { Self(mem::zeroed()) }
    }

    pub(crate) const fn mdb_info(&mut self) -> *mut ffi::MDB_envinfo {
        &mut self.0
    }

    /// Size of the memory map in bytes.
    #[inline]
    pub const fn map_size(&self) -> usize {
        self.0.me_mapsize as usize
    }

    /// ID of the last used page.
    #[inline]
    pub const fn last_pgno(&self) -> usize {
        self.0.me_last_pgno as usize
    }

    /// ID of the last committed transaction.
    #[inline]
    pub const fn last_txnid(&self) -> usize {
        self.0.me_last_txnid as usize
    }

    /// Maximum number of reader slots.
    #[inline]
    pub const fn max_readers(&self) -> usize {
        self.0.me_maxreaders as usize
    }

    /// Number of reader slots in use.
    #[inline]
    pub const fn num_readers(&self) -> usize {
        self.0.me_numreaders as usize
    }
}

impl fmt::Debug for Info {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Info")
            .field("map_size", &self.map_size())
            .field("last_pgno", &self.last_pgno())
            .field("last_txnid", &self.last_txnid())
            .field("max_readers", &self.max_readers())
            .field("num_readers", &self.num_readers())
            .finish()
    }
}

/// Options for opening or creating an environment.
#[derive(Debug, Clone, Copy)]
pub struct EnvironmentBuilder {
    flags: EnvironmentFlags,
    map_size: usize,
    max_dbs: Option<u32>,
    max_readers: Option<u32>,
    write_wait: WriteWait,
}

impl Default for EnvironmentBuilder {
    fn default() -> Self {
        Self {
            flags: EnvironmentFlags::empty(),
            map_size: DEFAULT_MAP_SIZE,
            max_dbs: None,
            max_readers: None,
            write_wait: WriteWait::default(),
        }
    }
}

impl EnvironmentBuilder {
    /// Open an environment with [`DEFAULT_FILE_MODE`].
    ///
    /// The path must be an existing directory, or the data file itself with
    /// [`EnvironmentFlags::NO_SUB_DIR`].
    pub fn open(&self, path: &Path) -> LmdbResult<Environment> {
        self.open_with_permissions(path, DEFAULT_FILE_MODE)
    }

    /// Open an environment, creating its files with the given Unix mode.
    pub fn open_with_permissions(&self, path: &Path, mode: u32) -> LmdbResult<Environment> {
        let c_path = path_to_cstring(path)?;

        let mut env: *mut ffi::MDB_env = ptr::null_mut();
        lmdb_result(unsafe { ffi::mdb_env_create(&mut env) })?;

        // SAFETY: `env` was just created and is not shared.
        if let Err(err) = unsafe { self.configure(env, &c_path, mode) } {
            unsafe { ffi::mdb_env_close(env) };
            tracing::debug!(target: "lmdb", path = %path.display(), %err, "failed to open environment");
            return Err(err);
        }

        // SAFETY: `env` is open.
        let max_key_size = unsafe { ffi::mdb_env_get_maxkeysize(env) } as usize;
        tracing::debug!(target: "lmdb", path = %path.display(), flags = ?self.flags, "opened environment");

        Ok(Environment {
            inner: Arc::new(EnvironmentInner {
                env,
                path: path.to_path_buf(),
                flags: self.flags,
                max_dbs: self.max_dbs.unwrap_or(0),
                max_key_size,
                write_wait: self.write_wait,
                lifecycle: RwLock::new(EnvState::Open),
                poisoned: AtomicBool::new(false),
                live: AtomicUsize::new(0),
                writer: Mutex::new(false),
                writer_released: Condvar::new(),
                handles: HandleTable::default(),
                next_family: AtomicU64::new(1),
            }),
        })
    }

    unsafe fn configure(
        &self,
        env: *mut ffi::MDB_env,
        path: &CString,
        mode: u32,
    ) -> LmdbResult<()> {
        unsafe {
            lmdb_result(ffi::mdb_env_set_mapsize(env, self.map_size as _))?;
            if let Some(max_dbs) = self.max_dbs {
                lmdb_result(ffi::mdb_env_set_maxdbs(env, max_dbs))?;
            }
            if let Some(max_readers) = self.max_readers {
                lmdb_result(ffi::mdb_env_set_maxreaders(env, max_readers))?;
            }
            lmdb_result(ffi::mdb_env_open(env, path.as_ptr(), self.flags.bits(), mode as _))
        }
    }

    /// Sets the provided options in the environment.
    pub fn set_flags(&mut self, flags: EnvironmentFlags) -> &mut Self {
        self.flags = flags;
        self
    }

    /// Sets the size of the memory map in bytes.
    ///
    /// This is the largest the database can grow. It should be a multiple of
    /// the OS page size. Defaults to [`DEFAULT_MAP_SIZE`].
    pub fn set_map_size(&mut self, size: usize) -> &mut Self {
        self.map_size = size;
        self
    }

    /// Sets the maximum number of named databases.
    ///
    /// Only needed when more than the unnamed database is used.
    pub fn set_max_dbs(&mut self, max_dbs: u32) -> &mut Self {
        self.max_dbs = Some(max_dbs);
        self
    }

    /// Sets the maximum number of threads or reader slots for the
    /// environment. The engine default is 126.
    pub fn set_max_readers(&mut self, max_readers: u32) -> &mut Self {
        self.max_readers = Some(max_readers);
        self
    }

    /// Sets what a second write transaction in this process does while one
    /// is active.
    pub fn set_write_wait(&mut self, wait: WriteWait) -> &mut Self {
        self.write_wait = wait;
        self
    }
}
