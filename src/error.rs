use crate::{Comparer, TxnState};
use std::{
    ffi::{CStr, c_int},
    io,
};

/// An LMDB result.
pub type LmdbResult<T> = Result<T, LmdbError>;

/// Coarse classification of an [`LmdbError`].
///
/// Callers usually only need to know which of these buckets a failure falls
/// into: a [`Conflict`](ErrorKind::Conflict) is an expected outcome of a
/// uniqueness flag, while a [`Fatal`](ErrorKind::Fatal) error means the
/// environment must be closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The requested item does not exist.
    NotFound,
    /// A uniqueness option (`NO_OVERWRITE`, `NO_DUP_DATA`) was violated.
    Conflict,
    /// The operation is not permitted in the current state of the handle.
    InvalidState,
    /// A configured or physical limit was reached.
    ResourceExhaustion,
    /// The caller combined options or handles in an unsupported way.
    IllegalUsage,
    /// The engine requires the environment to be shut down.
    Fatal,
    /// Any other engine or OS failure.
    Other,
}

/// An LMDB error.
///
/// Engine failures carry the message LMDB itself reports for the code, see
/// [`LmdbError::engine_message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum LmdbError {
    /// Key/data pair already exists.
    #[error("MDB_KEYEXIST: Key/data pair already exists")]
    KeyExist,
    /// No matching key/data pair found.
    #[error("MDB_NOTFOUND: No matching key/data pair found")]
    NotFound,
    /// Requested page not found.
    #[error("MDB_PAGE_NOTFOUND: Requested page not found")]
    PageNotFound,
    /// Located page was wrong type.
    #[error("MDB_CORRUPTED: Located page was wrong type")]
    Corrupted,
    /// Update of meta page failed or environment had fatal error.
    #[error("MDB_PANIC: Update of meta page failed or environment had fatal error")]
    Panic,
    /// Database environment version mismatch.
    #[error("MDB_VERSION_MISMATCH: Database environment version mismatch")]
    VersionMismatch,
    /// File is not an LMDB file.
    #[error("MDB_INVALID: File is not an LMDB file")]
    Invalid,
    /// Environment mapsize limit reached.
    #[error("MDB_MAP_FULL: Environment mapsize limit reached")]
    MapFull,
    /// Environment maxdbs limit reached.
    #[error("MDB_DBS_FULL: Environment maxdbs limit reached")]
    DbsFull,
    /// Environment maxreaders limit reached.
    #[error("MDB_READERS_FULL: Environment maxreaders limit reached")]
    ReadersFull,
    /// Too many TLS keys in use.
    #[error("MDB_TLS_FULL: Thread-local storage keys full - too many environments open")]
    TlsFull,
    /// Transaction has too many dirty pages.
    #[error("MDB_TXN_FULL: Transaction has too many dirty pages - transaction too big")]
    TxnFull,
    /// Cursor stack limit reached.
    #[error("MDB_CURSOR_FULL: Internal error - cursor stack limit reached")]
    CursorFull,
    /// Page has no more space.
    #[error("MDB_PAGE_FULL: Internal error - page has no more space")]
    PageFull,
    /// Database contents grew beyond environment mapsize.
    #[error("MDB_MAP_RESIZED: Database contents grew beyond environment mapsize")]
    MapResized,
    /// Operation and database incompatible, or database flags changed.
    #[error("MDB_INCOMPATIBLE: Operation and DB incompatible, or DB flags changed")]
    Incompatible,
    /// Invalid reuse of reader locktable slot.
    #[error("MDB_BAD_RSLOT: Invalid reuse of reader locktable slot")]
    BadRslot,
    /// Transaction must abort, has a child, or is invalid.
    #[error("MDB_BAD_TXN: Transaction must abort, has a child, or is invalid")]
    BadTxn,
    /// Unsupported size of key, database name or data.
    #[error("MDB_BAD_VALSIZE: Unsupported size of key/DB name/data, or wrong DUPFIXED size")]
    BadValSize,
    /// The database handle was closed or changed unexpectedly.
    #[error("MDB_BAD_DBI: The specified DBI handle was closed/changed unexpectedly")]
    BadDbi,
    /// Permission denied, e.g. a write in a read-only environment.
    #[error("Permission denied")]
    Permission,
    /// Invalid argument.
    #[error("Invalid argument")]
    InvalidArgument,
    /// Out of memory.
    #[error("Cannot allocate memory")]
    OutOfMemory,

    /// The transaction is not in the state the operation requires.
    #[error("transaction is {actual}, operation requires {expected}")]
    BadTransactionState {
        /// The state the operation requires.
        expected: TxnState,
        /// The state the transaction is in.
        actual: TxnState,
    },
    /// The transaction has an open child and may only commit or abort.
    #[error("transaction has an open child transaction")]
    ChildTransactionOpen,
    /// A value was read before a mutation or the end of its transaction.
    #[error("value is stale: its transaction was modified or ended after the read")]
    StaleValue,
    /// A borrowed [`ValueRef`](crate::entries::ValueRef) or reservation is
    /// still held, so the transaction may not be modified or ended.
    #[error("a value borrowed from this transaction is still held")]
    ValueBorrowed,
    /// The environment has been closed.
    #[error("environment is closed")]
    EnvironmentClosed,
    /// A fatal engine error was observed and the environment must be closed.
    #[error("environment hit a fatal error and must be closed")]
    EnvironmentPoisoned,
    /// The environment still has live transactions or cursors.
    #[error("environment still has {0} live transactions or cursors")]
    HandlesStillOpen(usize),
    /// The cursor has been closed.
    #[error("cursor is closed")]
    CursorClosed,
    /// Another write transaction is active and the environment was
    /// configured not to wait.
    #[error("another write transaction is active")]
    WriterBusy,
    /// The operation requires a [`DUP_SORT`](crate::DatabaseFlags::DUP_SORT)
    /// database.
    #[error("operation requires a DUP_SORT database")]
    RequiresDupSort,
    /// The operation requires a [`DUP_FIXED`](crate::DatabaseFlags::DUP_FIXED)
    /// database.
    #[error("operation requires a DUP_FIXED database")]
    RequiresDupFixed,
    /// Reserve is not supported on duplicate-sort databases.
    #[error("reserve is not supported on DUP_SORT databases")]
    ReserveOnDupSort,
    /// `RESERVE` must go through the reservation API, not `put`.
    #[error("RESERVE is not accepted by put, use reserve or with_reservation")]
    ReserveInPut,
    /// A cursor was renewed onto a transaction of another environment.
    #[error("cursor belongs to a different environment")]
    CursorEnvMismatch,
    /// Only custom comparer slots accept registrations.
    #[error("{0:?} is not a custom comparer slot")]
    NotACustomSlot(Comparer),
    /// A database was opened with a custom comparer slot that is empty.
    #[error("no comparer registered for {0:?}")]
    ComparerNotRegistered(Comparer),
    /// Another live transaction is opening a database handle.
    #[error("another transaction is opening a database handle")]
    DbiOpenInProgress,
    /// Read transactions may only cross threads in a `NO_TLS` environment.
    #[error("read transactions can only be sent across threads with NO_TLS")]
    RequiresNoTls,
    /// Nested transactions are not supported in `WRITE_MAP` environments.
    #[error("nested transactions are not supported with WRITE_MAP")]
    NestedWithWriteMap,
    /// Any other engine or OS error code.
    #[error("{}", describe(.0))]
    Other(c_int),
}

impl LmdbError {
    /// Converts a raw error code to an [`LmdbError`].
    pub fn from_err_code(err_code: c_int) -> Self {
        match err_code {
            ffi::MDB_KEYEXIST => Self::KeyExist,
            ffi::MDB_NOTFOUND => Self::NotFound,
            ffi::MDB_PAGE_NOTFOUND => Self::PageNotFound,
            ffi::MDB_CORRUPTED => Self::Corrupted,
            ffi::MDB_PANIC => Self::Panic,
            ffi::MDB_VERSION_MISMATCH => Self::VersionMismatch,
            ffi::MDB_INVALID => Self::Invalid,
            ffi::MDB_MAP_FULL => Self::MapFull,
            ffi::MDB_DBS_FULL => Self::DbsFull,
            ffi::MDB_READERS_FULL => Self::ReadersFull,
            ffi::MDB_TLS_FULL => Self::TlsFull,
            ffi::MDB_TXN_FULL => Self::TxnFull,
            ffi::MDB_CURSOR_FULL => Self::CursorFull,
            ffi::MDB_PAGE_FULL => Self::PageFull,
            ffi::MDB_MAP_RESIZED => Self::MapResized,
            ffi::MDB_INCOMPATIBLE => Self::Incompatible,
            ffi::MDB_BAD_RSLOT => Self::BadRslot,
            ffi::MDB_BAD_TXN => Self::BadTxn,
            ffi::MDB_BAD_VALSIZE => Self::BadValSize,
            ffi::MDB_BAD_DBI => Self::BadDbi,
            code if code > 0 => match io::Error::from_raw_os_error(code).kind() {
                io::ErrorKind::PermissionDenied => Self::Permission,
                io::ErrorKind::InvalidInput => Self::InvalidArgument,
                io::ErrorKind::OutOfMemory => Self::OutOfMemory,
                _ => Self::Other(code),
            },
            other => Self::Other(other),
        }
    }

    /// Converts an [`LmdbError`] back to the engine error code, if it came
    /// from one.
    pub const fn to_err_code(&self) -> Option<c_int> {
        let code = match self {
            Self::KeyExist => ffi::MDB_KEYEXIST,
            Self::NotFound => ffi::MDB_NOTFOUND,
            Self::PageNotFound => ffi::MDB_PAGE_NOTFOUND,
            Self::Corrupted => ffi::MDB_CORRUPTED,
            Self::Panic => ffi::MDB_PANIC,
            Self::VersionMismatch => ffi::MDB_VERSION_MISMATCH,
            Self::Invalid => ffi::MDB_INVALID,
            Self::MapFull => ffi::MDB_MAP_FULL,
            Self::DbsFull => ffi::MDB_DBS_FULL,
            Self::ReadersFull => ffi::MDB_READERS_FULL,
            Self::TlsFull => ffi::MDB_TLS_FULL,
            Self::TxnFull => ffi::MDB_TXN_FULL,
            Self::CursorFull => ffi::MDB_CURSOR_FULL,
            Self::PageFull => ffi::MDB_PAGE_FULL,
            Self::MapResized => ffi::MDB_MAP_RESIZED,
            Self::Incompatible => ffi::MDB_INCOMPATIBLE,
            Self::BadRslot => ffi::MDB_BAD_RSLOT,
            Self::BadTxn => ffi::MDB_BAD_TXN,
            Self::BadValSize => ffi::MDB_BAD_VALSIZE,
            Self::BadDbi => ffi::MDB_BAD_DBI,
            Self::Other(code) => *code,
            _ => return None,
        };
        Some(code)
    }

    /// Returns the coarse classification of this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound => ErrorKind::NotFound,
            Self::KeyExist => ErrorKind::Conflict,
            Self::BadTransactionState { .. }
            | Self::ChildTransactionOpen
            | Self::StaleValue
            | Self::ValueBorrowed
            | Self::EnvironmentClosed
            | Self::EnvironmentPoisoned
            | Self::HandlesStillOpen(_)
            | Self::CursorClosed
            | Self::BadTxn
            | Self::BadRslot => ErrorKind::InvalidState,
            Self::MapFull
            | Self::TxnFull
            | Self::ReadersFull
            | Self::DbsFull
            | Self::CursorFull
            | Self::PageFull
            | Self::MapResized
            | Self::TlsFull
            | Self::OutOfMemory
            | Self::WriterBusy => ErrorKind::ResourceExhaustion,
            Self::RequiresDupSort
            | Self::RequiresDupFixed
            | Self::ReserveOnDupSort
            | Self::ReserveInPut
            | Self::CursorEnvMismatch
            | Self::NotACustomSlot(_)
            | Self::ComparerNotRegistered(_)
            | Self::DbiOpenInProgress
            | Self::RequiresNoTls
            | Self::NestedWithWriteMap
            | Self::Incompatible
            | Self::BadValSize
            | Self::BadDbi
            | Self::InvalidArgument
            | Self::Permission => ErrorKind::IllegalUsage,
            Self::Panic
            | Self::Corrupted
            | Self::PageNotFound
            | Self::VersionMismatch
            | Self::Invalid => ErrorKind::Fatal,
            Self::Other(_) => ErrorKind::Other,
        }
    }

    /// Returns `true` if the environment must be closed after this error.
    pub const fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Fatal)
    }

    /// Returns the message LMDB reports for this error.
    ///
    /// For errors raised by this crate rather than the engine, this is the
    /// error's [`Display`](std::fmt::Display) output.
    pub fn engine_message(&self) -> String {
        match self.to_err_code() {
            Some(code) => strerror(code),
            None => self.to_string(),
        }
    }
}

/// Looks up the engine's message for a raw error code.
pub(crate) fn strerror(code: c_int) -> String {
    // SAFETY: mdb_strerror returns a pointer to a static or thread-local
    // NUL-terminated string for every input.
    unsafe { CStr::from_ptr(ffi::mdb_strerror(code)) }.to_string_lossy().into_owned()
}

fn describe(code: &c_int) -> String {
    format!("{} (code {code})", strerror(*code))
}

#[inline]
pub(crate) fn lmdb_result(err_code: c_int) -> LmdbResult<()> {
    if err_code == ffi::MDB_SUCCESS { Ok(()) } else { Err(LmdbError::from_err_code(err_code)) }
}
