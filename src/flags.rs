use bitflags::bitflags;
use std::ffi::c_uint;

bitflags! {
    /// Environment options, passed to [`EnvironmentBuilder::set_flags`].
    ///
    /// Only [`NO_SYNC`](Self::NO_SYNC), [`NO_META_SYNC`](Self::NO_META_SYNC),
    /// [`MAP_ASYNC`](Self::MAP_ASYNC) and [`NO_MEM_INIT`](Self::NO_MEM_INIT)
    /// can be toggled after open with [`Environment::set_flags`].
    ///
    /// [`EnvironmentBuilder::set_flags`]: crate::EnvironmentBuilder::set_flags
    /// [`Environment::set_flags`]: crate::Environment::set_flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EnvironmentFlags: c_uint {
        /// Use a fixed address for the memory map.
        const FIXED_MAP = ffi::MDB_FIXEDMAP;
        /// The path is the data file itself rather than a directory.
        const NO_SUB_DIR = ffi::MDB_NOSUBDIR;
        /// Don't flush system buffers to disk when committing.
        const NO_SYNC = ffi::MDB_NOSYNC;
        /// Open the environment read-only.
        const READ_ONLY = ffi::MDB_RDONLY;
        /// Flush system buffers on commit, but omit the metadata flush.
        const NO_META_SYNC = ffi::MDB_NOMETASYNC;
        /// Use a writeable memory map.
        const WRITE_MAP = ffi::MDB_WRITEMAP;
        /// Use asynchronous msync when [`WRITE_MAP`](Self::WRITE_MAP) is
        /// used.
        const MAP_ASYNC = ffi::MDB_MAPASYNC;
        /// Tie reader slots to transactions instead of OS threads.
        const NO_TLS = ffi::MDB_NOTLS;
        /// Don't do any locking. The caller must serialise access.
        const NO_LOCK = ffi::MDB_NOLOCK;
        /// Turn off readahead.
        const NO_READAHEAD = ffi::MDB_NORDAHEAD;
        /// Don't initialize malloc'd memory before writing to disk.
        const NO_MEM_INIT = ffi::MDB_NOMEMINIT;
    }
}

bitflags! {
    /// Database options.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DatabaseFlags: c_uint {
        /// Keys are compared from the end toward the beginning.
        const REVERSE_KEY = ffi::MDB_REVERSEKEY;
        /// Duplicate keys may be used in the database.
        const DUP_SORT = ffi::MDB_DUPSORT;
        /// Keys are binary integers in native byte order, either `u32` or
        /// `usize`, and all keys must be the same size.
        const INTEGER_KEY = ffi::MDB_INTEGERKEY;
        /// With [`DUP_SORT`](Self::DUP_SORT), all data items are the same
        /// size.
        const DUP_FIXED = ffi::MDB_DUPFIXED;
        /// With [`DUP_SORT`](Self::DUP_SORT), data items are binary
        /// integers like [`INTEGER_KEY`](Self::INTEGER_KEY) keys.
        const INTEGER_DUP = ffi::MDB_INTEGERDUP;
        /// With [`DUP_SORT`](Self::DUP_SORT), data items are compared from
        /// the end toward the beginning.
        const REVERSE_DUP = ffi::MDB_REVERSEDUP;
        /// Create the named database if it doesn't exist.
        const CREATE = ffi::MDB_CREATE;
    }
}

bitflags! {
    /// Write options for puts and cursor puts.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct WriteFlags: c_uint {
        /// Fail with [`LmdbError::KeyExist`](crate::LmdbError::KeyExist) if
        /// the key already exists.
        const NO_OVERWRITE = ffi::MDB_NOOVERWRITE;
        /// Fail with [`LmdbError::KeyExist`](crate::LmdbError::KeyExist) if
        /// the key/data pair already exists. Only for
        /// [`DUP_SORT`](DatabaseFlags::DUP_SORT) databases.
        const NO_DUP_DATA = ffi::MDB_NODUPDATA;
        /// Replace the item at the current cursor position. Cursor puts only.
        const CURRENT = ffi::MDB_CURRENT;
        /// Reserve space for data of the given size but don't copy it.
        const RESERVE = ffi::MDB_RESERVE;
        /// Append the pair to the end of the database. Keys must be sorted.
        const APPEND = ffi::MDB_APPEND;
        /// As [`APPEND`](Self::APPEND), but for sorted duplicate data.
        const APPEND_DUP = ffi::MDB_APPENDDUP;
    }
}

bitflags! {
    /// Options for beginning a write transaction.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TransactionFlags: c_uint {
        /// Don't flush system buffers when this transaction commits.
        const NO_SYNC = ffi::MDB_NOSYNC;
        /// Don't flush the metadata page when this transaction commits.
        const NO_META_SYNC = ffi::MDB_NOMETASYNC;
    }
}
