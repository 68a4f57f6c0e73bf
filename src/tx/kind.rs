use std::{ffi::c_uint, fmt::Debug};

mod private {
    pub trait Sealed {}
    impl Sealed for super::RO {}
    impl Sealed for super::RW {}
}

/// Marker type for read-only transactions.
#[derive(Debug, Clone, Copy)]
#[non_exhaustive]
pub struct RO;

/// Marker type for read-write transactions.
#[derive(Debug, Clone, Copy)]
#[non_exhaustive]
pub struct RW;

/// Marker trait for transaction kinds. Either [`RO`] or [`RW`].
pub trait TransactionKind: private::Sealed + Debug + 'static {
    #[doc(hidden)]
    const OPEN_FLAGS: c_uint;

    /// Convenience flag for distinguishing between read-only and read-write
    /// transactions.
    #[doc(hidden)]
    const IS_READ_ONLY: bool;

    /// Create a new tracing span for this transaction kind.
    #[doc(hidden)]
    fn new_span(txn_id: usize, nested: bool) -> tracing::Span {
        tracing::debug_span!(
            target: "lmdb",
            "lmdb_txn",
            kind = %if Self::IS_READ_ONLY { "ro" } else { "rw" },
            nested,
            txn_id,
        )
    }
}

impl TransactionKind for RO {
    const OPEN_FLAGS: c_uint = ffi::MDB_RDONLY;
    const IS_READ_ONLY: bool = true;
}

impl TransactionKind for RW {
    const OPEN_FLAGS: c_uint = 0;
    const IS_READ_ONLY: bool = false;
}
