//! Iterators over cursor positions.

use crate::{Cursor, LmdbResult, TransactionKind, entries::Pair};
use std::fmt;

/// An iterator over the key/value pairs in a database.
///
/// The direction of travel is the `OP` cursor operation, applied once per
/// step. Iteration ends when the engine reports no further item. Any other
/// failure is yielded once, after which the iterator is exhausted.
pub struct Iter<'tx, 'cur, K, const OP: u32 = { ffi::MDB_NEXT }>
where
    K: TransactionKind,
{
    cursor: &'cur mut Cursor<'tx, K>,
    /// Pre-fetched result of positioning the cursor, yielded before the
    /// first step.
    pending: Option<LmdbResult<Option<Pair<'tx>>>>,
    /// When true, the iterator is exhausted and will always return `None`.
    exhausted: bool,
}

/// Iterator over the duplicates of one key.
pub type IterDupOf<'tx, 'cur, K> = Iter<'tx, 'cur, K, { ffi::MDB_NEXT_DUP }>;

/// Iterator from the last item backwards.
pub type IterRev<'tx, 'cur, K> = Iter<'tx, 'cur, K, { ffi::MDB_PREV }>;

impl<'tx, 'cur, K, const OP: u32> Iter<'tx, 'cur, K, OP>
where
    K: TransactionKind,
{
    /// Create a new iterator, optionally yielding `first` before stepping.
    pub(crate) fn new(
        cursor: &'cur mut Cursor<'tx, K>,
        first: Option<LmdbResult<Option<Pair<'tx>>>>,
    ) -> Self {
        Self { cursor, pending: first, exhausted: false }
    }
}

impl<K, const OP: u32> fmt::Debug for Iter<'_, '_, K, OP>
where
    K: TransactionKind,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Iter").field("op", &OP).field("exhausted", &self.exhausted).finish()
    }
}

impl<'tx, K, const OP: u32> Iterator for Iter<'tx, '_, K, OP>
where
    K: TransactionKind,
{
    type Item = LmdbResult<Pair<'tx>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        let step = match self.pending.take() {
            Some(first) => first,
            None => self.cursor.step(OP),
        };
        match step {
            Ok(Some(pair)) => Some(Ok(pair)),
            Ok(None) => {
                self.exhausted = true;
                None
            }
            Err(err) => {
                self.exhausted = true;
                Some(Err(err))
            }
        }
    }
}

impl<K, const OP: u32> std::iter::FusedIterator for Iter<'_, '_, K, OP> where K: TransactionKind {}
