//! Debug assertions to catch LMDB constraint violations before they reach
//! the engine.
//!
//! LMDB bounds keys, and the data items of duplicate-sorted databases, by
//! the environment's maximum key size. Integer databases additionally need
//! fixed-width keys or data. Release builds leave all checks to the engine,
//! which reports [`LmdbError::BadValSize`](crate::LmdbError::BadValSize).

use crate::flags::DatabaseFlags;

/// Debug assertion that validates key size constraints.
#[inline]
pub(crate) fn debug_assert_key_size(max_key: usize, key: &[u8]) {
    debug_assert!(
        key.len() <= max_key,
        "Key size {} exceeds maximum {} for this environment",
        key.len(),
        max_key
    );
}

/// Debug assertion that validates the size of data items stored in
/// [`DatabaseFlags::DUP_SORT`] databases, which are stored as keys of a
/// sub-database.
#[inline]
pub(crate) fn debug_assert_dup_size(max_key: usize, flags: DatabaseFlags, value: &[u8]) {
    debug_assert!(
        !flags.contains(DatabaseFlags::DUP_SORT) || value.len() <= max_key,
        "DUP_SORT data size {} exceeds maximum {} for this environment",
        value.len(),
        max_key
    );
}

/// Debug assertion that validates key size for INTEGER_KEY databases (must be
/// 4 or 8 bytes).
#[inline]
pub(crate) fn debug_assert_integer_key(flags: DatabaseFlags, key: &[u8]) {
    debug_assert!(
        !flags.contains(DatabaseFlags::INTEGER_KEY) || key.len() == 4 || key.len() == 8,
        "INTEGER_KEY database requires key length of 4 or 8 bytes, got {}",
        key.len()
    );
}

/// Debug assertion that validates value size for INTEGER_DUP databases (must
/// be 4 or 8 bytes).
#[inline]
pub(crate) fn debug_assert_integer_dup(flags: DatabaseFlags, value: &[u8]) {
    debug_assert!(
        !flags.contains(DatabaseFlags::INTEGER_DUP) || value.len() == 4 || value.len() == 8,
        "INTEGER_DUP database requires value length of 4 or 8 bytes, got {}",
        value.len()
    );
}

/// Runs all key-related debug assertions.
#[inline]
pub(crate) fn debug_assert_key(max_key: usize, flags: DatabaseFlags, key: &[u8]) {
    debug_assert_key_size(max_key, key);
    debug_assert_integer_key(flags, key);
}

/// Runs all value-related debug assertions.
#[inline]
pub(crate) fn debug_assert_value(max_key: usize, flags: DatabaseFlags, value: &[u8]) {
    debug_assert_dup_size(max_key, flags, value);
    debug_assert_integer_dup(flags, value);
}

/// Runs all key and value debug assertions for put operations.
#[inline]
pub(crate) fn debug_assert_put(max_key: usize, flags: DatabaseFlags, key: &[u8], value: &[u8]) {
    debug_assert_key(max_key, flags, key);
    debug_assert_value(max_key, flags, value);
}
