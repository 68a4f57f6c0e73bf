//! Key and duplicate-data orderings.
//!
//! LMDB sorts keys (and, in [`DUP_SORT`] databases, data items) with a
//! comparison function installed when the database handle is opened. This
//! module offers a fixed set of built-in orderings plus four custom slots
//! backed by caller-supplied closures.
//!
//! The engine calls comparators through plain C function pointers. Every
//! [`Comparer`] therefore maps to one process-stable `extern "C"`
//! trampoline. The custom trampolines look up the currently registered
//! closure for their slot each time they are called.
//!
//! # Contract
//!
//! - Register a custom comparer before opening any database that uses it.
//!   Opening with an empty slot fails with
//!   [`LmdbError::ComparerNotRegistered`].
//! - Every process touching the same on-disk database must use the same
//!   ordering. A mismatch silently corrupts the B-tree.
//! - Re-registering a slot while a database opened under the old closure is
//!   still in use changes that database's ordering mid-flight.
//! - [`clear_custom_comparers`] exists for test isolation.
//!
//! ```
//! use signet_lmdb::{Comparer, register_custom_comparer};
//!
//! // Order keys by their first byte only.
//! register_custom_comparer(Comparer::Custom1, |a, b| a.first().cmp(&b.first())).unwrap();
//! assert!(signet_lmdb::is_custom_comparer_registered(Comparer::Custom1));
//! ```
//!
//! [`DUP_SORT`]: crate::DatabaseFlags::DUP_SORT

use crate::{LmdbError, LmdbResult};
use byteorder::{ByteOrder, NativeEndian};
use parking_lot::RwLock;
use std::{
    cmp::Ordering,
    ffi::c_int,
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    slice,
    sync::Arc,
};

/// A caller-supplied ordering function.
pub type CompareFn = Arc<dyn Fn(&[u8], &[u8]) -> Ordering + Send + Sync + 'static>;

/// The signature LMDB expects for comparison callbacks.
type RawCompareFn = unsafe extern "C" fn(*const ffi::MDB_val, *const ffi::MDB_val) -> c_int;

const CUSTOM_SLOTS: usize = 4;

static CUSTOM_COMPARERS: RwLock<[Option<CompareFn>; CUSTOM_SLOTS]> =
    parking_lot::const_rwlock([None, None, None, None]);

/// An ordering that can be installed on a database.
///
/// Every built-in has a `Reverse*` twin that negates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparer {
    /// Unsigned byte-lexicographic order. A shorter prefix sorts first.
    Bitwise,
    /// Reverse of [`Comparer::Bitwise`].
    ReverseBitwise,
    /// Order of the Unicode scalar values of the (lossily) decoded UTF-8
    /// strings.
    LexicographicString,
    /// Reverse of [`Comparer::LexicographicString`].
    ReverseLexicographicString,
    /// Native-endian unsigned integers. 4- and 8-byte values compare
    /// numerically. Other lengths sort by length, then bytewise.
    IntegerKey,
    /// Reverse of [`Comparer::IntegerKey`].
    ReverseIntegerKey,
    /// Length first, then bytewise.
    Length,
    /// Reverse of [`Comparer::Length`].
    ReverseLength,
    /// Length only. Values of equal length are considered equal.
    LengthOnly,
    /// Reverse of [`Comparer::LengthOnly`].
    ReverseLengthOnly,
    /// Content hash first, then bytewise on collision.
    ///
    /// The hash is the `Arrays.hashCode(byte[])` polynomial: starting from
    /// `1`, each byte, taken as signed, is folded in as `h * 31 + b` with
    /// 32-bit wrapping. Hashes are compared as signed integers, so other
    /// processes can reproduce the ordering.
    HashCode,
    /// Reverse of [`Comparer::HashCode`].
    ReverseHashCode,
    /// First custom slot.
    Custom1,
    /// Second custom slot.
    Custom2,
    /// Third custom slot.
    Custom3,
    /// Fourth custom slot.
    Custom4,
}

impl Comparer {
    /// Every comparer, built-ins first.
    pub const ALL: [Self; 16] = [
        Self::Bitwise,
        Self::ReverseBitwise,
        Self::LexicographicString,
        Self::ReverseLexicographicString,
        Self::IntegerKey,
        Self::ReverseIntegerKey,
        Self::Length,
        Self::ReverseLength,
        Self::LengthOnly,
        Self::ReverseLengthOnly,
        Self::HashCode,
        Self::ReverseHashCode,
        Self::Custom1,
        Self::Custom2,
        Self::Custom3,
        Self::Custom4,
    ];

    /// The custom slots.
    pub const CUSTOM: [Self; CUSTOM_SLOTS] =
        [Self::Custom1, Self::Custom2, Self::Custom3, Self::Custom4];

    /// Returns the index of the custom slot, or `None` for a built-in.
    pub const fn custom_slot(self) -> Option<usize> {
        match self {
            Self::Custom1 => Some(0),
            Self::Custom2 => Some(1),
            Self::Custom3 => Some(2),
            Self::Custom4 => Some(3),
            _ => None,
        }
    }

    /// Returns `true` for the custom slots.
    pub const fn is_custom(self) -> bool {
        self.custom_slot().is_some()
    }

    /// Compares two byte strings with this ordering.
    ///
    /// An empty custom slot compares bitwise.
    pub fn compare(self, a: &[u8], b: &[u8]) -> Ordering {
        match self {
            Self::Bitwise => bitwise(a, b),
            Self::ReverseBitwise => bitwise(a, b).reverse(),
            Self::LexicographicString => lexicographic_string(a, b),
            Self::ReverseLexicographicString => lexicographic_string(a, b).reverse(),
            Self::IntegerKey => integer(a, b),
            Self::ReverseIntegerKey => integer(a, b).reverse(),
            Self::Length => length(a, b),
            Self::ReverseLength => length(a, b).reverse(),
            Self::LengthOnly => length_only(a, b),
            Self::ReverseLengthOnly => length_only(a, b).reverse(),
            Self::HashCode => hash_code(a, b),
            Self::ReverseHashCode => hash_code(a, b).reverse(),
            Self::Custom1 | Self::Custom2 | Self::Custom3 | Self::Custom4 => {
                match custom_comparer(self) {
                    Some(f) => f(a, b),
                    None => bitwise(a, b),
                }
            }
        }
    }

    /// Fails if this is a custom slot with nothing registered.
    pub(crate) fn ensure_available(self) -> LmdbResult<()> {
        if self.is_custom() && !is_custom_comparer_registered(self) {
            return Err(LmdbError::ComparerNotRegistered(self));
        }
        Ok(())
    }

    /// The C callback LMDB should use for this ordering.
    pub(crate) fn as_ffi(self) -> ffi::MDB_cmp_func {
        let f: RawCompareFn = match self {
            Self::Bitwise => trampoline::<0>,
            Self::ReverseBitwise => trampoline::<1>,
            Self::LexicographicString => trampoline::<2>,
            Self::ReverseLexicographicString => trampoline::<3>,
            Self::IntegerKey => trampoline::<4>,
            Self::ReverseIntegerKey => trampoline::<5>,
            Self::Length => trampoline::<6>,
            Self::ReverseLength => trampoline::<7>,
            Self::LengthOnly => trampoline::<8>,
            Self::ReverseLengthOnly => trampoline::<9>,
            Self::HashCode => trampoline::<10>,
            Self::ReverseHashCode => trampoline::<11>,
            Self::Custom1 => trampoline::<12>,
            Self::Custom2 => trampoline::<13>,
            Self::Custom3 => trampoline::<14>,
            Self::Custom4 => trampoline::<15>,
        };
        Some(f)
    }
}

impl fmt::Display for Comparer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Registers `f` as the ordering for a custom slot, replacing any previous
/// registration.
///
/// Fails with [`LmdbError::NotACustomSlot`] for built-in comparers.
pub fn register_custom_comparer<F>(slot: Comparer, f: F) -> LmdbResult<()>
where
    F: Fn(&[u8], &[u8]) -> Ordering + Send + Sync + 'static,
{
    let index = slot.custom_slot().ok_or(LmdbError::NotACustomSlot(slot))?;
    CUSTOM_COMPARERS.write()[index] = Some(Arc::new(f));
    tracing::debug!(target: "lmdb", comparer = %slot, "registered custom comparer");
    Ok(())
}

/// Returns `true` if a closure is registered for `slot`.
///
/// Always `false` for built-in comparers.
pub fn is_custom_comparer_registered(slot: Comparer) -> bool {
    slot.custom_slot().is_some_and(|index| CUSTOM_COMPARERS.read()[index].is_some())
}

/// Returns the closure registered for `slot`, if any.
pub fn custom_comparer(slot: Comparer) -> Option<CompareFn> {
    slot.custom_slot().and_then(|index| CUSTOM_COMPARERS.read()[index].clone())
}

/// Removes every custom registration.
///
/// Databases still open with a custom comparer fall back to bitwise order,
/// which corrupts their ordering. Intended for isolating tests.
pub fn clear_custom_comparers() {
    *CUSTOM_COMPARERS.write() = [None, None, None, None];
}

/// Engine entry point for the comparer at position `ID` of [`Comparer::ALL`].
unsafe extern "C" fn trampoline<const ID: usize>(
    a: *const ffi::MDB_val,
    b: *const ffi::MDB_val,
) -> c_int {
    // SAFETY: LMDB passes two valid values that outlive the call.
    let (a, b) = unsafe { (val_bytes(&*a), val_bytes(&*b)) };
    let comparer = Comparer::ALL[ID];

    let ordering = match comparer.custom_slot() {
        None => comparer.compare(a, b),
        Some(_) => call_custom(comparer, a, b),
    };
    ordering as c_int
}

/// Runs a custom closure without letting a panic unwind into C.
fn call_custom(slot: Comparer, a: &[u8], b: &[u8]) -> Ordering {
    let Some(f) = custom_comparer(slot) else {
        tracing::warn!(target: "lmdb", comparer = %slot, "custom comparer missing, using bitwise order");
        return bitwise(a, b);
    };
    match catch_unwind(AssertUnwindSafe(|| f(a, b))) {
        Ok(ordering) => ordering,
        Err(_) => {
            tracing::error!(target: "lmdb", comparer = %slot, "custom comparer panicked, using bitwise order");
            bitwise(a, b)
        }
    }
}

/// # Safety
///
/// `val` must describe `mv_size` readable bytes that outlive `'a`.
unsafe fn val_bytes<'a>(val: &ffi::MDB_val) -> &'a [u8] {
    if val.mv_size == 0 {
        return &[];
    }
    unsafe { slice::from_raw_parts(val.mv_data as *const u8, val.mv_size as usize) }
}

fn bitwise(a: &[u8], b: &[u8]) -> Ordering {
    a.cmp(b)
}

fn lexicographic_string(a: &[u8], b: &[u8]) -> Ordering {
    String::from_utf8_lossy(a).cmp(&String::from_utf8_lossy(b))
}

fn integer(a: &[u8], b: &[u8]) -> Ordering {
    match (a.len(), b.len()) {
        (4, 4) => NativeEndian::read_u32(a).cmp(&NativeEndian::read_u32(b)),
        (8, 8) => NativeEndian::read_u64(a).cmp(&NativeEndian::read_u64(b)),
        (la, lb) => la.cmp(&lb).then_with(|| a.cmp(b)),
    }
}

fn length(a: &[u8], b: &[u8]) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn length_only(a: &[u8], b: &[u8]) -> Ordering {
    a.len().cmp(&b.len())
}

fn hash_code(a: &[u8], b: &[u8]) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }
    content_hash(a).cmp(&content_hash(b)).then_with(|| a.cmp(b))
}

/// 31-polynomial hash over signed bytes, stable across processes and
/// compatible with `java.util.Arrays.hashCode(byte[])`.
fn content_hash(bytes: &[u8]) -> i32 {
    bytes.iter().fold(1i32, |h, &b| h.wrapping_mul(31).wrapping_add(b as i8 as i32))
}
