//! Transaction management and access.
//!
//! # Core Types (re-exported at crate root)
//!
//! - [`Transaction`] - A read-only ([`RO`]) or read-write ([`RW`])
//!   transaction, possibly nested
//! - [`Cursor`] - Database cursor for navigating entries, and
//!   [`UnboundCursor`] for read cursors kept across a reset
//! - [`Database`] - Handle to an opened database, with [`DbiConfig`] for
//!   custom orderings
//! - [`Iter`] - Iterators over cursor positions
//! - [`TxnState`] - Lifecycle state of a transaction

mod assertions;

mod cursor;
pub use cursor::{Cursor, UnboundCursor};

mod database;
pub use database::{Database, DbiConfig};

pub mod iter;
pub use iter::Iter;

mod kind;
pub use kind::{RO, RW, TransactionKind};

mod state;
pub(crate) use state::{BorrowPin, TxnNode};
pub use state::TxnState;

mod transaction;
pub use transaction::{SendableRoTxn, Transaction};
