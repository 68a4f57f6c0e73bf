//! Idiomatic and safe Rust bindings for [LMDB].
//!
//! # Overview
//!
//! [LMDB] is an embedded, memory-mapped, copy-on-write B-tree key-value
//! store with single-writer/multi-reader MVCC semantics.
//!
//! This crate provides a safe, idiomatic Rust interface for:
//! - Creating and managing memory-mapped database environments
//! - Performing transactional read and write operations, including nested
//!   write transactions
//! - Iterating over key-value pairs with cursors, including sorted duplicates
//! - Ordering keys and duplicates with built-in or caller-supplied
//!   [comparators](comparator)
//!
//! # Quick Start
//!
//! Databases are stored in a directory on disk. The following example
//! demonstrates creating an environment, writing a key-value pair, and
//! reading it back.
//!
//! ```no_run
//! use signet_lmdb::{DatabaseFlags, Environment, LmdbResult, WriteFlags};
//! use std::path::Path;
//!
//! fn main() -> LmdbResult<()> {
//!     // Open an environment in an existing directory
//!     let env = Environment::builder()
//!         .set_map_size(1024 * 1024 * 1024) // up to 1GB
//!         .open(Path::new("/tmp/my_database"))?;
//!
//!     // Write data in a read-write transaction
//!     let mut txn = env.begin_rw_txn()?;
//!     let db = txn.create_db(None, DatabaseFlags::empty())?;
//!     txn.put(db, b"hello", b"world", WriteFlags::empty())?;
//!     txn.commit()?;
//!
//!     // Read data in a read-only transaction
//!     let txn = env.begin_ro_txn()?;
//!     let db = txn.open_db(None)?;
//!     let value = txn.get(db, b"hello")?.map(|v| v.to_vec()).transpose()?;
//!     assert_eq!(value.as_deref(), Some(b"world".as_slice()));
//!
//!     Ok(())
//! }
//! ```
//!
//! # Key Concepts
//!
//! - [`Environment`] - A directory containing one or more databases. Created
//!   via [`Environment::builder()`].
//! - [`Transaction`] - The unit of atomicity and isolation. Typed by the
//!   [`RO`] and [`RW`] markers; only [`RW`] transactions can write.
//! - [`Database`] - A named or unnamed sorted key-value store within an
//!   environment. Opened with [`Transaction::open_db()`], created with
//!   [`Transaction::create_db()`].
//! - [`Cursor`] - Enables iteration and positioned access within a database.
//!   Created via [`Transaction::cursor()`].
//! - [`Value`] - A zero-copy view of engine memory, checked against the
//!   state of its transaction on every access.
//!
//! # Borrowed values
//!
//! Reads hand out [`Value`]s that point straight into the memory map. A
//! value borrows its transaction, so it cannot outlive a commit, abort or
//! reset. Writes through the same transaction may move the underlying pages;
//! they mark earlier values stale, and [`Value::try_get`] then fails with
//! [`LmdbError::StaleValue`]. The bytes are read through the [`ValueRef`]
//! guard that `try_get` returns. While a guard is alive the transaction
//! refuses writes with [`LmdbError::ValueBorrowed`]. Copy data out with
//! [`Value::to_vec`] when it must outlive the next write.
//!
//! # Debug assertions
//!
//! When compiled with debug assertions enabled (the default for
//! `cargo build`), this crate checks key sizes against the environment's
//! maximum key size, and key or data widths of `INTEGER_KEY` and
//! `INTEGER_DUP` databases, before calling into the engine.
//!
//! # Provenance
//!
//! Shaped after the MDBX bindings of [reth-libmdbx], which descend from the
//! original LMDB bindings of [lmdb-rs].
//!
//! [LMDB]: https://www.symas.com/lmdb
//! [reth-libmdbx]: https://github.com/paradigmxyz/reth
//! [lmdb-rs]: https://github.com/mozilla/lmdb-rs

#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    unreachable_pub,
    clippy::missing_const_for_fn,
    rustdoc::all
)]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![deny(unused_must_use, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub extern crate lmdb_master_sys as ffi;

pub mod comparator;
pub use comparator::{
    CompareFn, Comparer, clear_custom_comparers, custom_comparer, is_custom_comparer_registered,
    register_custom_comparer,
};

pub mod entries;
pub use entries::{Value, ValueRef};

mod error;
pub use error::{ErrorKind, LmdbError, LmdbResult};

mod flags;
pub use flags::{DatabaseFlags, EnvironmentFlags, TransactionFlags, WriteFlags};

pub mod sys;
pub use sys::{Environment, EnvironmentBuilder, Info, Stat, WriteWait};

pub mod tx;
pub use tx::{
    Cursor, Database, DbiConfig, RO, RW, SendableRoTxn, Transaction, TransactionKind, TxnState,
    UnboundCursor,
};
