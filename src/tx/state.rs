//! Transaction lifecycle bookkeeping.
//!
//! Each [`Transaction`](crate::Transaction) owns one [`TxnNode`]. Nested
//! transactions keep their parent's node alive, and a parent keeps a
//! [`Weak`] pointer to its open child. The node state is the single source
//! of truth for whether the engine pointer may be used.
//!
//! Borrowed views of engine memory pin their node. While any pin is held the
//! node and its descendants refuse writes, and no transaction of the family
//! may end in a way that frees pinned pages.

use crate::{Environment, LmdbError, LmdbResult, sys::handles::OpenedDb};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::{
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
};

/// The lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxnState {
    /// Open and usable.
    Ready,
    /// Committed or aborted. The engine transaction is gone.
    Done,
    /// A read-only transaction released its snapshot and may be renewed.
    Reset,
    /// Closed. Terminal.
    Released,
}

impl fmt::Display for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ready => "ready",
            Self::Done => "done",
            Self::Reset => "reset",
            Self::Released => "released",
        })
    }
}

/// One transaction in the nesting tree.
pub(crate) struct TxnNode {
    ptr: *mut ffi::MDB_txn,
    state: Mutex<TxnState>,
    /// Bumped by every mutation that may move or free engine pages.
    epoch: AtomicU64,
    /// Outstanding [`BorrowPin`]s.
    pins: AtomicUsize,
    /// Identifies the root of the nesting tree.
    family: u64,
    parent: Option<Arc<TxnNode>>,
    child: Mutex<Option<Weak<TxnNode>>>,
    /// Handles opened by this transaction and not yet published.
    opened: Mutex<SmallVec<[OpenedDb; 4]>>,
    /// Whether this node holds the environment's writer slot.
    holds_writer: AtomicBool,
    /// Set when the owning transaction was dropped while a descendant was
    /// pinned. The close runs once that descendant ends.
    pending_close: Mutex<Option<Environment>>,
}

impl fmt::Debug for TxnNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxnNode")
            .field("state", &self.state())
            .field("family", &self.family)
            .field("nested", &self.parent.is_some())
            .finish_non_exhaustive()
    }
}

impl TxnNode {
    /// A root transaction.
    pub(crate) fn root(ptr: *mut ffi::MDB_txn, family: u64, holds_writer: bool) -> Arc<Self> {
        Arc::new(Self {
            ptr,
            state: Mutex::new(TxnState::Ready),
            epoch: AtomicU64::new(0),
            pins: AtomicUsize::new(0),
            family,
            parent: None,
            child: Mutex::new(None),
            opened: Mutex::new(SmallVec::new()),
            holds_writer: AtomicBool::new(holds_writer),
            pending_close: Mutex::new(None),
        })
    }

    /// A child of `parent`, registered as its open child.
    pub(crate) fn nested(ptr: *mut ffi::MDB_txn, parent: &Arc<Self>) -> Arc<Self> {
        let child = Arc::new(Self {
            ptr,
            state: Mutex::new(TxnState::Ready),
            epoch: AtomicU64::new(0),
            pins: AtomicUsize::new(0),
            family: parent.family,
            parent: Some(Arc::clone(parent)),
            child: Mutex::new(None),
            opened: Mutex::new(SmallVec::new()),
            holds_writer: AtomicBool::new(false),
            pending_close: Mutex::new(None),
        });
        *parent.child.lock() = Some(Arc::downgrade(&child));
        child
    }

    pub(crate) const fn ptr(&self) -> *mut ffi::MDB_txn {
        self.ptr
    }

    pub(crate) const fn family(&self) -> u64 {
        self.family
    }

    pub(crate) fn is_nested(&self) -> bool {
        self.parent.is_some()
    }

    pub(crate) fn state(&self) -> TxnState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: TxnState) {
        *self.state.lock() = state;
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub(crate) fn bump_epoch(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    /// Pins the node until the returned guard is dropped.
    pub(crate) fn pin(&self) -> BorrowPin<'_> {
        self.pins.fetch_add(1, Ordering::AcqRel);
        BorrowPin(self)
    }

    fn is_pinned(&self) -> bool {
        self.pins.load(Ordering::Acquire) > 0
    }

    /// This node or an ancestor is pinned.
    fn lineage_pinned(&self) -> bool {
        self.is_pinned() || self.parent.as_deref().is_some_and(Self::lineage_pinned)
    }

    /// This node or an open descendant is pinned.
    pub(crate) fn subtree_pinned(&self) -> bool {
        self.is_pinned() || self.open_child().is_some_and(|child| child.subtree_pinned())
    }

    /// Fails with [`LmdbError::ValueBorrowed`] if a write could move pages
    /// that a pin protects.
    ///
    /// A nested write may spill pages of its ancestors, so their pins count.
    pub(crate) fn ensure_writable(&self) -> LmdbResult<()> {
        if self.lineage_pinned() {
            return Err(LmdbError::ValueBorrowed);
        }
        Ok(())
    }

    /// Fails with [`LmdbError::ValueBorrowed`] if ending the node would free
    /// pinned pages.
    ///
    /// Ending aborts open descendants. A nested commit also replaces pages of
    /// the parent.
    pub(crate) fn ensure_can_end(&self, commit: bool) -> LmdbResult<()> {
        let nested_commit = commit && self.is_nested();
        if self.subtree_pinned() || (nested_commit && self.lineage_pinned()) {
            return Err(LmdbError::ValueBorrowed);
        }
        Ok(())
    }

    /// Returns `true` if values read from this node may still be accessed.
    pub(crate) fn is_readable(&self) -> bool {
        self.state() == TxnState::Ready
    }

    /// Fails unless the node is in `expected`.
    pub(crate) fn expect_state(&self, expected: TxnState) -> LmdbResult<()> {
        let actual = self.state();
        if actual != expected {
            return Err(LmdbError::BadTransactionState { expected, actual });
        }
        Ok(())
    }

    /// Fails unless the node is [`TxnState::Ready`] and has no open child.
    pub(crate) fn ensure_ready(&self) -> LmdbResult<()> {
        self.expect_state(TxnState::Ready)?;
        if self.open_child().is_some() {
            return Err(LmdbError::ChildTransactionOpen);
        }
        Ok(())
    }

    /// The open child, if any.
    pub(crate) fn open_child(&self) -> Option<Arc<Self>> {
        let child = self.child.lock().as_ref().and_then(Weak::upgrade)?;
        (child.state() == TxnState::Ready).then_some(child)
    }

    pub(crate) fn parent(&self) -> Option<Arc<Self>> {
        self.parent.clone()
    }

    /// Aborts the open child and its descendants, deepest first.
    pub(crate) fn abort_open_child(&self) {
        if let Some(child) = self.open_child() {
            child.abort_open_child();
            // SAFETY: the child is Ready, so its pointer is live. Aborting a
            // child leaves the parent usable.
            unsafe { ffi::mdb_txn_abort(child.ptr) };
            child.opened.lock().clear();
            child.set_state(TxnState::Done);
            tracing::debug!(target: "lmdb", "aborted open child transaction");
        }
        *self.child.lock() = None;
    }

    /// Detaches this node from its parent's child slot.
    pub(crate) fn detach_from_parent(&self) {
        if let Some(parent) = self.parent() {
            let mut slot = parent.child.lock();
            if slot.as_ref().is_some_and(|w| std::ptr::eq(w.as_ptr(), self)) {
                *slot = None;
            }
        }
    }

    pub(crate) fn record_opened(&self, db: OpenedDb) {
        let mut opened = self.opened.lock();
        opened.retain(|o| o.db.dbi() != db.db.dbi());
        opened.push(db);
    }

    pub(crate) fn forget_dbi(&self, dbi: ffi::MDB_dbi) {
        self.opened.lock().retain(|o| o.db.dbi() != dbi);
    }

    /// Whether this node or an ancestor has unpublished handles.
    pub(crate) fn tree_has_opened(&self) -> bool {
        !self.opened.lock().is_empty() || self.parent().is_some_and(|p| p.tree_has_opened())
    }

    pub(crate) fn take_opened(&self) -> SmallVec<[OpenedDb; 4]> {
        std::mem::take(&mut *self.opened.lock())
    }

    pub(crate) fn defer_close(&self, env: Environment) {
        *self.pending_close.lock() = Some(env);
    }

    pub(crate) fn take_pending_close(&self) -> Option<Environment> {
        self.pending_close.lock().take()
    }

    /// Returns `true` exactly once if this node held the writer slot.
    pub(crate) fn take_writer(&self) -> bool {
        self.holds_writer.swap(false, Ordering::AcqRel)
    }
}

/// Keeps a [`TxnNode`] pinned while engine memory is borrowed from it.
pub(crate) struct BorrowPin<'a>(&'a TxnNode);

impl Drop for BorrowPin<'_> {
    fn drop(&mut self) {
        self.0.pins.fetch_sub(1, Ordering::AcqRel);
    }
}
