use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use parking_lot::{Mutex, RwLock};
use tracing::debug;
use crate::types::DatabaseError;
use super::lock::LockSys;
use super::read_view::ReadView;
use super::undo::UndoLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrxState {
    Active,
    Committed,
    RolledBack,
}

/// What a transaction is currently blocked on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitMode {
    #[default]
    NoLock,
    LockTable,
    LockRow,
}

/// A user transaction, shared between the executors working on its behalf
#[derive(Debug)]
pub struct Transaction {
    id: u64,
    state: Mutex<TrxState>,
    /// Created on the first consistent read
    read_view: Mutex<Option<ReadView>>,
    /// Roll pointers of the undo records written, oldest first
    undo: Mutex<Vec<u64>>,
    wait_mode: Mutex<WaitMode>,
}

impl Transaction {
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> TrxState {
        *self.state.lock()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == TrxState::Active
    }

    #[must_use]
    pub fn wait_mode(&self) -> WaitMode {
        *self.wait_mode.lock()
    }

    pub fn set_wait_mode(&self, mode: WaitMode) {
        *self.wait_mode.lock() = mode;
    }

    pub fn push_undo(&self, roll_ptr: u64) {
        self.undo.lock().push(roll_ptr);
    }

    #[must_use]
    pub fn n_undo(&self) -> usize {
        self.undo.lock().len()
    }

    #[must_use]
    pub fn has_read_view(&self) -> bool {
        self.read_view.lock().is_some()
    }
}

/// Transaction system shared by every executor of a database
///
/// Provides:
/// - Atomic transaction ID generation
/// - Active transaction tracking for MVCC visibility
/// - Read views, the undo log and the lock manager
pub struct TrxSys {
    next_trx_id: AtomicU64,
    active: RwLock<HashSet<u64>>,
    /// `xmin` of every open read view, by owning transaction
    view_xmins: Mutex<HashMap<u64, u64>>,
    undo: UndoLog,
    lock_sys: LockSys,
}

impl TrxSys {
    #[must_use]
    pub fn new(lock_wait_timeout: Duration) -> Self {
        Self {
            // 0 marks records written outside any transaction
            next_trx_id: AtomicU64::new(1),
            active: RwLock::new(HashSet::new()),
            view_xmins: Mutex::new(HashMap::new()),
            undo: UndoLog::new(),
            lock_sys: LockSys::new(lock_wait_timeout),
        }
    }

    pub fn begin(&self) -> Arc<Transaction> {
        let mut active = self.active.write();
        let id = self.next_trx_id.fetch_add(1, Ordering::SeqCst);
        active.insert(id);
        debug!(trx_id = id, "transaction started");
        Arc::new(Transaction {
            id,
            state: Mutex::new(TrxState::Active),
            read_view: Mutex::new(None),
            undo: Mutex::new(Vec::new()),
            wait_mode: Mutex::new(WaitMode::NoLock),
        })
    }

    /// Read view of a transaction, taken on first use and kept until it ends
    pub fn read_view(&self, trx: &Transaction) -> ReadView {
        let mut slot = trx.read_view.lock();
        if let Some(view) = slot.as_ref() {
            return view.clone();
        }
        // Registered before the active set can change, so purge never
        // drops a version this view still needs
        let view = {
            let active = self.active.read();
            let others = active.iter().copied().filter(|&id| id != trx.id).collect();
            let view = ReadView::new(trx.id, others, self.next_trx_id.load(Ordering::SeqCst));
            self.view_xmins.lock().insert(trx.id, view.xmin);
            view
        };
        *slot = Some(view.clone());
        view
    }

    /// Next transaction id to be assigned
    #[must_use]
    pub fn current_trx_id(&self) -> u64 {
        self.next_trx_id.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_active(&self, trx_id: u64) -> bool {
        self.active.read().contains(&trx_id)
    }

    /// Has `trx_id` finished with a commit? Rolled back transactions leave
    /// no versions behind, so any finished writer counts as committed.
    #[must_use]
    pub fn is_committed(&self, trx_id: u64) -> bool {
        trx_id < self.current_trx_id() && !self.is_active(trx_id)
    }

    #[must_use]
    pub fn n_active(&self) -> usize {
        self.active.read().len()
    }

    #[must_use]
    pub const fn undo(&self) -> &UndoLog {
        &self.undo
    }

    #[must_use]
    pub const fn lock_sys(&self) -> &LockSys {
        &self.lock_sys
    }

    fn finish(&self, trx: &Transaction, state: TrxState) -> Result<(), DatabaseError> {
        let mut current = trx.state.lock();
        if *current != TrxState::Active {
            return Err(DatabaseError::TransactionNotActive(trx.id));
        }
        *current = state;
        {
            let mut active = self.active.write();
            active.remove(&trx.id);
            self.view_xmins.lock().remove(&trx.id);
        }
        *trx.read_view.lock() = None;
        self.lock_sys.release_all(trx.id);
        Ok(())
    }

    /// Make the changes of `trx` durable and release its locks
    pub fn commit(&self, trx: &Transaction) -> Result<(), DatabaseError> {
        self.finish(trx, TrxState::Committed)?;
        debug!(trx_id = trx.id, "transaction committed");
        self.purge();
        Ok(())
    }

    /// Oldest transaction id some active transaction or open read view may
    /// still need undo records for. Every version written below it is
    /// committed and visible to all current and future views.
    #[must_use]
    pub fn purge_limit(&self) -> u64 {
        let active = self.active.read();
        let oldest_view = self.view_xmins.lock().values().copied().min();
        let oldest_trx = active.iter().copied().min();
        [oldest_view, oldest_trx]
            .into_iter()
            .flatten()
            .fold(self.current_trx_id(), u64::min)
    }

    /// Drop the undo records no transaction can roll back or read through
    pub fn purge(&self) -> usize {
        let limit = self.purge_limit();
        let n_purged = self.undo.purge(limit);
        if n_purged > 0 {
            debug!(limit, n_purged, "undo records purged");
        }
        n_purged
    }

    /// Undo every change of `trx` in reverse order, then release its locks.
    /// No executor of `trx` may hold a latch scope at this point.
    pub fn rollback(&self, trx: &Transaction) -> Result<(), DatabaseError> {
        if !trx.is_active() {
            return Err(DatabaseError::TransactionNotActive(trx.id));
        }
        let roll_ptrs = std::mem::take(&mut *trx.undo.lock());
        for roll_ptr in roll_ptrs.iter().rev() {
            let Some(record) = self.undo.remove(*roll_ptr) else { continue };
            for change in record.changes.iter().rev() {
                change.index.tree.write().restore(&change.key, change.before.clone())?;
            }
        }
        self.finish(trx, TrxState::RolledBack)?;
        debug!(trx_id = trx.id, n_undo = roll_ptrs.len(), "transaction rolled back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::UndoRecord;

    fn trx_sys() -> TrxSys {
        TrxSys::new(Duration::from_millis(100))
    }

    #[test]
    fn test_begin_increments() {
        let sys = trx_sys();
        let t1 = sys.begin();
        let t2 = sys.begin();
        assert_eq!(t1.id(), 1);
        assert_eq!(t2.id(), 2);
        assert_eq!(sys.current_trx_id(), 3);
        assert_eq!(sys.n_active(), 2);
    }

    #[test]
    fn test_read_view_excludes_self_and_is_cached() {
        let sys = trx_sys();
        let t1 = sys.begin();
        let t2 = sys.begin();
        let view = sys.read_view(&t2);
        assert_eq!(view.active, HashSet::from([t1.id()]));
        assert!(!view.sees(t1.id()));
        assert!(view.sees(t2.id()));

        sys.commit(&t1).unwrap();
        // Same view until t2 ends
        assert!(!sys.read_view(&t2).sees(t1.id()));
    }

    #[test]
    fn test_commit_state() {
        let sys = trx_sys();
        let t1 = sys.begin();
        assert!(!sys.is_committed(t1.id()));
        sys.commit(&t1).unwrap();
        assert!(sys.is_committed(t1.id()));
        assert_eq!(t1.state(), TrxState::Committed);
        assert!(matches!(sys.commit(&t1), Err(DatabaseError::TransactionNotActive(1))));
    }

    #[test]
    fn test_purge_keeps_undo_needed_by_open_view() {
        let sys = trx_sys();
        let reader = sys.begin();
        let writer = sys.begin();
        let roll_ptr = sys.undo().alloc_roll_ptr();
        writer.push_undo(roll_ptr);
        sys.undo().add(UndoRecord::new(roll_ptr, writer.id(), None, Vec::new()).unwrap());

        // The reader's view predates the writer's commit
        let view = sys.read_view(&reader);
        sys.commit(&writer).unwrap();
        assert!(!view.sees(writer.id()));
        assert_eq!(sys.undo().len(), 1);
        assert_eq!(sys.purge_limit(), reader.id());

        sys.commit(&reader).unwrap();
        assert_eq!(sys.purge_limit(), sys.current_trx_id());
        assert!(sys.undo().is_empty());
    }

    #[test]
    fn test_purge_keeps_undo_of_active_trx() {
        let sys = trx_sys();
        let t1 = sys.begin();
        sys.undo().add(UndoRecord::new(sys.undo().alloc_roll_ptr(), t1.id(), None, Vec::new()).unwrap());
        assert_eq!(sys.purge(), 0);
        sys.commit(&t1).unwrap();
        assert!(sys.undo().is_empty());
    }

    #[test]
    fn test_rollback_releases_locks() {
        use crate::transaction::{LockMode, LockTarget};
        let sys = trx_sys();
        let t1 = sys.begin();
        sys.lock_sys().lock(t1.id(), LockTarget::Table(1), LockMode::IX).unwrap();
        assert_eq!(sys.lock_sys().n_locks(t1.id()), 1);
        sys.rollback(&t1).unwrap();
        assert_eq!(sys.lock_sys().n_locks(t1.id()), 0);
        assert_eq!(t1.state(), TrxState::RolledBack);
    }
}
