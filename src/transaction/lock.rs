/// Lock manager: table and record locks with blocking waits
///
/// Requests are queued per lock target in arrival order. A request is
/// granted when it is compatible with every granted lock and every earlier
/// waiting request of other transactions. Deadlocks are detected when a
/// request has to wait; the requester is chosen as the victim.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};
use crate::catalog::{IndexId, TableId};
use crate::types::{DatabaseError, SortKey};

#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Intention shared (table only)
    IS,
    /// Intention exclusive (table only)
    IX,
    Shared,
    Exclusive,
}

impl LockMode {
    #[must_use]
    pub const fn compatible(self, other: Self) -> bool {
        use LockMode::{Shared, IS, IX};
        matches!(
            (self, other),
            (IS, IS | IX | Shared) | (IX, IS | IX) | (Shared, IS | Shared)
        )
    }

    /// Does holding `self` make a request for `other` redundant?
    #[must_use]
    pub const fn covers(self, other: Self) -> bool {
        use LockMode::{Exclusive, Shared, IS, IX};
        matches!(
            (self, other),
            (Exclusive, _) | (Shared, Shared | IS) | (IX, IX | IS) | (IS, IS)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockTarget {
    Table(TableId),
    Record(IndexId, SortKey),
}

#[derive(Debug, Clone)]
struct LockEntry {
    trx_id: u64,
    mode: LockMode,
    granted: bool,
}

#[derive(Debug, Default)]
struct LockState {
    queues: HashMap<LockTarget, Vec<LockEntry>>,
    /// Target each waiting transaction is queued on
    waiting: HashMap<u64, LockTarget>,
    /// Targets each transaction has entries on
    held: HashMap<u64, HashSet<LockTarget>>,
}

impl LockState {
    /// Transactions whose entries block the entry at `pos`
    fn blockers(queue: &[LockEntry], pos: usize) -> Vec<u64> {
        let req = &queue[pos];
        queue
            .iter()
            .enumerate()
            .filter(|(i, e)| {
                e.trx_id != req.trx_id
                    && (e.granted || *i < pos)
                    && !e.mode.compatible(req.mode)
            })
            .map(|(_, e)| e.trx_id)
            .collect()
    }

    /// Would `trx_id` waiting now close a cycle in the wait-for graph?
    fn creates_deadlock(&self, trx_id: u64) -> bool {
        let mut stack = vec![trx_id];
        let mut visited = HashSet::new();
        while let Some(current) = stack.pop() {
            let Some(target) = self.waiting.get(&current) else { continue };
            let Some(queue) = self.queues.get(target) else { continue };
            let Some(pos) = queue.iter().position(|e| e.trx_id == current && !e.granted) else { continue };
            for blocker in Self::blockers(queue, pos) {
                if blocker == trx_id {
                    return true;
                }
                if visited.insert(blocker) {
                    stack.push(blocker);
                }
            }
        }
        false
    }

    /// Drop the pending request of `trx_id`. Requests queued behind it may
    /// become grantable, so the queue is regranted.
    fn remove_waiting(&mut self, trx_id: u64) {
        let Some(target) = self.waiting.remove(&trx_id) else { return };
        let Some(queue) = self.queues.get_mut(&target) else { return };
        queue.retain(|e| e.trx_id != trx_id || e.granted);
        let still_held = queue.iter().any(|e| e.trx_id == trx_id);
        if queue.is_empty() {
            self.queues.remove(&target);
        } else {
            self.regrant(&target);
        }
        if !still_held {
            if let Some(held) = self.held.get_mut(&trx_id) {
                held.remove(&target);
            }
        }
    }

    /// Grant every waiting entry of a queue that is no longer blocked
    fn regrant(&mut self, target: &LockTarget) {
        let Some(queue) = self.queues.get_mut(target) else { return };
        for pos in 0..queue.len() {
            if !queue[pos].granted && Self::blockers(queue, pos).is_empty() {
                queue[pos].granted = true;
                self.waiting.remove(&queue[pos].trx_id);
            }
        }
    }
}

pub struct LockSys {
    state: Mutex<LockState>,
    cond: Condvar,
    timeout: Duration,
}

impl LockSys {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: Mutex::new(LockState::default()),
            cond: Condvar::new(),
            timeout,
        }
    }

    /// Request a lock. Returns `LockWait` when the request was queued and the
    /// caller must block in `wait`, `Deadlock` when queuing would deadlock.
    pub fn lock(&self, trx_id: u64, target: LockTarget, mode: LockMode) -> Result<(), DatabaseError> {
        let mut state = self.state.lock();
        let queue = state.queues.entry(target.clone()).or_default();

        if queue.iter().any(|e| e.trx_id == trx_id && e.granted && e.mode.covers(mode)) {
            return Ok(());
        }

        queue.push(LockEntry { trx_id, mode, granted: false });
        let pos = queue.len() - 1;
        let granted = LockState::blockers(queue, pos).is_empty();
        queue[pos].granted = granted;
        state.held.entry(trx_id).or_default().insert(target.clone());

        if granted {
            return Ok(());
        }

        state.waiting.insert(trx_id, target.clone());
        if state.creates_deadlock(trx_id) {
            state.remove_waiting(trx_id);
            drop(state);
            self.cond.notify_all();
            warn!(trx_id, ?target, "deadlock detected, rolling back requester");
            return Err(DatabaseError::Deadlock);
        }
        debug!(trx_id, ?target, ?mode, "lock request must wait");
        Err(DatabaseError::LockWait)
    }

    /// Block until the pending request of `trx_id` is granted or times out
    pub fn wait(&self, trx_id: u64) -> Result<(), DatabaseError> {
        let deadline = Instant::now() + self.timeout;
        let mut state = self.state.lock();
        while state.waiting.contains_key(&trx_id) {
            if self.cond.wait_until(&mut state, deadline).timed_out() && state.waiting.contains_key(&trx_id) {
                state.remove_waiting(trx_id);
                drop(state);
                self.cond.notify_all();
                warn!(trx_id, timeout_ms = self.timeout.as_millis() as u64, "lock wait timeout");
                return Err(DatabaseError::LockWaitTimeout);
            }
        }
        Ok(())
    }

    /// Release every lock of a transaction and wake granted waiters
    pub fn release_all(&self, trx_id: u64) {
        let mut state = self.state.lock();
        state.waiting.remove(&trx_id);
        let targets = state.held.remove(&trx_id).unwrap_or_default();
        for target in &targets {
            if let Some(queue) = state.queues.get_mut(target) {
                queue.retain(|e| e.trx_id != trx_id);
                if queue.is_empty() {
                    state.queues.remove(target);
                    continue;
                }
            }
            state.regrant(target);
        }
        drop(state);
        self.cond.notify_all();
    }

    #[must_use]
    pub fn is_waiting(&self, trx_id: u64) -> bool {
        self.state.lock().waiting.contains_key(&trx_id)
    }

    /// Number of transactions currently waiting for a lock
    #[must_use]
    pub fn n_waiting(&self) -> usize {
        self.state.lock().waiting.len()
    }

    /// Does `trx_id` hold a granted lock on `target` covering `mode`?
    #[must_use]
    pub fn holds(&self, trx_id: u64, target: &LockTarget, mode: LockMode) -> bool {
        self.state.lock().queues.get(target).is_some_and(|queue| {
            queue.iter().any(|e| e.trx_id == trx_id && e.granted && e.mode.covers(mode))
        })
    }

    #[must_use]
    pub fn n_locks(&self, trx_id: u64) -> usize {
        self.state.lock().held.get(&trx_id).map_or(0, HashSet::len)
    }
}
