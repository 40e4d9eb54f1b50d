//! Undo log: previous record versions for rollback and consistent reads

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use parking_lot::RwLock;
use crate::catalog::IndexDef;
use crate::storage::PageChange;
use crate::types::{DatabaseError, Record};
use super::read_view::ReadView;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoType {
    /// Record did not exist before; rollback removes it
    Insert,
    /// Record was updated or delete-marked; rollback restores it
    Modify,
}

#[derive(Debug, Clone)]
pub struct UndoRecord {
    /// Identifier of this undo record, stored in `DB_ROLL_PTR`
    pub roll_ptr: u64,
    pub trx_id: u64,
    pub undo_type: UndoType,
    /// Clustered record before the change (bincode), `None` for inserts
    pub old_data: Option<Vec<u8>>,
    /// Physical before-images of every record the change touched,
    /// secondary index entries included
    pub changes: Vec<PageChange>,
}

impl UndoRecord {
    pub fn new(
        roll_ptr: u64,
        trx_id: u64,
        old_clust: Option<&Record>,
        changes: Vec<PageChange>,
    ) -> Result<Self, DatabaseError> {
        let (undo_type, old_data) = match old_clust {
            Some(rec) => (UndoType::Modify, Some(bincode::serialize(rec)?)),
            None => (UndoType::Insert, None),
        };
        Ok(Self { roll_ptr, trx_id, undo_type, old_data, changes })
    }

    pub fn old_version(&self) -> Result<Option<Record>, DatabaseError> {
        match &self.old_data {
            Some(data) => Ok(Some(bincode::deserialize(data)?)),
            None => Ok(None),
        }
    }
}

pub struct UndoLog {
    records: RwLock<HashMap<u64, Arc<UndoRecord>>>,
    next_roll_ptr: AtomicU64,
}

impl UndoLog {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            // 0 means "no previous version"
            next_roll_ptr: AtomicU64::new(1),
        }
    }

    pub fn alloc_roll_ptr(&self) -> u64 {
        self.next_roll_ptr.fetch_add(1, Ordering::SeqCst)
    }

    pub fn add(&self, record: UndoRecord) {
        self.records.write().insert(record.roll_ptr, Arc::new(record));
    }

    #[must_use]
    pub fn get(&self, roll_ptr: u64) -> Option<Arc<UndoRecord>> {
        self.records.read().get(&roll_ptr).cloned()
    }

    pub fn remove(&self, roll_ptr: u64) -> Option<Arc<UndoRecord>> {
        self.records.write().remove(&roll_ptr)
    }

    /// Remove every record written by a transaction below `low_limit`
    pub fn purge(&self, low_limit: u64) -> usize {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|_, rec| rec.trx_id >= low_limit);
        before - records.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Walk the rollback chain of a clustered record back to the newest
    /// version `view` may see. `None` when the record did not exist yet.
    pub fn build_for_consistent_read(
        &self,
        rec: &Record,
        index: &IndexDef,
        view: &ReadView,
    ) -> Result<Option<Record>, DatabaseError> {
        let mut version = rec.clone();
        loop {
            if view.sees(version.trx_id(index)) {
                return Ok(Some(version));
            }
            let roll_ptr = version.roll_ptr(index);
            if roll_ptr == 0 {
                return Ok(None);
            }
            let undo = self.get(roll_ptr).ok_or_else(|| {
                DatabaseError::Corruption(format!("undo record {roll_ptr} is missing"))
            })?;
            match undo.old_version()? {
                Some(older) => version = older,
                None => return Ok(None),
            }
        }
    }
}

impl Default for UndoLog {
    fn default() -> Self {
        Self::new()
    }
}
