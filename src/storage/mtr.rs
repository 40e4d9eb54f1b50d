/// Mini-transaction: a short latch scope over one or more index trees
///
/// Every change made through an `Mtr` records the before-image of the
/// touched record. `commit` keeps the changes; `rollback` or dropping the
/// scope without committing puts the before-images back. Latches are
/// released when the scope ends either way.

use std::sync::Arc;
use parking_lot::RawRwLock;
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use tracing::{error, trace};
use crate::catalog::{Index, IndexId};
use crate::types::{DatabaseError, Record, SortKey, UpdateField};
use super::btree::IndexTree;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchMode {
    Shared,
    Exclusive,
}

enum Latch {
    Shared(ArcRwLockReadGuard<RawRwLock, IndexTree>),
    Exclusive(ArcRwLockWriteGuard<RawRwLock, IndexTree>),
}

/// Before-image of one physical record
#[derive(Debug, Clone)]
pub struct PageChange {
    pub index: Arc<Index>,
    pub key: SortKey,
    pub before: Option<Record>,
}

pub struct Mtr {
    latches: Vec<(IndexId, Latch)>,
    log: Vec<PageChange>,
    committed: bool,
}

impl Mtr {
    #[must_use]
    pub const fn start() -> Self {
        Self { latches: Vec::new(), log: Vec::new(), committed: false }
    }

    /// Latch an index tree. A latch already held by this scope is reused;
    /// callers latch the clustered index before any secondary index.
    pub fn latch(&mut self, index: &Index, mode: LatchMode) -> Result<(), DatabaseError> {
        let id = index.def.id();
        if let Some((_, held)) = self.latches.iter().find(|(held_id, _)| *held_id == id) {
            return match (held, mode) {
                (Latch::Shared(_), LatchMode::Exclusive) => Err(DatabaseError::Corruption(format!(
                    "latch upgrade requested on index {id}"
                ))),
                _ => Ok(()),
            };
        }
        let latch = match mode {
            LatchMode::Shared => Latch::Shared(index.tree.read_arc()),
            LatchMode::Exclusive => Latch::Exclusive(index.tree.write_arc()),
        };
        self.latches.push((id, latch));
        Ok(())
    }

    #[must_use]
    pub fn is_latched(&self, index_id: IndexId) -> bool {
        self.latches.iter().any(|(id, _)| *id == index_id)
    }

    pub fn tree(&self, index_id: IndexId) -> Result<&IndexTree, DatabaseError> {
        match self.latches.iter().find(|(id, _)| *id == index_id) {
            Some((_, Latch::Shared(guard))) => Ok(&**guard),
            Some((_, Latch::Exclusive(guard))) => Ok(&**guard),
            None => Err(DatabaseError::Corruption(format!("index {index_id} is not latched"))),
        }
    }

    fn tree_mut(&mut self, index_id: IndexId) -> Result<&mut IndexTree, DatabaseError> {
        match self.latches.iter_mut().find(|(id, _)| *id == index_id) {
            Some((_, Latch::Exclusive(guard))) => Ok(&mut **guard),
            Some((_, Latch::Shared(_))) => Err(DatabaseError::Corruption(format!(
                "index {index_id} is latched shared, not exclusive"
            ))),
            None => Err(DatabaseError::Corruption(format!("index {index_id} is not latched"))),
        }
    }

    /// Apply a change to one record, logging its before-image on success
    fn modify<F>(&mut self, index: &Arc<Index>, key: &SortKey, op: F) -> Result<(), DatabaseError>
    where
        F: FnOnce(&mut IndexTree) -> Result<(), DatabaseError>,
    {
        let tree = self.tree_mut(index.def.id())?;
        let before = tree.get(key)?;
        op(tree)?;
        self.log.push(PageChange { index: Arc::clone(index), key: key.clone(), before });
        Ok(())
    }

    pub fn insert(&mut self, index: &Arc<Index>, key: &SortKey, rec: Record) -> Result<(), DatabaseError> {
        self.modify(index, key, |tree| tree.insert(key.clone(), rec))
    }

    /// Replace a delete-marked record with a new version in place
    pub fn overwrite(&mut self, index: &Arc<Index>, key: &SortKey, rec: Record) -> Result<(), DatabaseError> {
        self.modify(index, key, |tree| {
            tree.remove(key)?;
            tree.insert(key.clone(), rec)
        })
    }

    pub fn set_delete_mark(&mut self, index: &Arc<Index>, key: &SortKey, deleted: bool) -> Result<(), DatabaseError> {
        self.modify(index, key, |tree| tree.update_in_place(key, &[], Some(deleted)))
    }

    pub fn update_in_place(&mut self, index: &Arc<Index>, key: &SortKey, fields: &[UpdateField]) -> Result<(), DatabaseError> {
        self.modify(index, key, |tree| tree.update_in_place(key, fields, None))
    }

    pub fn update_optimistic(&mut self, index: &Arc<Index>, key: &SortKey, fields: &[UpdateField]) -> Result<(), DatabaseError> {
        self.modify(index, key, |tree| tree.update_optimistic(key, fields))
    }

    pub fn update_pessimistic(&mut self, index: &Arc<Index>, key: &SortKey, fields: &[UpdateField]) -> Result<(), DatabaseError> {
        self.modify(index, key, |tree| tree.update_pessimistic(key, fields))
    }

    /// Changes logged so far, oldest first
    #[must_use]
    pub fn changes(&self) -> &[PageChange] {
        &self.log
    }

    /// Keep all changes and release the latches
    pub fn commit(mut self) {
        self.committed = true;
    }

    /// Undo all changes and release the latches
    pub fn rollback(mut self) -> Result<(), DatabaseError> {
        self.undo()
    }

    fn undo(&mut self) -> Result<(), DatabaseError> {
        while let Some(change) = self.log.pop() {
            trace!(index = change.index.def.id(), "restoring before-image");
            let tree = self.tree_mut(change.index.def.id())?;
            tree.restore(&change.key, change.before)?;
        }
        Ok(())
    }
}

impl Drop for Mtr {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(e) = self.undo() {
                error!(error = %e, "mini-transaction rollback failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Dictionary, TableSchema};
    use crate::types::{Collation, DataType, Value};

    fn table() -> crate::catalog::TableHandle {
        Dictionary::new(4096)
            .create_table(
                &TableSchema::new("t")
                    .column("id", DataType::BigUnsigned)
                    .column("v", DataType::Varchar { max_len: 20 })
                    .primary_key(&["id"]),
            )
            .unwrap()
    }

    fn row(id: u64, v: &str) -> (SortKey, Record) {
        let rec = Record::new(vec![Value::U64(id), Value::U64(1), Value::U64(0), Value::Text(v.to_string())]);
        (vec![Value::U64(id).key_part(Collation::Binary)], rec)
    }

    #[test]
    fn test_commit_keeps_changes() {
        let table = table();
        let index = table.clustered();
        let (key, rec) = row(1, "a");

        let mut mtr = Mtr::start();
        mtr.latch(index, LatchMode::Exclusive).unwrap();
        mtr.insert(index, &key, rec).unwrap();
        mtr.commit();

        assert!(index.tree.read().get(&key).unwrap().is_some());
    }

    #[test]
    fn test_drop_restores_before_images() {
        let table = table();
        let index = table.clustered();
        let (key, rec) = row(1, "a");
        {
            let mut mtr = Mtr::start();
            mtr.latch(index, LatchMode::Exclusive).unwrap();
            mtr.insert(index, &key, rec).unwrap();
        }
        assert!(index.tree.read().get(&key).unwrap().is_none());
    }

    #[test]
    fn test_rollback_undoes_in_reverse() {
        let table = table();
        let index = table.clustered();
        let (key, rec) = row(1, "a");
        {
            let mut mtr = Mtr::start();
            mtr.latch(index, LatchMode::Exclusive).unwrap();
            mtr.insert(index, &key, rec).unwrap();
            mtr.commit();
        }

        let mut mtr = Mtr::start();
        mtr.latch(index, LatchMode::Exclusive).unwrap();
        mtr.set_delete_mark(index, &key, true).unwrap();
        let change = [UpdateField { field_no: 3, new_val: Value::Text("b".to_string()) }];
        mtr.update_in_place(index, &key, &change).unwrap();
        assert_eq!(mtr.changes().len(), 2);
        mtr.rollback().unwrap();

        let got = index.tree.read().get(&key).unwrap().unwrap();
        assert!(!got.deleted);
        assert_eq!(got.fields[3], Value::Text("a".to_string()));
    }

    #[test]
    fn test_latch_reuse_and_no_upgrade() {
        let table = table();
        let index = table.clustered();
        let mut mtr = Mtr::start();
        mtr.latch(index, LatchMode::Shared).unwrap();
        mtr.latch(index, LatchMode::Shared).unwrap();
        assert!(mtr.is_latched(index.def.id()));
        assert!(mtr.latch(index, LatchMode::Exclusive).is_err());
        assert!(mtr.tree(index.def.id()).is_ok());
    }
}
