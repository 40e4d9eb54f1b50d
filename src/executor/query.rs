/// Generic record-access executor
///
/// Runs one insert, delete, update or scan against one table on behalf of
/// a transaction. Every attempt opens a fresh mini-transaction, positions a
/// cursor and takes row locks before touching rows. When a lock has to be
/// waited for, the scope is closed first and the whole attempt restarts
/// once the lock is granted.

use std::sync::Arc;
use tracing::{debug, error, trace};
use crate::catalog::{Index, IndexDef, Table, TableId};
use crate::storage::{LatchMode, Mtr, PersistentCursor, SearchMode};
use crate::transaction::{LockMode, LockTarget, ReadView, Transaction, UndoRecord, WaitMode};
use crate::types::{Database, DatabaseError, Record, SortKey, Tuple, Update, UpdateField, Value};
use super::callback::{CompareAction, RecordCallback};

/// Update path taken by `update_record`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateTier {
    /// Changed fields kept their size; rewritten where they are
    InPlace,
    /// Record rewritten within its page
    Optimistic,
    /// Record rewritten with page splits or external field storage
    Pessimistic,
}

/// Scope left open by `select_for_update` for the following update
struct HeldScope {
    table_id: TableId,
    mtr: Mtr,
    cursor: PersistentCursor,
}

pub struct QueryExecutor {
    db: Database,
    trx: Arc<Transaction>,
    held: Option<HeldScope>,
}

impl QueryExecutor {
    #[must_use]
    pub fn new(db: &Database, trx: Arc<Transaction>) -> Self {
        Self { db: db.clone(), trx, held: None }
    }

    #[must_use]
    pub fn trx(&self) -> &Arc<Transaction> {
        &self.trx
    }

    #[must_use]
    pub const fn db(&self) -> &Database {
        &self.db
    }

    /// Close the scope left open by `select_for_update`, keeping its changes
    pub fn commit_mtr(&mut self) {
        if let Some(held) = self.held.take() {
            held.mtr.commit();
        }
    }

    fn read_view(&self) -> ReadView {
        self.db.trx_sys().read_view(&self.trx)
    }

    /// Request a table lock. `LockWait` means the request is queued and the
    /// caller must pass the error to `handle_wait`.
    pub fn lock_table(&mut self, table: &Table, mode: LockMode) -> Result<(), DatabaseError> {
        self.db
            .trx_sys()
            .lock_sys()
            .lock(self.trx.id(), LockTarget::Table(table.id()), mode)
    }

    /// Resolve the outcome of a lock request. A queued request blocks until
    /// it is granted, times out or loses a deadlock; every other error is
    /// passed through unchanged.
    pub fn handle_wait(&mut self, err: DatabaseError, table_lock: bool) -> Result<(), DatabaseError> {
        match err {
            DatabaseError::LockWait => {
                self.commit_mtr();
                let lock_sys = self.db.trx_sys().lock_sys();
                if !lock_sys.is_waiting(self.trx.id()) {
                    return Ok(());
                }
                self.trx.set_wait_mode(if table_lock { WaitMode::LockTable } else { WaitMode::LockRow });
                debug!(trx_id = self.trx.id(), table_lock, "waiting for lock");
                let result = lock_sys.wait(self.trx.id());
                self.trx.set_wait_mode(WaitMode::NoLock);
                result
            }
            other => Err(other),
        }
    }

    fn lock_rec(&self, index: &Index, key: &SortKey, mode: LockMode) -> Result<(), DatabaseError> {
        self.db
            .trx_sys()
            .lock_sys()
            .lock(self.trx.id(), LockTarget::Record(index.def.id(), key.clone()), mode)
    }

    /// Latch the clustered index and then every secondary index
    fn latch_all(mtr: &mut Mtr, table: &Table, mode: LatchMode) -> Result<(), DatabaseError> {
        for index in table.indexes() {
            mtr.latch(index, mode)?;
        }
        Ok(())
    }

    fn check_value(index: &IndexDef, field_no: usize, value: &Value) -> Result<(), DatabaseError> {
        let field = index.field(field_no);
        if !field.data_type.accepts(value) {
            return Err(DatabaseError::TypeMismatch(field.name.clone()));
        }
        if let (Some(max), Some(len)) = (field.data_type.max_len(), field.data_type.stored_len(value)) {
            if len > max {
                return Err(DatabaseError::ValueTooLong { field: field.name.clone(), len, max });
            }
        }
        Ok(())
    }

    /// Write the undo record for the changes logged since `mark`
    fn log_undo(
        &self,
        mtr: &Mtr,
        mark: usize,
        roll_ptr: u64,
        old_clust: Option<&Record>,
    ) -> Result<(), DatabaseError> {
        let changes = mtr.changes()[mark..].to_vec();
        let undo = UndoRecord::new(roll_ptr, self.trx.id(), old_clust, changes)?;
        self.db.trx_sys().undo().add(undo);
        self.trx.push_undo(roll_ptr);
        Ok(())
    }

    /// Insert or revive the secondary index entry for `entry`
    fn insert_sec_entry(mtr: &mut Mtr, index: &Arc<Index>, entry: Record) -> Result<(), DatabaseError> {
        let key = entry.key(&index.def);
        if mtr.tree(index.def.id())?.contains(&key) {
            mtr.overwrite(index, &key, entry)
        } else {
            mtr.insert(index, &key, entry)
        }
    }

    fn delete_mark_sec_entry(mtr: &mut Mtr, index: &Arc<Index>, entry: &Record) -> Result<(), DatabaseError> {
        let key = entry.key(&index.def);
        let live = mtr
            .tree(index.def.id())?
            .get(&key)?
            .is_some_and(|rec| !rec.deleted);
        if live {
            mtr.set_delete_mark(index, &key, true)?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Insert
    // ---------------------------------------------------------------------

    /// Insert a full clustered record. The hidden system fields of `tuple`
    /// are overwritten. The caller holds an intention lock on the table.
    pub fn insert_record(&mut self, table: &Table, tuple: Tuple) -> Result<(), DatabaseError> {
        self.commit_mtr();
        let clust = table.clustered();
        if tuple.n_fields() != clust.def.n_fields() {
            error!(
                table = table.name(),
                expected = clust.def.n_fields(),
                got = tuple.n_fields(),
                "insert tuple does not match the clustered index"
            );
            return Err(DatabaseError::StructuralMismatch(format!(
                "table '{}' expects {} fields, got {}",
                table.name(),
                clust.def.n_fields(),
                tuple.n_fields()
            )));
        }
        for (i, value) in tuple.fields().iter().enumerate() {
            if !clust.def.field(i).data_type.is_system() {
                Self::check_value(&clust.def, i, value)?;
            }
        }

        loop {
            match self.try_insert(table, tuple.clone()) {
                Err(DatabaseError::LockWait) => {
                    debug!(table = table.name(), "insert restarts after lock wait");
                    self.handle_wait(DatabaseError::LockWait, false)?;
                }
                other => return other,
            }
        }
    }

    fn try_insert(&self, table: &Table, tuple: Tuple) -> Result<(), DatabaseError> {
        let clust = table.clustered();
        let mut mtr = Mtr::start();
        Self::latch_all(&mut mtr, table, LatchMode::Exclusive)?;

        let mut rec = tuple.into_record();
        let key = rec.key(&clust.def);
        self.lock_rec(clust, &key, LockMode::Exclusive)?;

        let existing = mtr.tree(clust.def.id())?.get(&key)?;
        if existing.as_ref().is_some_and(|old| !old.deleted) {
            return Err(DatabaseError::DuplicateKey(clust.def.name().to_string()));
        }

        let roll_ptr = self.db.trx_sys().undo().alloc_roll_ptr();
        rec.set_system_fields(&clust.def, self.trx.id(), roll_ptr);

        let mark = mtr.changes().len();
        if existing.is_some() {
            mtr.overwrite(clust, &key, rec.clone())?;
        } else {
            mtr.insert(clust, &key, rec.clone())?;
        }
        for sec in table.secondary() {
            Self::insert_sec_entry(&mut mtr, sec, sec.def.build_entry(&rec))?;
        }
        self.log_undo(&mtr, mark, roll_ptr, existing.as_ref())?;
        mtr.commit();
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Delete
    // ---------------------------------------------------------------------

    /// Delete-mark one clustered record and its secondary entries
    fn delete_mark_row(&self, mtr: &mut Mtr, table: &Table, key: &SortKey, rec: &Record) -> Result<(), DatabaseError> {
        let clust = table.clustered();
        let (Some(trx_pos), Some(roll_pos)) = (clust.def.trx_id_pos(), clust.def.roll_ptr_pos()) else {
            return Err(DatabaseError::StructuralMismatch("clustered index without system fields".to_string()));
        };
        let roll_ptr = self.db.trx_sys().undo().alloc_roll_ptr();
        let mark = mtr.changes().len();

        let system = [
            UpdateField { field_no: trx_pos, new_val: Value::U64(self.trx.id()) },
            UpdateField { field_no: roll_pos, new_val: Value::U64(roll_ptr) },
        ];
        mtr.update_in_place(clust, key, &system)?;
        mtr.set_delete_mark(clust, key, true)?;
        for sec in table.secondary() {
            Self::delete_mark_sec_entry(mtr, sec, &sec.def.build_entry(rec))?;
        }
        self.log_undo(mtr, mark, roll_ptr, Some(rec))
    }

    /// Delete-mark every live record whose key equals `tuple`
    pub fn delete_record(&mut self, table: &Table, tuple: &Tuple) -> Result<(), DatabaseError> {
        self.commit_mtr();
        let mut deleted = 0;
        loop {
            match self.try_delete(table, Some(tuple), &mut deleted) {
                Err(DatabaseError::LockWait) => {
                    debug!(table = table.name(), "delete restarts after lock wait");
                    self.handle_wait(DatabaseError::LockWait, false)?;
                }
                Err(e) => return Err(e),
                Ok(()) if deleted == 0 => return Err(DatabaseError::RecordNotFound),
                Ok(()) => return Ok(()),
            }
        }
    }

    /// Delete-mark every live record of the table
    pub fn delete_all(&mut self, table: &Table) -> Result<(), DatabaseError> {
        self.commit_mtr();
        let mut deleted = 0;
        loop {
            match self.try_delete(table, None, &mut deleted) {
                Err(DatabaseError::LockWait) => {
                    debug!(table = table.name(), "delete_all restarts after lock wait");
                    self.handle_wait(DatabaseError::LockWait, false)?;
                }
                other => {
                    debug!(table = table.name(), deleted, "delete_all finished");
                    return other;
                }
            }
        }
    }

    fn try_delete(&self, table: &Table, tuple: Option<&Tuple>, deleted: &mut usize) -> Result<(), DatabaseError> {
        let clust = table.clustered();
        let mut mtr = Mtr::start();
        Self::latch_all(&mut mtr, table, LatchMode::Exclusive)?;

        let mut cursor = PersistentCursor::open(&mtr, clust, tuple, SearchMode::GreaterOrEqual)?;
        while let Some(rec) = cursor.record(&mtr)? {
            if tuple.is_some_and(|t| !t.matches(&rec, &clust.def)) {
                break;
            }
            let Some(key) = cursor.key().cloned() else { break };
            match self.lock_rec(clust, &key, LockMode::Exclusive) {
                Ok(()) => {}
                Err(DatabaseError::LockWait) => {
                    // Rows marked so far stay marked; they are locked and logged
                    mtr.commit();
                    return Err(DatabaseError::LockWait);
                }
                Err(e) => return Err(e),
            }
            if !rec.deleted {
                self.delete_mark_row(&mut mtr, table, &key, &rec)?;
                *deleted += 1;
            }
            cursor.move_next(&mtr)?;
        }
        mtr.commit();
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Locking read and update
    // ---------------------------------------------------------------------

    /// Lock the record whose key equals `tuple` for update and run the
    /// callback on it. On success the latch scope stays open for a following
    /// `update_record`; `commit_mtr` closes it without updating.
    pub fn select_for_update(
        &mut self,
        table: &Table,
        tuple: &Tuple,
        callback: &mut dyn RecordCallback,
    ) -> Result<(), DatabaseError> {
        self.commit_mtr();
        loop {
            match self.try_select_for_update(table, tuple, callback) {
                Err(DatabaseError::LockWait) => {
                    debug!(table = table.name(), "select_for_update restarts after lock wait");
                    self.handle_wait(DatabaseError::LockWait, false)?;
                }
                Err(e) => return Err(e),
                Ok(scope) => {
                    self.held = Some(scope);
                    return Ok(());
                }
            }
        }
    }

    fn try_select_for_update(
        &self,
        table: &Table,
        tuple: &Tuple,
        callback: &mut dyn RecordCallback,
    ) -> Result<HeldScope, DatabaseError> {
        let clust = table.clustered();
        let mut mtr = Mtr::start();
        Self::latch_all(&mut mtr, table, LatchMode::Exclusive)?;

        let cursor = PersistentCursor::open(&mtr, clust, Some(tuple), SearchMode::GreaterOrEqual)?;
        let (Some(rec), Some(key)) = (cursor.record(&mtr)?, cursor.key().cloned()) else {
            return Err(DatabaseError::RecordNotFound);
        };
        if !tuple.matches(&rec, &clust.def) {
            return Err(DatabaseError::RecordNotFound);
        }

        self.lock_rec(clust, &key, LockMode::Exclusive)?;

        let writer = rec.trx_id(&clust.def);
        let visible = writer == self.trx.id() || self.db.trx_sys().is_committed(writer);
        if !visible || rec.deleted {
            return Err(DatabaseError::RecordNotFound);
        }
        match callback.compare(Some(tuple), &rec, &clust.def) {
            CompareAction::Process => {
                callback.process(&rec, &clust.def);
                Ok(HeldScope { table_id: table.id(), mtr, cursor })
            }
            CompareAction::Skip | CompareAction::Stop => Err(DatabaseError::RecordNotFound),
        }
    }

    /// Update the record positioned by the preceding `select_for_update`.
    /// Size-preserving changes are written in place; otherwise the update
    /// escalates from a page-local rewrite to a structural one.
    pub fn update_record(&mut self, table: &Table, update: &Update) -> Result<UpdateTier, DatabaseError> {
        let held = match self.held.take() {
            Some(held) if held.table_id == table.id() => held,
            Some(other) => {
                other.mtr.commit();
                return Err(DatabaseError::NoCursor);
            }
            None => return Err(DatabaseError::NoCursor),
        };
        let HeldScope { mut mtr, cursor, .. } = held;
        let clust = table.clustered();

        let (Some(key), Some(rec)) = (cursor.key().cloned(), cursor.record(&mtr)?) else {
            return Err(DatabaseError::NoCursor);
        };

        for uf in &update.fields {
            if uf.field_no >= clust.def.n_fields()
                || uf.field_no < clust.def.n_uniq()
                || clust.def.field(uf.field_no).data_type.is_system()
            {
                error!(table = table.name(), field_no = uf.field_no, "update touches a key or system field");
                return Err(DatabaseError::StructuralMismatch(format!(
                    "field {} of table '{}' cannot be updated",
                    uf.field_no,
                    table.name()
                )));
            }
            Self::check_value(&clust.def, uf.field_no, &uf.new_val)?;
        }

        let (Some(trx_pos), Some(roll_pos)) = (clust.def.trx_id_pos(), clust.def.roll_ptr_pos()) else {
            return Err(DatabaseError::StructuralMismatch("clustered index without system fields".to_string()));
        };
        let roll_ptr = self.db.trx_sys().undo().alloc_roll_ptr();
        let mut fields = update.fields.clone();
        fields.push(UpdateField { field_no: trx_pos, new_val: Value::U64(self.trx.id()) });
        fields.push(UpdateField { field_no: roll_pos, new_val: Value::U64(roll_ptr) });

        let mark = mtr.changes().len();
        let in_place = if update.keeps_size(&rec, &clust.def) {
            match mtr.update_in_place(clust, &key, &fields) {
                Ok(()) => true,
                Err(DatabaseError::Overflow) => {
                    trace!(table = table.name(), "in-place update overflowed, going optimistic");
                    false
                }
                Err(e) => return Err(e),
            }
        } else {
            false
        };
        let tier = if in_place {
            UpdateTier::InPlace
        } else {
            match mtr.update_optimistic(clust, &key, &fields) {
                Ok(()) => UpdateTier::Optimistic,
                Err(DatabaseError::Overflow) => {
                    trace!(table = table.name(), "optimistic update overflowed, going pessimistic");
                    mtr.update_pessimistic(clust, &key, &fields)?;
                    UpdateTier::Pessimistic
                }
                Err(e) => return Err(e),
            }
        };

        let mut new_rec = rec.clone();
        update.apply_to(&mut new_rec);
        for sec in table.secondary() {
            let old_entry = sec.def.build_entry(&rec);
            let new_entry = sec.def.build_entry(&new_rec);
            if old_entry.key(&sec.def) != new_entry.key(&sec.def) {
                Self::delete_mark_sec_entry(&mut mtr, sec, &old_entry)?;
                Self::insert_sec_entry(&mut mtr, sec, new_entry)?;
            }
        }

        self.log_undo(&mtr, mark, roll_ptr, Some(&rec))?;
        mtr.commit();
        trace!(table = table.name(), ?tier, "record updated");
        Ok(tier)
    }

    /// Update the record matching `tuple`, or insert `insert_tuple` when
    /// there is none
    pub fn replace_record(
        &mut self,
        table: &Table,
        tuple: &Tuple,
        update: &Update,
        insert_tuple: &Tuple,
    ) -> Result<(), DatabaseError> {
        let mut found = super::callback::FnCallback::new(
            |_: Option<&Tuple>, _: &Record, _: &IndexDef| CompareAction::Process,
            |_: &Record, _: &IndexDef| true,
        );
        loop {
            match self.select_for_update(table, tuple, &mut found) {
                Ok(()) => {
                    self.update_record(table, update)?;
                    return Ok(());
                }
                Err(DatabaseError::RecordNotFound) => {}
                Err(e) => return Err(e),
            }
            match self.insert_record(table, insert_tuple.clone()) {
                // Lost a race with a concurrent insert of the same key
                Err(DatabaseError::DuplicateKey(_))
                    if tuple.matches(&insert_tuple.clone().into_record(), &table.clustered().def) =>
                {
                    debug!(table = table.name(), "replace restarts after duplicate insert");
                }
                other => return other,
            }
        }
    }

    // ---------------------------------------------------------------------
    // Consistent reads
    // ---------------------------------------------------------------------

    /// Newest version of a clustered record visible to `view`, or `None`
    /// when there is no such version or it is delete-marked
    fn visible_version(&self, rec: &Record, index: &IndexDef, view: &ReadView) -> Result<Option<Record>, DatabaseError> {
        let version = if view.sees(rec.trx_id(index)) {
            Some(rec.clone())
        } else {
            self.db.trx_sys().undo().build_for_consistent_read(rec, index, view)?
        };
        Ok(version.filter(|v| !v.deleted))
    }

    /// Resolve the visible version of `rec` and process it. `None` when no
    /// visible live version exists, else whether the scan should continue.
    fn process_record_with_mvcc(
        &self,
        rec: &Record,
        index: &IndexDef,
        view: &ReadView,
        callback: &mut dyn RecordCallback,
    ) -> Result<Option<bool>, DatabaseError> {
        Ok(self
            .visible_version(rec, index, view)?
            .map(|version| callback.process(&version, index)))
    }

    /// Scan the clustered index from `tuple` (or from the first record) and
    /// drive the callback. Fails with `RecordNotFound` only when a search
    /// tuple was given and nothing was processed.
    pub fn read(
        &mut self,
        table: &Table,
        tuple: Option<&Tuple>,
        mode: SearchMode,
        callback: &mut dyn RecordCallback,
    ) -> Result<(), DatabaseError> {
        self.commit_mtr();
        let clust = table.clustered();
        let view = self.read_view();
        let mut mtr = Mtr::start();
        mtr.latch(clust, LatchMode::Shared)?;

        let mut cursor = PersistentCursor::open(&mtr, clust, tuple, mode)?;
        let mut n_processed = 0_usize;
        while let Some(rec) = cursor.record(&mtr)? {
            match callback.compare(tuple, &rec, &clust.def) {
                CompareAction::Stop => break,
                CompareAction::Skip => {}
                CompareAction::Process => {
                    if let Some(more) = self.process_record_with_mvcc(&rec, &clust.def, &view, callback)? {
                        n_processed += 1;
                        if !more {
                            break;
                        }
                    }
                }
            }
            cursor.move_next(&mtr)?;
        }
        mtr.commit();

        if tuple.is_some() && n_processed == 0 {
            return Err(DatabaseError::RecordNotFound);
        }
        Ok(())
    }

    /// Fetch the clustered record a secondary entry points to. `None` when
    /// it is gone or no longer carries the same primary key.
    fn lookup_clustered_record(
        mtr: &Mtr,
        table: &Table,
        sec: &IndexDef,
        sec_rec: &Record,
    ) -> Result<Option<Record>, DatabaseError> {
        let clust = table.clustered();
        let row_ref = sec.build_row_ref(sec_rec, &clust.def)?;
        let key = row_ref.key_prefix(&clust.def);
        let Some(rec) = mtr.tree(clust.def.id())?.get(&key)? else {
            return Ok(None);
        };
        let (ord, matched) = row_ref.compare_with_record(&rec, &clust.def);
        if ord != std::cmp::Ordering::Equal || matched != clust.def.n_uniq() {
            return Ok(None);
        }
        Ok(Some(rec))
    }

    /// Scan a secondary index and process the clustered records its
    /// entries point to
    pub fn read_by_index(
        &mut self,
        table: &Table,
        index: &Index,
        tuple: Option<&Tuple>,
        mode: SearchMode,
        callback: &mut dyn RecordCallback,
    ) -> Result<(), DatabaseError> {
        self.commit_mtr();
        if index.def.is_clustered() || index.def.table_id() != table.id() {
            error!(table = table.name(), index = index.def.name(), "not a secondary index of the table");
            return Err(DatabaseError::StructuralMismatch(format!(
                "'{}' is not a secondary index of '{}'",
                index.def.name(),
                table.name()
            )));
        }
        let clust = table.clustered();
        let sec = table
            .secondary()
            .iter()
            .find(|s| s.def.id() == index.def.id())
            .ok_or_else(|| DatabaseError::StructuralMismatch(format!("unknown index '{}'", index.def.name())))?;
        let view = self.read_view();

        let mut mtr = Mtr::start();
        mtr.latch(clust, LatchMode::Shared)?;
        mtr.latch(sec, LatchMode::Shared)?;

        let mut cursor = PersistentCursor::open(&mtr, sec, tuple, mode)?;
        let mut n_processed = 0_usize;
        while let Some(sec_rec) = cursor.record(&mtr)? {
            match callback.compare(tuple, &sec_rec, &sec.def) {
                CompareAction::Stop => break,
                CompareAction::Skip => {}
                CompareAction::Process => {
                    let version = match Self::lookup_clustered_record(&mtr, table, &sec.def, &sec_rec)? {
                        Some(clust_rec) => self.visible_version(&clust_rec, &clust.def, &view)?,
                        None => None,
                    };
                    if let Some(version) = version.filter(|v| sec.def.is_for_clust_rec(&sec_rec, v)) {
                        n_processed += 1;
                        if !callback.process(&version, &clust.def) {
                            break;
                        }
                    }
                }
            }
            cursor.move_next(&mtr)?;
        }
        mtr.commit();

        if tuple.is_some() && n_processed == 0 {
            return Err(DatabaseError::RecordNotFound);
        }
        Ok(())
    }
}
