/// Typed executor over the FTS auxiliary and common tables
///
/// Opens and caches the handles of one FTS table family, takes the table
/// intention locks and builds the fixed-layout tuples, then hands the
/// record work to a `QueryExecutor`. Cached handles stay valid across lock
/// waits and are released when the executor is dropped.

use std::sync::Arc;
use tracing::{debug, error};
use crate::catalog::{IndexId, Table, TableHandle, TableId};
use crate::executor::{QueryExecutor, RecordCallback};
use crate::storage::SearchMode;
use crate::transaction::{LockMode, Transaction};
use crate::types::{Database, DatabaseError, Tuple, Update, Value};
use super::tables::{
    aux_table_name, common_table_name, config_tuple, CommonTable, AUX_N_FIELDS, AUX_N_UNIQ,
    COMMON_N_FIELDS, COMMON_N_UNIQ, CONFIG_N_FIELDS, CONFIG_N_UNIQ, CONFIG_VALUE_FIELD, FTS_NUM_AUX_INDEX,
};

/// One row of a posting table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtsAuxData {
    pub word: String,
    pub first_doc_id: u64,
    pub last_doc_id: u64,
    pub doc_count: u32,
    pub ilist: Vec<u8>,
}

impl FtsAuxData {
    /// Key-only row, enough to address every posting of `word`
    #[must_use]
    pub fn word(word: &str) -> Self {
        Self { word: word.to_string(), first_doc_id: 0, last_doc_id: 0, doc_count: 0, ilist: Vec::new() }
    }

    fn to_tuple(&self) -> Tuple {
        Tuple::new(vec![
            Value::Text(self.word.clone()),
            Value::U64(self.first_doc_id),
            Value::U64(0),
            Value::U64(0),
            Value::U64(self.last_doc_id),
            Value::U32(self.doc_count),
            Value::Bytes(self.ilist.clone()),
        ])
    }
}

fn key_tuple(value: Value) -> Tuple {
    Tuple::new(vec![value])
}

/// Cut `value` to at most `max` bytes on a character boundary
pub(crate) fn truncate_value(value: &str, max: usize) -> &str {
    if value.len() <= max {
        return value;
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

pub struct FTSQueryExecutor {
    executor: QueryExecutor,
    table_id: TableId,
    index_id: Option<IndexId>,
    aux_tables: [Option<TableHandle>; FTS_NUM_AUX_INDEX],
    common_tables: [Option<TableHandle>; CommonTable::ALL.len()],
}

impl FTSQueryExecutor {
    /// Executor over the tables of user table `table_id`. Posting tables
    /// additionally need the FTS index id.
    #[must_use]
    pub fn new(db: &Database, trx: Arc<Transaction>, table_id: TableId, index_id: Option<IndexId>) -> Self {
        Self {
            executor: QueryExecutor::new(db, trx),
            table_id,
            index_id,
            aux_tables: Default::default(),
            common_tables: Default::default(),
        }
    }

    #[must_use]
    pub const fn table_id(&self) -> TableId {
        self.table_id
    }

    #[must_use]
    pub const fn index_id(&self) -> Option<IndexId> {
        self.index_id
    }

    #[must_use]
    pub const fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    pub fn executor_mut(&mut self) -> &mut QueryExecutor {
        &mut self.executor
    }

    /// Close the scope left open by `read_config_with_lock`
    pub fn release_lock(&mut self) {
        self.executor.commit_mtr();
    }

    // ---------------------------------------------------------------------
    // Table handles and locks
    // ---------------------------------------------------------------------

    fn check_aux_index(aux_index: u8) -> Result<usize, DatabaseError> {
        let n = usize::from(aux_index);
        if n >= FTS_NUM_AUX_INDEX {
            error!(aux_index, "auxiliary index out of range");
            return Err(DatabaseError::InvalidAuxIndex(aux_index));
        }
        Ok(n)
    }

    /// Open posting table `aux_index` (0-based), reusing a cached handle
    pub fn open_aux_table(&mut self, aux_index: u8) -> Result<TableHandle, DatabaseError> {
        let n = Self::check_aux_index(aux_index)?;
        if let Some(handle) = &self.aux_tables[n] {
            return Ok(handle.clone());
        }
        let Some(index_id) = self.index_id else {
            error!(table_id = self.table_id, "posting table requested without an FTS index");
            return Err(DatabaseError::StructuralMismatch(
                "executor has no FTS index for posting tables".to_string(),
            ));
        };
        let name = aux_table_name(self.table_id, index_id, n);
        let handle = self.executor.db().open_table(&name)?;
        debug!(table = %name, "cached FTS posting table");
        self.aux_tables[n] = Some(handle.clone());
        Ok(handle)
    }

    pub fn open_common_table(&mut self, table: CommonTable) -> Result<TableHandle, DatabaseError> {
        if let Some(handle) = &self.common_tables[table.slot()] {
            return Ok(handle.clone());
        }
        let name = common_table_name(self.table_id, table);
        let handle = self.executor.db().open_table(&name)?;
        debug!(table = %name, "cached FTS common table");
        self.common_tables[table.slot()] = Some(handle.clone());
        Ok(handle)
    }

    fn lock(&mut self, table: &Table, mode: LockMode) -> Result<(), DatabaseError> {
        match self.executor.lock_table(table, mode) {
            Ok(()) => Ok(()),
            Err(e) => self.executor.handle_wait(e, true),
        }
    }

    pub fn lock_aux_tables(&mut self, aux_index: u8, mode: LockMode) -> Result<(), DatabaseError> {
        let table = self.open_aux_table(aux_index)?;
        self.lock(&table, mode)
    }

    pub fn lock_common_tables(&mut self, table: CommonTable, mode: LockMode) -> Result<(), DatabaseError> {
        let handle = self.open_common_table(table)?;
        self.lock(&handle, mode)
    }

    /// Open and lock in one step, returning the handle
    fn prepare_aux(&mut self, aux_index: u8, mode: LockMode) -> Result<TableHandle, DatabaseError> {
        let table = self.open_aux_table(aux_index)?;
        self.lock(&table, mode)?;
        Ok(table)
    }

    fn prepare_common(&mut self, table: CommonTable, mode: LockMode) -> Result<TableHandle, DatabaseError> {
        let handle = self.open_common_table(table)?;
        self.lock(&handle, mode)?;
        Ok(handle)
    }

    /// Fail unless the clustered index has the expected fixed layout
    fn check_layout(table: &Table, n_fields: usize, n_uniq: usize) -> Result<(), DatabaseError> {
        let def = &table.clustered().def;
        if def.n_fields() != n_fields || def.n_uniq() != n_uniq {
            error!(
                table = table.name(),
                n_fields = def.n_fields(),
                n_uniq = def.n_uniq(),
                expected_fields = n_fields,
                expected_uniq = n_uniq,
                "unexpected FTS table layout"
            );
            return Err(DatabaseError::StructuralMismatch(format!(
                "table '{}' has {}/{} fields/unique fields, expected {n_fields}/{n_uniq}",
                table.name(),
                def.n_fields(),
                def.n_uniq()
            )));
        }
        Ok(())
    }

    fn config_value<'a>(&self, value: &'a str) -> &'a str {
        truncate_value(value, self.executor.db().config().max_config_value_len)
    }

    // ---------------------------------------------------------------------
    // Inserts
    // ---------------------------------------------------------------------

    pub fn insert_aux_record(&mut self, aux_index: u8, data: &FtsAuxData) -> Result<(), DatabaseError> {
        let table = self.prepare_aux(aux_index, LockMode::IX)?;
        Self::check_layout(&table, AUX_N_FIELDS, AUX_N_UNIQ)?;
        self.executor.insert_record(&table, data.to_tuple())
    }

    /// Insert a doc id into a DELETED-style table
    pub fn insert_common_record(&mut self, table: CommonTable, doc_id: u64) -> Result<(), DatabaseError> {
        let handle = self.prepare_common(table, LockMode::IX)?;
        Self::check_layout(&handle, COMMON_N_FIELDS, COMMON_N_UNIQ)?;
        let tuple = Tuple::new(vec![Value::U64(doc_id), Value::U64(0), Value::U64(0)]);
        self.executor.insert_record(&handle, tuple)
    }

    pub fn insert_config_record(&mut self, key: &str, value: &str) -> Result<(), DatabaseError> {
        let table = self.prepare_common(CommonTable::Config, LockMode::IX)?;
        Self::check_layout(&table, CONFIG_N_FIELDS, CONFIG_N_UNIQ)?;
        let tuple = config_tuple(key, self.config_value(value));
        self.executor.insert_record(&table, tuple)
    }

    /// Set `key` to `value`, inserting the row when it does not exist
    pub fn update_config_record(&mut self, key: &str, value: &str) -> Result<(), DatabaseError> {
        let table = self.prepare_common(CommonTable::Config, LockMode::IX)?;
        Self::check_layout(&table, CONFIG_N_FIELDS, CONFIG_N_UNIQ)?;
        let value = self.config_value(value);
        let search = key_tuple(Value::Text(key.to_string()));
        let update = Update::new().set(CONFIG_VALUE_FIELD, Value::Text(value.to_string()));
        self.executor.replace_record(&table, &search, &update, &config_tuple(key, value))
    }

    // ---------------------------------------------------------------------
    // Deletes
    // ---------------------------------------------------------------------

    /// Delete-mark every posting of `data.word`
    pub fn delete_aux_record(&mut self, aux_index: u8, data: &FtsAuxData) -> Result<(), DatabaseError> {
        let table = self.prepare_aux(aux_index, LockMode::IX)?;
        if !table.secondary().is_empty() {
            error!(table = table.name(), "posting table carries a secondary index");
            return Err(DatabaseError::StructuralMismatch(format!(
                "posting table '{}' has secondary indexes",
                table.name()
            )));
        }
        self.executor.delete_record(&table, &key_tuple(Value::Text(data.word.clone())))
    }

    pub fn delete_common_record(&mut self, table: CommonTable, doc_id: u64) -> Result<(), DatabaseError> {
        let handle = self.prepare_common(table, LockMode::IX)?;
        self.executor.delete_record(&handle, &key_tuple(Value::U64(doc_id)))
    }

    /// Delete-mark every row of a common table under an exclusive table lock
    pub fn delete_all_common_records(&mut self, table: CommonTable) -> Result<(), DatabaseError> {
        let handle = self.prepare_common(table, LockMode::Exclusive)?;
        self.executor.delete_all(&handle)
    }

    pub fn delete_config_record(&mut self, key: &str) -> Result<(), DatabaseError> {
        let table = self.prepare_common(CommonTable::Config, LockMode::IX)?;
        self.executor.delete_record(&table, &key_tuple(Value::Text(key.to_string())))
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    /// Lock the CONFIG row of `key` and pass it to the callback. The row
    /// stays latched until `release_lock` or the next operation.
    pub fn read_config_with_lock(&mut self, key: &str, callback: &mut dyn RecordCallback) -> Result<(), DatabaseError> {
        let table = self.prepare_common(CommonTable::Config, LockMode::IX)?;
        self.executor
            .select_for_update(&table, &key_tuple(Value::Text(key.to_string())), callback)
    }

    /// Scan posting table `aux_index` starting at `word`
    pub fn read_aux(
        &mut self,
        aux_index: u8,
        word: &str,
        mode: SearchMode,
        callback: &mut dyn RecordCallback,
    ) -> Result<(), DatabaseError> {
        let table = self.prepare_aux(aux_index, LockMode::IS)?;
        self.executor
            .read(&table, Some(&key_tuple(Value::Text(word.to_string()))), mode, callback)
    }

    pub fn read_aux_all(&mut self, aux_index: u8, callback: &mut dyn RecordCallback) -> Result<(), DatabaseError> {
        let table = self.prepare_aux(aux_index, LockMode::IS)?;
        self.executor.read(&table, None, SearchMode::GreaterOrEqual, callback)
    }

    pub fn read_all_common(&mut self, table: CommonTable, callback: &mut dyn RecordCallback) -> Result<(), DatabaseError> {
        let handle = self.prepare_common(table, LockMode::IS)?;
        self.executor.read(&handle, None, SearchMode::GreaterOrEqual, callback)
    }
}

impl Drop for FTSQueryExecutor {
    fn drop(&mut self) {
        // Close any open scope before the table handles go away
        self.executor.commit_mtr();
        let n_cached = self.aux_tables.iter().flatten().count() + self.common_tables.iter().flatten().count();
        if n_cached > 0 {
            debug!(table_id = self.table_id, n_cached, "released FTS table handles");
        }
    }
}
