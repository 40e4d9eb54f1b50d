// FTS table family - naming, layouts and creation of the auxiliary and common tables

use std::fmt;
use crate::catalog::{IndexId, TableHandle, TableId, TableSchema};
use crate::types::{Collation, DataType, Database, DatabaseError, Tuple, Value};

/// Number of word-posting tables per FTS index
pub const FTS_NUM_AUX_INDEX: usize = 6;
/// Longest word stored in a posting table, in bytes
pub const FTS_MAX_WORD_LEN: usize = 336;
pub const FTS_MAX_CONFIG_KEY_LEN: usize = 50;
pub const FTS_MAX_CONFIG_VALUE_LEN: usize = 200;
pub const FTS_MAX_ILIST_LEN: usize = 65_535;

/// Clustered layout of a posting table: word, first_doc_id, DB_TRX_ID,
/// DB_ROLL_PTR, last_doc_id, doc_count, ilist
pub const AUX_N_FIELDS: usize = 7;
pub const AUX_N_UNIQ: usize = 2;
/// Clustered layout of a doc-id table: doc_id, DB_TRX_ID, DB_ROLL_PTR
pub const COMMON_N_FIELDS: usize = 3;
pub const COMMON_N_UNIQ: usize = 1;
/// Clustered layout of CONFIG: key, DB_TRX_ID, DB_ROLL_PTR, value
pub const CONFIG_N_FIELDS: usize = 4;
pub const CONFIG_N_UNIQ: usize = 1;

/// Field number of `value` in a CONFIG record
pub const CONFIG_VALUE_FIELD: usize = 3;

pub const FTS_OPTIMIZE_LIMIT_IN_SECS: &str = "optimize_checkpoint_limit";
pub const FTS_SYNCED_DOC_ID: &str = "synced_doc_id";
pub const FTS_TOTAL_DELETED_COUNT: &str = "deleted_doc_count";
pub const FTS_TABLE_STATE: &str = "table_state";

/// Defaults written into a fresh CONFIG table
pub const CONFIG_DEFAULTS: [(&str, &str); 4] = [
    (FTS_OPTIMIZE_LIMIT_IN_SECS, "180"),
    (FTS_SYNCED_DOC_ID, "0"),
    (FTS_TOTAL_DELETED_COUNT, "0"),
    (FTS_TABLE_STATE, "0"),
];

/// Tables shared by every FTS index of a user table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommonTable {
    BeingDeleted,
    BeingDeletedCache,
    Config,
    Deleted,
    DeletedCache,
}

impl CommonTable {
    pub const ALL: [Self; 5] = [
        Self::BeingDeleted,
        Self::BeingDeletedCache,
        Self::Config,
        Self::Deleted,
        Self::DeletedCache,
    ];

    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::BeingDeleted => "BEING_DELETED",
            Self::BeingDeletedCache => "BEING_DELETED_CACHE",
            Self::Config => "CONFIG",
            Self::Deleted => "DELETED",
            Self::DeletedCache => "DELETED_CACHE",
        }
    }

    /// Parse a table suffix such as `"deleted"` (case-insensitive)
    pub fn from_name(name: &str) -> Result<Self, DatabaseError> {
        Self::ALL
            .into_iter()
            .find(|t| t.suffix().eq_ignore_ascii_case(name))
            .ok_or_else(|| DatabaseError::UnknownCommonTable(name.to_string()))
    }

    /// Slot in the executor's handle cache
    #[must_use]
    pub const fn slot(self) -> usize {
        self as usize
    }

    #[must_use]
    pub const fn is_config(self) -> bool {
        matches!(self, Self::Config)
    }
}

impl fmt::Display for CommonTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

#[must_use]
pub fn common_table_name(table_id: TableId, table: CommonTable) -> String {
    format!("FTS_{table_id:016x}_{}", table.suffix())
}

/// Name of posting table `aux_index` (0-based) of an FTS index
#[must_use]
pub fn aux_table_name(table_id: TableId, index_id: IndexId, aux_index: usize) -> String {
    format!("FTS_{table_id:016x}_{index_id:016x}_INDEX_{}", aux_index + 1)
}

fn common_schema(table_id: TableId, table: CommonTable) -> TableSchema {
    let name = common_table_name(table_id, table);
    if table.is_config() {
        TableSchema::new(name)
            .column("key", DataType::Varchar { max_len: FTS_MAX_CONFIG_KEY_LEN })
            .column("value", DataType::Varchar { max_len: FTS_MAX_CONFIG_VALUE_LEN })
            .primary_key(&["key"])
    } else {
        TableSchema::new(name)
            .column("doc_id", DataType::BigUnsigned)
            .primary_key(&["doc_id"])
    }
}

fn aux_schema(table_id: TableId, index_id: IndexId, aux_index: usize, collation: Collation) -> TableSchema {
    TableSchema::new(aux_table_name(table_id, index_id, aux_index))
        .column_with_collation("word", DataType::Varchar { max_len: FTS_MAX_WORD_LEN }, collation)
        .column("first_doc_id", DataType::BigUnsigned)
        .column("last_doc_id", DataType::BigUnsigned)
        .column("doc_count", DataType::Unsigned)
        .column("ilist", DataType::Varbinary { max_len: FTS_MAX_ILIST_LEN })
        .primary_key(&["word", "first_doc_id"])
}

/// Full CONFIG record for `key`; system fields are filled in on insert
#[must_use]
pub fn config_tuple(key: &str, value: &str) -> Tuple {
    Tuple::new(vec![
        Value::Text(key.to_string()),
        Value::U64(0),
        Value::U64(0),
        Value::Text(value.to_string()),
    ])
}

/// Create the common tables of a user table and seed CONFIG with its
/// defaults. The seeding runs in its own committed transaction.
pub fn create_common_tables(db: &Database, table_id: TableId) -> Result<Vec<TableHandle>, DatabaseError> {
    let mut handles = Vec::with_capacity(CommonTable::ALL.len());
    for table in CommonTable::ALL {
        handles.push(db.create_table(&common_schema(table_id, table))?);
    }

    let config = &handles[CommonTable::Config.slot()];
    let trx = db.begin();
    let mut executor = crate::executor::QueryExecutor::new(db, std::sync::Arc::clone(&trx));
    let seeded = CONFIG_DEFAULTS
        .iter()
        .try_for_each(|(key, value)| executor.insert_record(config, config_tuple(key, value)));
    drop(executor);
    match seeded {
        Ok(()) => db.commit(&trx)?,
        Err(e) => {
            db.rollback(&trx)?;
            return Err(e);
        }
    }
    Ok(handles)
}

/// Create the posting tables of one FTS index. `collation` is the
/// collation of the indexed column and orders the words.
pub fn create_aux_tables(
    db: &Database,
    table_id: TableId,
    index_id: IndexId,
    collation: Collation,
) -> Result<Vec<TableHandle>, DatabaseError> {
    (0..FTS_NUM_AUX_INDEX)
        .map(|n| db.create_table(&aux_schema(table_id, index_id, n, collation)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_names() {
        assert_eq!(common_table_name(0x2a, CommonTable::Deleted), "FTS_000000000000002a_DELETED");
        assert_eq!(
            aux_table_name(0x2a, 0x10, 0),
            "FTS_000000000000002a_0000000000000010_INDEX_1"
        );
        assert_eq!(aux_table_name(1, 2, 5), "FTS_0000000000000001_0000000000000002_INDEX_6");
    }

    #[test]
    fn test_common_table_from_name() {
        assert_eq!(CommonTable::from_name("config").unwrap(), CommonTable::Config);
        assert_eq!(CommonTable::from_name("BEING_DELETED_CACHE").unwrap(), CommonTable::BeingDeletedCache);
        assert!(matches!(
            CommonTable::from_name("ADDED"),
            Err(DatabaseError::UnknownCommonTable(_))
        ));
    }

    #[test]
    fn test_layouts() {
        let db = Database::default();
        let common = create_common_tables(&db, 7).unwrap();
        let config = &common[CommonTable::Config.slot()];
        assert_eq!(config.clustered().def.n_fields(), CONFIG_N_FIELDS);
        assert_eq!(config.clustered().def.n_uniq(), CONFIG_N_UNIQ);
        let deleted = &common[CommonTable::Deleted.slot()];
        assert_eq!(deleted.clustered().def.n_fields(), COMMON_N_FIELDS);
        assert_eq!(deleted.clustered().def.n_uniq(), COMMON_N_UNIQ);

        let aux = create_aux_tables(&db, 7, 3, Collation::Utf8GeneralCi).unwrap();
        assert_eq!(aux.len(), FTS_NUM_AUX_INDEX);
        let def = &aux[0].clustered().def;
        assert_eq!(def.n_fields(), AUX_N_FIELDS);
        assert_eq!(def.n_uniq(), AUX_N_UNIQ);
        assert_eq!(def.field_no("last_doc_id"), Some(4));
        assert_eq!(def.field_no("ilist"), Some(6));
    }

    #[test]
    fn test_common_tables_twice() {
        let db = Database::default();
        create_common_tables(&db, 1).unwrap();
        assert!(matches!(
            create_common_tables(&db, 1),
            Err(DatabaseError::TableAlreadyExists(_))
        ));
    }
}
