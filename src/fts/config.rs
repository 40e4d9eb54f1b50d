// FTS config store - typed access to the CONFIG common table

use std::sync::Arc;
use tracing::{debug, error, warn};
use crate::catalog::{IndexId, TableId};
use crate::transaction::Transaction;
use crate::types::{Database, DatabaseError};
use super::exec::{truncate_value, FTSQueryExecutor};
use super::readers::ConfigReader;

/// Config key of a per-index parameter: `<param>_<index id as 16 hex digits>`
#[must_use]
pub fn index_param_name(param: &str, index_id: IndexId) -> String {
    format!("{param}_{index_id:016x}")
}

/// Leading decimal digits of `s`, 0 when there are none
fn parse_ulint(s: &str) -> u64 {
    let digits: String = s.trim_start().chars().take_while(char::is_ascii_digit).collect();
    digits.parse().unwrap_or(0)
}

fn log_failure(err: &DatabaseError, name: &str, action: &str) {
    if err.is_not_found() {
        debug!(key = name, "FTS config key not found");
    } else if err.is_lock_error() {
        warn!(key = name, %err, "lock error {action} FTS config value");
    } else {
        error!(key = name, %err, "error {action} FTS config value");
    }
}

/// Read the value of `name`. The row is locked for the rest of the
/// transaction.
pub fn get_value(db: &Database, trx: &Arc<Transaction>, table_id: TableId, name: &str) -> Result<String, DatabaseError> {
    let mut executor = FTSQueryExecutor::new(db, Arc::clone(trx), table_id, None);
    let mut reader = ConfigReader::new();
    executor.read_config_with_lock(name, &mut reader)?;
    executor.release_lock();
    let value = reader.value.unwrap_or_default();
    Ok(truncate_value(&value, db.config().max_config_value_len).to_string())
}

/// Set `name` to `value`, creating the row if needed
pub fn set_value(
    db: &Database,
    trx: &Arc<Transaction>,
    table_id: TableId,
    name: &str,
    value: &str,
) -> Result<(), DatabaseError> {
    let mut executor = FTSQueryExecutor::new(db, Arc::clone(trx), table_id, None);
    executor.update_config_record(name, value)
}

pub fn get_index_value(
    db: &Database,
    trx: &Arc<Transaction>,
    table_id: TableId,
    index_id: IndexId,
    param: &str,
) -> Result<String, DatabaseError> {
    get_value(db, trx, table_id, &index_param_name(param, index_id))
}

pub fn set_index_value(
    db: &Database,
    trx: &Arc<Transaction>,
    table_id: TableId,
    index_id: IndexId,
    param: &str,
    value: &str,
) -> Result<(), DatabaseError> {
    set_value(db, trx, table_id, &index_param_name(param, index_id), value)
}

/// Read `name` as an unsigned integer
pub fn get_ulint(db: &Database, trx: &Arc<Transaction>, table_id: TableId, name: &str) -> Result<u64, DatabaseError> {
    get_value(db, trx, table_id, name)
        .map(|v| parse_ulint(&v))
        .inspect_err(|e| log_failure(e, name, "reading"))
}

pub fn set_ulint(
    db: &Database,
    trx: &Arc<Transaction>,
    table_id: TableId,
    name: &str,
    value: u64,
) -> Result<(), DatabaseError> {
    set_value(db, trx, table_id, name, &value.to_string()).inspect_err(|e| log_failure(e, name, "writing"))
}

pub fn get_index_ulint(
    db: &Database,
    trx: &Arc<Transaction>,
    table_id: TableId,
    index_id: IndexId,
    param: &str,
) -> Result<u64, DatabaseError> {
    get_ulint(db, trx, table_id, &index_param_name(param, index_id))
}

pub fn set_index_ulint(
    db: &Database,
    trx: &Arc<Transaction>,
    table_id: TableId,
    index_id: IndexId,
    param: &str,
    value: u64,
) -> Result<(), DatabaseError> {
    set_ulint(db, trx, table_id, &index_param_name(param, index_id), value)
}
