use std::sync::Arc;
use crate::catalog::{Dictionary, TableHandle, TableSchema};
use crate::config::ExecutorConfig;
use crate::transaction::{Transaction, TrxSys};
use super::error::DatabaseError;

/// Shared database state: data dictionary, transaction system and
/// configuration. Cloning is cheap and every clone sees the same state.
#[derive(Clone)]
pub struct Database {
    dict: Arc<Dictionary>,
    trx_sys: Arc<TrxSys>,
    config: Arc<ExecutorConfig>,
}

impl Database {
    #[must_use]
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            dict: Arc::new(Dictionary::new(config.page_size)),
            trx_sys: Arc::new(TrxSys::new(config.lock_wait_timeout())),
            config: Arc::new(config),
        }
    }

    #[must_use]
    pub fn dict(&self) -> &Dictionary {
        &self.dict
    }

    #[must_use]
    pub fn trx_sys(&self) -> &TrxSys {
        &self.trx_sys
    }

    #[must_use]
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn create_table(&self, schema: &TableSchema) -> Result<TableHandle, DatabaseError> {
        self.dict.create_table(schema)
    }

    pub fn open_table(&self, name: &str) -> Result<TableHandle, DatabaseError> {
        self.dict.open_table(name)
    }

    pub fn begin(&self) -> Arc<Transaction> {
        self.trx_sys.begin()
    }

    pub fn commit(&self, trx: &Transaction) -> Result<(), DatabaseError> {
        self.trx_sys.commit(trx)
    }

    pub fn rollback(&self, trx: &Transaction) -> Result<(), DatabaseError> {
        self.trx_sys.rollback(trx)
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("tables", &self.dict.table_names())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
