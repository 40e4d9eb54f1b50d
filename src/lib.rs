// PostgrustFTS - transactional record access and full-text search storage
// Modular architecture: values and errors, catalog, storage, transactions, executors

// Clippy configuration - allow non-critical warnings
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::manual_let_else)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

// Core structures (values, records, errors, the database bundle)
pub mod core;

// Backward compatibility - re-export all core types as types module
pub mod types {
    pub use crate::core::*;
}

// Executor configuration (defaults, file, POSTGRUSTQL_* environment)
pub mod config;

// Table definitions and the data dictionary
pub mod catalog;

// Index trees, mini-transactions, persistent cursors
pub mod storage;

// Transactions, read views, undo log, lock manager
pub mod transaction;

// Record callbacks and the generic query executor
pub mod executor;

// Full-text search auxiliary and common tables
pub mod fts;

// Re-export commonly used types for convenience
pub use crate::core::{Database, DatabaseError, Record, Tuple, Update, Value};
pub use crate::config::ExecutorConfig;
pub use catalog::{TableHandle, TableSchema};
pub use executor::{CompareAction, QueryExecutor, RecordCallback};
pub use fts::FTSQueryExecutor;
pub use storage::SearchMode;
pub use transaction::{LockMode, Transaction};
