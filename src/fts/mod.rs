/// Full-text search storage layer
///
/// Structure:
/// - tables: names and fixed layouts of the posting and common tables
/// - exec: `FTSQueryExecutor`, typed operations over one table family
/// - readers: scan consumers for doc ids, config values and posting lists
/// - config: typed get/set over the CONFIG table

pub mod tables;
pub mod exec;
pub mod readers;
pub mod config;

pub use tables::{
    aux_table_name, common_table_name, create_aux_tables, create_common_tables, CommonTable, CONFIG_DEFAULTS,
    FTS_MAX_CONFIG_VALUE_LEN, FTS_MAX_WORD_LEN, FTS_NUM_AUX_INDEX, FTS_OPTIMIZE_LIMIT_IN_SECS, FTS_SYNCED_DOC_ID,
    FTS_TABLE_STATE, FTS_TOTAL_DELETED_COUNT,
};
pub use exec::{FTSQueryExecutor, FtsAuxData};
pub use readers::{CommonTableReader, ConfigReader, FtsNode, FtsWord, PostingListReader};
