/// Executor module - record access with locking, MVCC and lock-wait retry
///
/// Structure:
/// - callback: compare/process contract driven by every scan
/// - query: generic CRUD and scan executor over one table

pub mod callback;
pub mod query;

pub use callback::{
    compare_equal, compare_like, compare_ordered, CompareAction, FnCallback, MatchMode, RecordCallback,
    RecordCollector,
};
pub use query::{QueryExecutor, UpdateTier};
