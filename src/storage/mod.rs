// Storage module - index trees, mini-transactions and cursors

mod btree;
mod mtr;
mod cursor;

pub use btree::{IndexTree, SearchMode, TreeStats, BTR_EXTERN_FIELD_REF_SIZE, PAGE_DIR_SLOT_SIZE, PAGE_HEADER_SIZE};
pub use mtr::{LatchMode, Mtr, PageChange};
pub use cursor::PersistentCursor;
