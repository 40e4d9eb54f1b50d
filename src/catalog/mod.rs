// Catalog - table definitions, index layouts and the data dictionary

mod schema;
mod dictionary;

pub use schema::{ColumnDef, IndexDef, IndexField, IndexId, TableId, TableSchema, DB_ROLL_PTR, DB_TRX_ID};
pub use dictionary::{Dictionary, Index, Table, TableHandle};
