use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use parking_lot::RwLock;
use tracing::debug;
use super::schema::{IndexDef, TableId, TableSchema};
use crate::storage::IndexTree;
use crate::types::DatabaseError;

/// An index definition together with its tree
pub struct Index {
    pub def: IndexDef,
    pub tree: Arc<RwLock<IndexTree>>,
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index").field("def", &self.def).finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct Table {
    id: TableId,
    name: String,
    indexes: Vec<Arc<Index>>,
    n_ref: AtomicUsize,
}

impl Table {
    #[must_use]
    pub const fn id(&self) -> TableId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The clustered index, always the first one
    #[must_use]
    pub fn clustered(&self) -> &Arc<Index> {
        &self.indexes[0]
    }

    #[must_use]
    pub fn secondary(&self) -> &[Arc<Index>] {
        &self.indexes[1..]
    }

    #[must_use]
    pub fn indexes(&self) -> &[Arc<Index>] {
        &self.indexes
    }

    #[must_use]
    pub fn index(&self, name: &str) -> Option<&Arc<Index>> {
        self.indexes.iter().find(|i| i.def.name() == name)
    }

    /// Number of open handles
    #[must_use]
    pub fn n_ref(&self) -> usize {
        self.n_ref.load(Ordering::SeqCst)
    }
}

/// Open reference to a table; the open count drops with the handle
#[derive(Debug)]
pub struct TableHandle {
    table: Arc<Table>,
}

impl TableHandle {
    fn open(table: Arc<Table>) -> Self {
        table.n_ref.fetch_add(1, Ordering::SeqCst);
        Self { table }
    }
}

impl Clone for TableHandle {
    fn clone(&self) -> Self {
        Self::open(Arc::clone(&self.table))
    }
}

impl Deref for TableHandle {
    type Target = Table;

    fn deref(&self) -> &Table {
        &self.table
    }
}

impl Drop for TableHandle {
    fn drop(&mut self) {
        self.table.n_ref.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Data dictionary: every table known to the database, by name
#[derive(Debug)]
pub struct Dictionary {
    tables: RwLock<HashMap<String, Arc<Table>>>,
    next_table_id: AtomicU64,
    next_index_id: AtomicU64,
    page_size: usize,
}

impl Dictionary {
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            next_table_id: AtomicU64::new(1),
            next_index_id: AtomicU64::new(1),
            page_size,
        }
    }

    #[must_use]
    pub const fn page_size(&self) -> usize {
        self.page_size
    }

    /// Allocate a table id without creating a table
    pub fn allocate_table_id(&self) -> TableId {
        self.next_table_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn create_table(&self, schema: &TableSchema) -> Result<TableHandle, DatabaseError> {
        let id = self.allocate_table_id();
        self.create_table_with_id(id, schema)
    }

    /// Create a table under a caller-chosen id
    pub fn create_table_with_id(&self, id: TableId, schema: &TableSchema) -> Result<TableHandle, DatabaseError> {
        let mut tables = self.tables.write();
        if tables.contains_key(&schema.name) {
            return Err(DatabaseError::TableAlreadyExists(schema.name.clone()));
        }
        let defs = schema.build_indexes(id, || self.next_index_id.fetch_add(1, Ordering::SeqCst))?;
        let indexes = defs
            .into_iter()
            .map(|def| {
                let tree = IndexTree::new(&def, self.page_size);
                Arc::new(Index { def, tree: Arc::new(RwLock::new(tree)) })
            })
            .collect();
        let table = Arc::new(Table {
            id,
            name: schema.name.clone(),
            indexes,
            n_ref: AtomicUsize::new(0),
        });
        tables.insert(schema.name.clone(), Arc::clone(&table));
        debug!(table = %schema.name, id, "created table");
        Ok(TableHandle::open(table))
    }

    pub fn open_table(&self, name: &str) -> Result<TableHandle, DatabaseError> {
        let tables = self.tables.read();
        let table = tables
            .get(name)
            .ok_or_else(|| DatabaseError::TableNotFound(name.to_string()))?;
        debug!(table = name, "opened table handle");
        Ok(TableHandle::open(Arc::clone(table)))
    }

    #[must_use]
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataType;

    fn schema(name: &str) -> TableSchema {
        TableSchema::new(name)
            .column("id", DataType::BigUnsigned)
            .column("v", DataType::Varchar { max_len: 10 })
            .primary_key(&["id"])
            .index("idx_v", &["v"])
    }

    #[test]
    fn test_create_and_open() {
        let dict = Dictionary::new(4096);
        let created = dict.create_table(&schema("t1")).unwrap();
        assert_eq!(created.indexes().len(), 2);
        assert!(created.clustered().def.is_clustered());
        assert_eq!(created.secondary()[0].def.name(), "idx_v");

        let opened = dict.open_table("t1").unwrap();
        assert_eq!(opened.id(), created.id());
        assert_eq!(opened.n_ref(), 2);
        drop(created);
        assert_eq!(opened.n_ref(), 1);
    }

    #[test]
    fn test_open_unknown_table() {
        let dict = Dictionary::new(4096);
        assert!(matches!(dict.open_table("nope"), Err(DatabaseError::TableNotFound(_))));
    }

    #[test]
    fn test_duplicate_table_rejected() {
        let dict = Dictionary::new(4096);
        dict.create_table(&schema("t1")).unwrap();
        assert!(matches!(
            dict.create_table(&schema("t1")),
            Err(DatabaseError::TableAlreadyExists(_))
        ));
    }

    #[test]
    fn test_index_ids_are_unique() {
        let dict = Dictionary::new(4096);
        let a = dict.create_table(&schema("a")).unwrap();
        let b = dict.create_table(&schema("b")).unwrap();
        let mut ids: Vec<_> = a.indexes().iter().chain(b.indexes()).map(|i| i.def.id()).collect();
        ids.dedup();
        assert_eq!(ids.len(), 4);
    }
}
