use std::cmp::Ordering;
use serde::{Deserialize, Serialize};
use crate::types::{Collation, DataType, DatabaseError, Record, Tuple};

pub type TableId = u64;
pub type IndexId = u64;

/// Name of the hidden transaction id column of a clustered index
pub const DB_TRX_ID: &str = "DB_TRX_ID";
/// Name of the hidden rollback pointer column of a clustered index
pub const DB_ROLL_PTR: &str = "DB_ROLL_PTR";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexField {
    pub name: String,
    pub data_type: DataType,
    pub collation: Collation,
}

/// Layout of one index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    id: IndexId,
    name: String,
    table_id: TableId,
    clustered: bool,
    fields: Vec<IndexField>,
    n_uniq: usize,
    /// Position of each field in the clustered record (secondary indexes only)
    clust_pos: Vec<usize>,
}

impl IndexDef {
    #[must_use]
    pub const fn id(&self) -> IndexId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn table_id(&self) -> TableId {
        self.table_id
    }

    #[must_use]
    pub const fn is_clustered(&self) -> bool {
        self.clustered
    }

    #[must_use]
    pub fn n_fields(&self) -> usize {
        self.fields.len()
    }

    /// Number of fields that make a record unique within the index
    #[must_use]
    pub const fn n_uniq(&self) -> usize {
        self.n_uniq
    }

    /// Field descriptor; `n` must be below `n_fields()`
    #[must_use]
    pub fn field(&self, n: usize) -> &IndexField {
        &self.fields[n]
    }

    #[must_use]
    pub fn fields(&self) -> &[IndexField] {
        &self.fields
    }

    #[must_use]
    pub fn field_no(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    #[must_use]
    pub const fn trx_id_pos(&self) -> Option<usize> {
        if self.clustered { Some(self.n_uniq) } else { None }
    }

    #[must_use]
    pub const fn roll_ptr_pos(&self) -> Option<usize> {
        if self.clustered { Some(self.n_uniq + 1) } else { None }
    }

    #[must_use]
    pub fn clust_pos(&self) -> &[usize] {
        &self.clust_pos
    }

    /// Build the secondary index entry for a clustered record
    #[must_use]
    pub fn build_entry(&self, clust_rec: &Record) -> Record {
        Record::new(
            self.clust_pos
                .iter()
                .map(|&pos| clust_rec.fields[pos].clone())
                .collect(),
        )
    }

    /// Extract the clustered key (row reference) from a secondary record
    pub fn build_row_ref(&self, sec_rec: &Record, clust: &IndexDef) -> Result<Tuple, DatabaseError> {
        let mut fields = Vec::with_capacity(clust.n_uniq());
        for pk_pos in 0..clust.n_uniq() {
            let i = self
                .clust_pos
                .iter()
                .position(|&p| p == pk_pos)
                .ok_or_else(|| DatabaseError::StructuralMismatch(format!(
                    "index '{}' does not carry primary key field {pk_pos}", self.name
                )))?;
            let value = sec_rec.fields.get(i).ok_or_else(|| {
                DatabaseError::Corruption(format!("short record in index '{}'", self.name))
            })?;
            fields.push(value.clone());
        }
        Ok(Tuple::new(fields))
    }

    /// Does the clustered record still carry the key of this secondary record?
    #[must_use]
    pub fn is_for_clust_rec(&self, sec_rec: &Record, clust_rec: &Record) -> bool {
        self.clust_pos.iter().enumerate().all(|(i, &pos)| {
            match (sec_rec.fields.get(i), clust_rec.fields.get(pos)) {
                (Some(a), Some(b)) => {
                    let collation = self.fields[i].collation;
                    a.key_part(collation).cmp(&b.key_part(collation)) == Ordering::Equal
                }
                _ => false,
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    pub collation: Collation,
}

/// Table definition builder.
///
/// The clustered index is laid out as: primary key columns, `DB_TRX_ID`,
/// `DB_ROLL_PTR`, then the remaining columns in declaration order.
#[derive(Debug, Clone, Default)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<String>,
    pub secondary: Vec<(String, Vec<String>)>,
}

impl TableSchema {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    #[must_use]
    pub fn column(self, name: &str, data_type: DataType) -> Self {
        self.column_with_collation(name, data_type, Collation::Binary)
    }

    #[must_use]
    pub fn column_with_collation(mut self, name: &str, data_type: DataType, collation: Collation) -> Self {
        self.columns.push(ColumnDef { name: name.to_string(), data_type, collation });
        self
    }

    #[must_use]
    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| (*c).to_string()).collect();
        self
    }

    #[must_use]
    pub fn index(mut self, name: &str, columns: &[&str]) -> Self {
        self.secondary
            .push((name.to_string(), columns.iter().map(|c| (*c).to_string()).collect()));
        self
    }

    fn column_def(&self, name: &str) -> Result<&ColumnDef, DatabaseError> {
        self.columns.iter().find(|c| c.name == name).ok_or_else(|| {
            DatabaseError::StructuralMismatch(format!("unknown column '{name}' in table '{}'", self.name))
        })
    }

    /// Resolve the schema into index layouts, clustered index first
    pub(crate) fn build_indexes(
        &self,
        table_id: TableId,
        mut next_index_id: impl FnMut() -> IndexId,
    ) -> Result<Vec<IndexDef>, DatabaseError> {
        if self.primary_key.is_empty() {
            return Err(DatabaseError::StructuralMismatch(format!(
                "table '{}' has no primary key", self.name
            )));
        }
        for (i, col) in self.columns.iter().enumerate() {
            if col.data_type.is_system() {
                return Err(DatabaseError::StructuralMismatch(format!(
                    "column '{}' uses a hidden system type", col.name
                )));
            }
            if self.columns[..i].iter().any(|c| c.name == col.name) {
                return Err(DatabaseError::StructuralMismatch(format!(
                    "duplicate column '{}'", col.name
                )));
            }
        }

        let to_field = |c: &ColumnDef| IndexField {
            name: c.name.clone(),
            data_type: c.data_type,
            collation: c.collation,
        };

        let mut clust_fields = Vec::with_capacity(self.columns.len() + 2);
        for name in &self.primary_key {
            clust_fields.push(to_field(self.column_def(name)?));
        }
        clust_fields.push(IndexField {
            name: DB_TRX_ID.to_string(),
            data_type: DataType::TrxId,
            collation: Collation::Binary,
        });
        clust_fields.push(IndexField {
            name: DB_ROLL_PTR.to_string(),
            data_type: DataType::RollPtr,
            collation: Collation::Binary,
        });
        for col in &self.columns {
            if !self.primary_key.contains(&col.name) {
                clust_fields.push(to_field(col));
            }
        }

        let n_uniq = self.primary_key.len();
        let clustered = IndexDef {
            id: next_index_id(),
            name: "PRIMARY".to_string(),
            table_id,
            clustered: true,
            clust_pos: (0..clust_fields.len()).collect(),
            fields: clust_fields,
            n_uniq,
        };

        let mut indexes = Vec::with_capacity(1 + self.secondary.len());
        for (name, columns) in &self.secondary {
            let mut fields = Vec::new();
            let mut clust_pos = Vec::new();
            let key_columns = columns.iter().chain(
                self.primary_key.iter().filter(|pk| !columns.contains(pk)),
            );
            for col_name in key_columns {
                let pos = clustered.field_no(col_name).ok_or_else(|| {
                    DatabaseError::StructuralMismatch(format!(
                        "unknown column '{col_name}' in index '{name}'"
                    ))
                })?;
                fields.push(clustered.field(pos).clone());
                clust_pos.push(pos);
            }
            indexes.push(IndexDef {
                id: next_index_id(),
                name: name.clone(),
                table_id,
                clustered: false,
                n_uniq: fields.len(),
                fields,
                clust_pos,
            });
        }
        indexes.insert(0, clustered);
        Ok(indexes)
    }
}
