use std::cmp::Ordering;
use serde::{Deserialize, Serialize};
use super::value::{SortKey, Value};
use crate::catalog::IndexDef;

/// A physical index record.
///
/// On a clustered index the fields follow the index layout, so the hidden
/// `DB_TRX_ID` and `DB_ROLL_PTR` columns sit right after the unique key.
/// `deleted` is the delete-mark (tombstone) flag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Record {
    pub fields: Vec<Value>,
    pub deleted: bool,
}

impl Record {
    #[must_use]
    pub const fn new(fields: Vec<Value>) -> Self {
        Self { fields, deleted: false }
    }

    #[must_use]
    pub fn field(&self, n: usize) -> Option<&Value> {
        self.fields.get(n)
    }

    /// Transaction id of the last writer, 0 for non-clustered records
    #[must_use]
    pub fn trx_id(&self, index: &IndexDef) -> u64 {
        index
            .trx_id_pos()
            .and_then(|pos| self.fields.get(pos))
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }

    /// Roll pointer to the undo record holding the previous version
    #[must_use]
    pub fn roll_ptr(&self, index: &IndexDef) -> u64 {
        index
            .roll_ptr_pos()
            .and_then(|pos| self.fields.get(pos))
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }

    pub(crate) fn set_system_fields(&mut self, index: &IndexDef, trx_id: u64, roll_ptr: u64) {
        if let (Some(trx_pos), Some(roll_pos)) = (index.trx_id_pos(), index.roll_ptr_pos()) {
            self.fields[trx_pos] = Value::U64(trx_id);
            self.fields[roll_pos] = Value::U64(roll_ptr);
        }
    }

    /// Sort key made of the first `n_uniq` fields
    #[must_use]
    pub fn key(&self, index: &IndexDef) -> SortKey {
        self.fields
            .iter()
            .take(index.n_uniq())
            .enumerate()
            .map(|(i, v)| v.key_part(index.field(i).collation))
            .collect()
    }
}

/// Search or insert tuple: an ordered prefix of index fields
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tuple {
    fields: Vec<Value>,
}

impl Tuple {
    #[must_use]
    pub const fn new(fields: Vec<Value>) -> Self {
        Self { fields }
    }

    #[must_use]
    pub fn n_fields(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn field(&self, n: usize) -> Option<&Value> {
        self.fields.get(n)
    }

    #[must_use]
    pub fn fields(&self) -> &[Value] {
        &self.fields
    }

    #[must_use]
    pub fn into_record(self) -> Record {
        Record::new(self.fields)
    }

    /// Sort key prefix used to position a cursor
    #[must_use]
    pub fn key_prefix(&self, index: &IndexDef) -> SortKey {
        self.fields
            .iter()
            .enumerate()
            .take(index.n_fields())
            .map(|(i, v)| v.key_part(index.field(i).collation))
            .collect()
    }

    /// Compare this tuple with the leading fields of a record.
    ///
    /// Returns the ordering of the tuple relative to the record and the
    /// number of leading fields that compared equal.
    #[must_use]
    pub fn compare_with_record(&self, rec: &Record, index: &IndexDef) -> (Ordering, usize) {
        let n = self.fields.len().min(rec.fields.len()).min(index.n_fields());
        for i in 0..n {
            let collation = index.field(i).collation;
            let ord = self.fields[i]
                .key_part(collation)
                .cmp(&rec.fields[i].key_part(collation));
            if ord != Ordering::Equal {
                return (ord, i);
            }
        }
        (Ordering::Equal, n)
    }

    #[must_use]
    pub fn matches(&self, rec: &Record, index: &IndexDef) -> bool {
        self.compare_with_record(rec, index).0 == Ordering::Equal
    }
}

impl From<Vec<Value>> for Tuple {
    fn from(fields: Vec<Value>) -> Self {
        Self::new(fields)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateField {
    pub field_no: usize,
    pub new_val: Value,
}

/// Update descriptor: new values for a set of record fields
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Update {
    pub fields: Vec<UpdateField>,
}

impl Update {
    #[must_use]
    pub const fn new() -> Self {
        Self { fields: Vec::new() }
    }

    #[must_use]
    pub fn set(mut self, field_no: usize, new_val: Value) -> Self {
        self.fields.push(UpdateField { field_no, new_val });
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// True when no changed field alters its stored byte size.
    /// Switching between NULL and a value counts as a size change.
    #[must_use]
    pub fn keeps_size(&self, rec: &Record, index: &IndexDef) -> bool {
        self.fields.iter().all(|uf| {
            let Some(old) = rec.fields.get(uf.field_no) else { return true };
            let data_type = index.field(uf.field_no).data_type;
            data_type.stored_len(&uf.new_val) == data_type.stored_len(old)
        })
    }

    pub fn apply_to(&self, rec: &mut Record) {
        for uf in &self.fields {
            if let Some(field) = rec.fields.get_mut(uf.field_no) {
                *field = uf.new_val.clone();
            }
        }
    }
}
