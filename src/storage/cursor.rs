use std::sync::Arc;
use crate::catalog::Index;
use crate::types::{DatabaseError, Record, SortKey, Tuple};
use super::btree::SearchMode;
use super::mtr::Mtr;

/// Position within one index, valid only while the owning `Mtr`
/// holds the index latch
#[derive(Debug, Clone)]
pub struct PersistentCursor {
    index: Arc<Index>,
    key: Option<SortKey>,
}

impl PersistentCursor {
    /// Position on the first record matching `tuple` under `mode`, or on the
    /// first record of the index when no tuple is given
    pub fn open(
        mtr: &Mtr,
        index: &Arc<Index>,
        tuple: Option<&Tuple>,
        mode: SearchMode,
    ) -> Result<Self, DatabaseError> {
        let tree = mtr.tree(index.def.id())?;
        let key = match tuple {
            Some(tuple) => tree.seek(&tuple.key_prefix(&index.def), mode),
            None => tree.first(),
        };
        Ok(Self { index: Arc::clone(index), key })
    }

    #[must_use]
    pub fn index(&self) -> &Arc<Index> {
        &self.index
    }

    #[must_use]
    pub fn key(&self) -> Option<&SortKey> {
        self.key.as_ref()
    }

    #[must_use]
    pub const fn is_positioned(&self) -> bool {
        self.key.is_some()
    }

    /// Record under the cursor, `None` past the end
    pub fn record(&self, mtr: &Mtr) -> Result<Option<Record>, DatabaseError> {
        match &self.key {
            Some(key) => mtr.tree(self.index.def.id())?.get(key),
            None => Ok(None),
        }
    }

    /// Advance to the next record; returns false past the end
    pub fn move_next(&mut self, mtr: &Mtr) -> Result<bool, DatabaseError> {
        if let Some(key) = &self.key {
            self.key = mtr.tree(self.index.def.id())?.next(key);
        }
        Ok(self.key.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Dictionary, TableSchema};
    use crate::storage::LatchMode;
    use crate::types::{DataType, Value};

    #[test]
    fn test_positioned_scan() {
        let table = Dictionary::new(4096)
            .create_table(
                &TableSchema::new("t")
                    .column("id", DataType::BigUnsigned)
                    .primary_key(&["id"]),
            )
            .unwrap();
        let index = table.clustered();

        let mut mtr = Mtr::start();
        mtr.latch(index, LatchMode::Exclusive).unwrap();
        for id in [5_u64, 1, 3] {
            let rec = Record::new(vec![Value::U64(id), Value::U64(1), Value::U64(0)]);
            mtr.insert(index, &rec.key(&index.def), rec.clone()).unwrap();
        }

        let start = Tuple::new(vec![Value::U64(2)]);
        let mut cursor = PersistentCursor::open(&mtr, index, Some(&start), SearchMode::GreaterOrEqual).unwrap();
        let mut seen = Vec::new();
        while let Some(rec) = cursor.record(&mtr).unwrap() {
            seen.push(rec.fields[0].clone());
            cursor.move_next(&mtr).unwrap();
        }
        assert_eq!(seen, vec![Value::U64(3), Value::U64(5)]);

        let full = PersistentCursor::open(&mtr, index, None, SearchMode::GreaterOrEqual).unwrap();
        assert_eq!(full.record(&mtr).unwrap().unwrap().fields[0], Value::U64(1));
        mtr.commit();
    }
}
