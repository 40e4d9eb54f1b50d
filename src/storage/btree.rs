/// Leaf level of an index B-tree
///
/// Records live in fixed-size leaf pages keyed by their low fence key.
/// Space accounting follows the slotted page layout: each record costs
/// its encoded size plus a directory slot, and a record may occupy at
/// most half of an empty page. Longer records get their largest non-key
/// fields moved to external storage, leaving a field reference behind.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use serde::{Deserialize, Serialize};
use crate::catalog::{IndexDef, IndexId};
use crate::types::{DatabaseError, KeyPart, Record, SortKey, UpdateField, Value};

/// Bytes reserved for the page header and trailer
pub const PAGE_HEADER_SIZE: usize = 120;
/// Directory slot cost per record
pub const PAGE_DIR_SLOT_SIZE: usize = 4;
/// Size of the in-record reference to an externally stored field
pub const BTR_EXTERN_FIELD_REF_SIZE: usize = 20;

/// Cursor positioning mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    /// First record whose key prefix is >= the search tuple
    #[default]
    GreaterOrEqual,
    /// First record whose key prefix is > the search tuple
    Greater,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum StoredField {
    Inline(Value),
    External { blob: u64, text: bool },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    fields: Vec<StoredField>,
    deleted: bool,
}

#[derive(Debug, Default)]
struct LeafPage {
    page_no: u32,
    used: usize,
    records: BTreeMap<SortKey, StoredRecord>,
}

/// Counters for structural events on a tree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeStats {
    pub n_leaves: usize,
    pub n_records: usize,
    pub n_splits: u64,
    pub n_external: u64,
}

pub struct IndexTree {
    index_id: IndexId,
    n_uniq: usize,
    page_size: usize,
    leaves: BTreeMap<SortKey, LeafPage>,
    blobs: HashMap<u64, Vec<u8>>,
    next_blob: u64,
    next_page_no: u32,
    n_splits: u64,
    n_external: u64,
}

impl IndexTree {
    #[must_use]
    pub fn new(index: &IndexDef, page_size: usize) -> Self {
        let mut leaves = BTreeMap::new();
        // The leftmost leaf has the empty key as its fence
        leaves.insert(Vec::new(), LeafPage { page_no: 0, ..LeafPage::default() });
        Self {
            index_id: index.id(),
            n_uniq: index.n_uniq(),
            page_size,
            leaves,
            blobs: HashMap::new(),
            next_blob: 1,
            next_page_no: 1,
            n_splits: 0,
            n_external: 0,
        }
    }

    #[must_use]
    pub const fn index_id(&self) -> IndexId {
        self.index_id
    }

    /// Usable bytes of an empty page
    const fn capacity(&self) -> usize {
        self.page_size - PAGE_HEADER_SIZE
    }

    /// Largest record that may be stored inline
    const fn max_rec_size(&self) -> usize {
        self.capacity() / 2
    }

    #[must_use]
    pub fn stats(&self) -> TreeStats {
        TreeStats {
            n_leaves: self.leaves.len(),
            n_records: self.leaves.values().map(|l| l.records.len()).sum(),
            n_splits: self.n_splits,
            n_external: self.n_external,
        }
    }

    fn fence_of(&self, key: &SortKey) -> SortKey {
        self.leaves
            .range::<SortKey, _>(..=key)
            .next_back()
            .map(|(fence, _)| fence.clone())
            .unwrap_or_default()
    }

    fn leaf_of(&self, key: &SortKey) -> Option<&LeafPage> {
        self.leaves.range::<SortKey, _>(..=key).next_back().map(|(_, leaf)| leaf)
    }

    fn leaf_of_mut(&mut self, key: &SortKey) -> Option<&mut LeafPage> {
        self.leaves.range_mut::<SortKey, _>(..=key).next_back().map(|(_, leaf)| leaf)
    }

    /// Keys in ascending order starting at `from`
    fn keys_from<'a>(&'a self, from: Bound<&'a SortKey>) -> impl Iterator<Item = &'a SortKey> + 'a {
        let first_leaf = match from {
            Bound::Included(k) | Bound::Excluded(k) => {
                self.leaves.range::<SortKey, _>(..=k).next_back().map(|(fence, _)| fence)
            }
            Bound::Unbounded => None,
        };
        let leaves = match first_leaf {
            Some(fence) => self.leaves.range::<SortKey, _>((Bound::Included(fence), Bound::Unbounded)),
            None => self.leaves.range::<SortKey, _>(..),
        };
        leaves.flat_map(move |(_, leaf)| {
            leaf.records.range::<SortKey, _>((from, Bound::Unbounded)).map(|(k, _)| k)
        })
    }

    #[must_use]
    pub fn first(&self) -> Option<SortKey> {
        self.keys_from(Bound::Unbounded).next().cloned()
    }

    /// Position on the first record at or after `prefix`
    #[must_use]
    pub fn seek(&self, prefix: &SortKey, mode: SearchMode) -> Option<SortKey> {
        self.keys_from(Bound::Included(prefix))
            .find(|k| match mode {
                SearchMode::GreaterOrEqual => true,
                SearchMode::Greater => !has_prefix(k, prefix),
            })
            .cloned()
    }

    #[must_use]
    pub fn next(&self, key: &SortKey) -> Option<SortKey> {
        self.keys_from(Bound::Excluded(key)).next().cloned()
    }

    #[must_use]
    pub fn contains(&self, key: &SortKey) -> bool {
        self.leaf_of(key).is_some_and(|leaf| leaf.records.contains_key(key))
    }

    pub fn get(&self, key: &SortKey) -> Result<Option<Record>, DatabaseError> {
        match self.leaf_of(key).and_then(|leaf| leaf.records.get(key)) {
            Some(stored) => self.materialize(stored).map(Some),
            None => Ok(None),
        }
    }

    /// Every record in key order, delete-marked ones included
    pub fn records(&self) -> Result<Vec<Record>, DatabaseError> {
        self.leaves
            .values()
            .flat_map(|leaf| leaf.records.values())
            .map(|stored| self.materialize(stored))
            .collect()
    }

    fn materialize(&self, stored: &StoredRecord) -> Result<Record, DatabaseError> {
        let mut fields = Vec::with_capacity(stored.fields.len());
        for field in &stored.fields {
            fields.push(match field {
                StoredField::Inline(v) => v.clone(),
                StoredField::External { blob, text } => {
                    let data = self.blobs.get(blob).ok_or_else(|| {
                        DatabaseError::Corruption(format!("missing external field {blob}"))
                    })?;
                    if *text {
                        Value::Text(String::from_utf8(data.clone()).map_err(|e| {
                            DatabaseError::Corruption(e.to_string())
                        })?)
                    } else {
                        Value::Bytes(data.clone())
                    }
                }
            });
        }
        Ok(Record { fields, deleted: stored.deleted })
    }

    fn rec_size(stored: &StoredRecord) -> Result<usize, DatabaseError> {
        let encoded = bincode::serialized_size(stored)?;
        Ok(usize::try_from(encoded).unwrap_or(usize::MAX) + PAGE_DIR_SLOT_SIZE)
    }

    /// Move the longest non-key fields off-page until the record fits
    fn externalize(&mut self, stored: &mut StoredRecord) -> Result<usize, DatabaseError> {
        let mut size = Self::rec_size(stored)?;
        while size > self.max_rec_size() {
            let candidate = stored
                .fields
                .iter()
                .enumerate()
                .skip(self.n_uniq)
                .filter_map(|(i, f)| match f {
                    StoredField::Inline(Value::Text(s)) if s.len() > BTR_EXTERN_FIELD_REF_SIZE => Some((i, s.len())),
                    StoredField::Inline(Value::Bytes(b)) if b.len() > BTR_EXTERN_FIELD_REF_SIZE => Some((i, b.len())),
                    _ => None,
                })
                .max_by_key(|&(_, len)| len)
                .map(|(i, _)| i);

            let Some(i) = candidate else {
                return Err(DatabaseError::TooBigRecord(format!(
                    "{size} bytes exceeds the {} byte record limit", self.max_rec_size()
                )));
            };

            let blob = self.next_blob;
            let placeholder = StoredField::External { blob, text: false };
            let (data, text) = match std::mem::replace(&mut stored.fields[i], placeholder) {
                StoredField::Inline(Value::Text(s)) => (s.into_bytes(), true),
                StoredField::Inline(Value::Bytes(b)) => (b, false),
                _ => return Err(DatabaseError::Corruption(format!("field {i} cannot be stored externally"))),
            };
            self.next_blob += 1;
            stored.fields[i] = StoredField::External { blob, text };
            self.blobs.insert(blob, data);
            self.n_external += 1;
            size = Self::rec_size(stored)?;
        }
        Ok(size)
    }

    fn free_blobs(&mut self, stored: &StoredRecord) {
        for field in &stored.fields {
            if let StoredField::External { blob, .. } = field {
                self.blobs.remove(blob);
            }
        }
    }

    /// Split the leaf holding `key` so that `needed` more bytes fit there
    fn make_room(&mut self, key: &SortKey, needed: usize) {
        loop {
            let fence = self.fence_of(key);
            let Some(leaf) = self.leaves.get(&fence) else { return };
            if self.capacity().saturating_sub(leaf.used) >= needed || leaf.records.is_empty() {
                return;
            }
            let split_at = if leaf.records.len() >= 2 {
                leaf.records.keys().nth(leaf.records.len() / 2).cloned()
            } else {
                leaf.records.keys().next().map(|only| {
                    if key < only { only.clone() } else { key.clone() }
                })
            };
            let Some(split_at) = split_at else { return };
            self.split_leaf(&fence, split_at);
        }
    }

    fn split_leaf(&mut self, fence: &SortKey, split_at: SortKey) {
        let page_no = self.next_page_no;
        let Some(leaf) = self.leaves.get_mut(fence) else { return };
        let moved = leaf.records.split_off(&split_at);
        let moved_size: usize = moved
            .values()
            .map(|r| Self::rec_size(r).unwrap_or(0))
            .sum();
        leaf.used -= moved_size;
        self.next_page_no += 1;
        self.n_splits += 1;
        self.leaves.insert(split_at, LeafPage { page_no, used: moved_size, records: moved });
    }

    fn to_stored(rec: Record) -> StoredRecord {
        StoredRecord {
            fields: rec.fields.into_iter().map(StoredField::Inline).collect(),
            deleted: rec.deleted,
        }
    }

    /// Insert a new record, splitting the target leaf if it is full
    pub fn insert(&mut self, key: SortKey, rec: Record) -> Result<(), DatabaseError> {
        if self.contains(&key) {
            return Err(DatabaseError::DuplicateKey(format!("index {}", self.index_id)));
        }
        let mut stored = Self::to_stored(rec);
        let size = self.externalize(&mut stored)?;
        self.make_room(&key, size);
        let leaf = self
            .leaf_of_mut(&key)
            .ok_or_else(|| DatabaseError::Corruption("tree has no leaf".to_string()))?;
        leaf.used += size;
        leaf.records.insert(key, stored);
        Ok(())
    }

    fn stored(&self, key: &SortKey) -> Result<&StoredRecord, DatabaseError> {
        self.leaf_of(key)
            .and_then(|leaf| leaf.records.get(key))
            .ok_or_else(|| DatabaseError::Corruption(format!("record vanished from index {}", self.index_id)))
    }

    /// Overwrite fields whose stored size does not change
    pub fn update_in_place(
        &mut self,
        key: &SortKey,
        fields: &[UpdateField],
        deleted: Option<bool>,
    ) -> Result<(), DatabaseError> {
        let mut stored = self.stored(key)?.clone();
        let old_size = Self::rec_size(&stored)?;
        // An external field only takes a value of its own kind; checked
        // before anything is written so a refusal leaves the tree untouched
        let mut blob_writes = Vec::new();
        for uf in fields {
            if let Some(StoredField::External { blob, text }) = stored.fields.get(uf.field_no) {
                let data = match &uf.new_val {
                    Value::Text(s) if *text => s.as_bytes().to_vec(),
                    Value::Bytes(b) if !*text => b.clone(),
                    _ => return Err(DatabaseError::Overflow),
                };
                blob_writes.push((*blob, data));
            }
        }
        for uf in fields {
            if let Some(StoredField::Inline(v)) = stored.fields.get_mut(uf.field_no) {
                *v = uf.new_val.clone();
            }
        }
        self.blobs.extend(blob_writes);
        if let Some(flag) = deleted {
            stored.deleted = flag;
        }
        let new_size = Self::rec_size(&stored)?;
        let leaf = self
            .leaf_of_mut(key)
            .ok_or_else(|| DatabaseError::Corruption("tree has no leaf".to_string()))?;
        leaf.used = leaf.used + new_size - old_size;
        leaf.records.insert(key.clone(), stored);
        Ok(())
    }

    fn apply_update(stored: &StoredRecord, fields: &[UpdateField]) -> (StoredRecord, Vec<u64>) {
        let mut updated = stored.clone();
        let mut freed = Vec::new();
        for uf in fields {
            if let Some(slot) = updated.fields.get_mut(uf.field_no) {
                if let StoredField::External { blob, .. } = slot {
                    freed.push(*blob);
                }
                *slot = StoredField::Inline(uf.new_val.clone());
            }
        }
        (updated, freed)
    }

    /// Rewrite a record within its own page. Fails with `Overflow` when the
    /// grown record does not fit in the page or needs external storage.
    pub fn update_optimistic(&mut self, key: &SortKey, fields: &[UpdateField]) -> Result<(), DatabaseError> {
        let stored = self.stored(key)?;
        let old_size = Self::rec_size(stored)?;
        let (updated, freed) = Self::apply_update(stored, fields);
        let new_size = Self::rec_size(&updated)?;
        if new_size > self.max_rec_size() {
            return Err(DatabaseError::Overflow);
        }
        let capacity = self.capacity();
        let leaf = self
            .leaf_of_mut(key)
            .ok_or_else(|| DatabaseError::Corruption("tree has no leaf".to_string()))?;
        if leaf.used - old_size + new_size > capacity {
            return Err(DatabaseError::Overflow);
        }
        leaf.used = leaf.used - old_size + new_size;
        leaf.records.insert(key.clone(), updated);
        for blob in freed {
            self.blobs.remove(&blob);
        }
        Ok(())
    }

    /// Rewrite a record allowing page splits and external storage
    pub fn update_pessimistic(&mut self, key: &SortKey, fields: &[UpdateField]) -> Result<(), DatabaseError> {
        let stored = self.stored(key)?;
        let old_size = Self::rec_size(stored)?;
        let (mut updated, freed) = Self::apply_update(stored, fields);
        let new_size = self.externalize(&mut updated)?;

        let leaf = self
            .leaf_of_mut(key)
            .ok_or_else(|| DatabaseError::Corruption("tree has no leaf".to_string()))?;
        leaf.records.remove(key);
        leaf.used -= old_size;

        self.make_room(key, new_size);
        let leaf = self
            .leaf_of_mut(key)
            .ok_or_else(|| DatabaseError::Corruption("tree has no leaf".to_string()))?;
        leaf.used += new_size;
        leaf.records.insert(key.clone(), updated);
        for blob in freed {
            self.blobs.remove(&blob);
        }
        Ok(())
    }

    /// Physically remove a record
    pub fn remove(&mut self, key: &SortKey) -> Result<Option<Record>, DatabaseError> {
        let Some(leaf) = self.leaf_of_mut(key) else { return Ok(None) };
        let Some(stored) = leaf.records.remove(key) else { return Ok(None) };
        leaf.used -= Self::rec_size(&stored)?;
        let rec = self.materialize(&stored)?;
        self.free_blobs(&stored);
        Ok(Some(rec))
    }

    /// Put back a before-image: `None` removes the record
    pub fn restore(&mut self, key: &SortKey, image: Option<Record>) -> Result<(), DatabaseError> {
        self.remove(key)?;
        match image {
            Some(rec) => self.insert(key.clone(), rec),
            None => Ok(()),
        }
    }

    /// Page number of the leaf holding `key`
    #[must_use]
    pub fn page_no(&self, key: &SortKey) -> Option<u32> {
        self.leaf_of(key).map(|leaf| leaf.page_no)
    }
}

fn has_prefix(key: &SortKey, prefix: &[KeyPart]) -> bool {
    key.len() >= prefix.len() && key[..prefix.len()] == *prefix
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TableSchema;
    use crate::types::{Collation, DataType};

    fn words_index() -> IndexDef {
        TableSchema::new("words")
            .column("word", DataType::Varchar { max_len: 64 })
            .column("payload", DataType::Varbinary { max_len: 100_000 })
            .primary_key(&["word"])
            .build_indexes(1, || 1)
            .unwrap()
            .remove(0)
    }

    fn rec(word: &str, payload: Vec<u8>) -> Record {
        Record::new(vec![
            Value::Text(word.to_string()),
            Value::U64(1),
            Value::U64(0),
            Value::Bytes(payload),
        ])
    }

    fn key(word: &str) -> SortKey {
        vec![Value::Text(word.to_string()).key_part(Collation::Binary)]
    }

    #[test]
    fn test_insert_and_scan_in_order() {
        let index = words_index();
        let mut tree = IndexTree::new(&index, 1024);
        for w in ["pear", "apple", "fig"] {
            tree.insert(key(w), rec(w, vec![0; 4])).unwrap();
        }
        let mut seen = Vec::new();
        let mut cur = tree.first();
        while let Some(k) = cur {
            seen.push(tree.get(&k).unwrap().unwrap().fields[0].clone());
            cur = tree.next(&k);
        }
        assert_eq!(seen, vec![
            Value::Text("apple".to_string()),
            Value::Text("fig".to_string()),
            Value::Text("pear".to_string()),
        ]);
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let index = words_index();
        let mut tree = IndexTree::new(&index, 1024);
        tree.insert(key("a"), rec("a", vec![])).unwrap();
        let result = tree.insert(key("a"), rec("a", vec![]));
        assert!(matches!(result, Err(DatabaseError::DuplicateKey(_))));
    }

    #[test]
    fn test_seek_modes() {
        let index = words_index();
        let mut tree = IndexTree::new(&index, 1024);
        for w in ["cat", "catalog", "dog"] {
            tree.insert(key(w), rec(w, vec![])).unwrap();
        }
        assert_eq!(tree.seek(&key("cat"), SearchMode::GreaterOrEqual), Some(key("cat")));
        assert_eq!(tree.seek(&key("cat"), SearchMode::Greater), Some(key("catalog")));
        assert_eq!(tree.seek(&key("cow"), SearchMode::GreaterOrEqual), Some(key("dog")));
        assert_eq!(tree.seek(&key("zebra"), SearchMode::GreaterOrEqual), None);
    }

    #[test]
    fn test_leaf_split_keeps_order() {
        let index = words_index();
        let mut tree = IndexTree::new(&index, 1024);
        for i in 0..50 {
            let w = format!("w{i:03}");
            tree.insert(key(&w), rec(&w, vec![7; 60])).unwrap();
        }
        let stats = tree.stats();
        assert!(stats.n_leaves > 1);
        assert_eq!(stats.n_records, 50);
        assert_eq!(tree.page_no(&key("w000")), Some(0));
        assert_ne!(tree.page_no(&key("w000")), tree.page_no(&key("w049")));

        let all = tree.records().unwrap();
        let words: Vec<_> = all.iter().map(|r| r.fields[0].clone()).collect();
        let mut sorted = words.clone();
        sorted.sort_by_key(|v| v.key_part(Collation::Binary));
        assert_eq!(words, sorted);
    }

    #[test]
    fn test_update_tiers() {
        let index = words_index();
        let mut tree = IndexTree::new(&index, 1024);
        tree.insert(key("a"), rec("a", vec![1; 10])).unwrap();

        let same = [UpdateField { field_no: 3, new_val: Value::Bytes(vec![2; 10]) }];
        tree.update_in_place(&key("a"), &same, None).unwrap();

        // Larger than half a page: optimistic path refuses it
        let big = [UpdateField { field_no: 3, new_val: Value::Bytes(vec![3; 800]) }];
        assert!(matches!(tree.update_optimistic(&key("a"), &big), Err(DatabaseError::Overflow)));

        tree.update_pessimistic(&key("a"), &big).unwrap();
        assert_eq!(tree.stats().n_external, 1);
        let got = tree.get(&key("a")).unwrap().unwrap();
        assert_eq!(got.fields[3], Value::Bytes(vec![3; 800]));
    }

    #[test]
    fn test_in_place_refuses_null_over_external_field() {
        let index = words_index();
        let mut tree = IndexTree::new(&index, 1024);
        tree.insert(key("a"), rec("a", vec![5; 800])).unwrap();
        assert_eq!(tree.stats().n_external, 1);

        let null = [
            UpdateField { field_no: 1, new_val: Value::U64(9) },
            UpdateField { field_no: 3, new_val: Value::Null },
        ];
        assert!(matches!(tree.update_in_place(&key("a"), &null, None), Err(DatabaseError::Overflow)));
        let unchanged = tree.get(&key("a")).unwrap().unwrap();
        assert_eq!(unchanged.fields[1], Value::U64(1));
        assert_eq!(unchanged.fields[3], Value::Bytes(vec![5; 800]));

        tree.update_optimistic(&key("a"), &null).unwrap();
        let got = tree.get(&key("a")).unwrap().unwrap();
        assert_eq!(got.fields[1], Value::U64(9));
        assert_eq!(got.fields[3], Value::Null);
    }

    #[test]
    fn test_too_big_key_rejected() {
        let index = words_index();
        let mut tree = IndexTree::new(&index, 1024);
        let long = "x".repeat(600);
        let result = tree.insert(key(&long), rec(&long, vec![]));
        assert!(matches!(result, Err(DatabaseError::TooBigRecord(_))));
    }

    #[test]
    fn test_restore_before_image() {
        let index = words_index();
        let mut tree = IndexTree::new(&index, 1024);
        tree.insert(key("a"), rec("a", vec![1])).unwrap();
        let before = tree.get(&key("a")).unwrap();
        tree.update_in_place(&key("a"), &[], Some(true)).unwrap();
        assert!(tree.get(&key("a")).unwrap().unwrap().deleted);

        tree.restore(&key("a"), before).unwrap();
        assert!(!tree.get(&key("a")).unwrap().unwrap().deleted);

        tree.restore(&key("a"), None).unwrap();
        assert!(tree.get(&key("a")).unwrap().is_none());
    }
}
