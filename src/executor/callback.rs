/// Record callbacks driven by every executor scan
///
/// A scan asks the callback to `compare` each candidate record against the
/// search tuple, then hands the records it decides to handle to `process`.

use std::cmp::Ordering;
use crate::catalog::IndexDef;
use crate::storage::SearchMode;
use crate::types::{Record, Tuple, Value};

/// Outcome of comparing a scanned record with the search tuple
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareAction {
    /// Record matches and should be processed
    Process,
    /// Record does not match; keep scanning
    Skip,
    /// No later record can match; end the scan
    Stop,
}

pub trait RecordCallback {
    fn compare(&mut self, search: Option<&Tuple>, rec: &Record, index: &IndexDef) -> CompareAction;

    /// Handle a matching record. Returning false ends the scan.
    fn process(&mut self, rec: &Record, index: &IndexDef) -> bool;
}

/// Built-in ways of matching a scanned record against the search tuple
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Every search field equals the record field
    Equal,
    /// First field is a `LIKE 'prefix%'` pattern, the rest must be equal
    Like,
    /// Record sorts at or after (or strictly after) the search tuple
    Ordered(SearchMode),
}

impl MatchMode {
    #[must_use]
    pub fn compare(self, search: Option<&Tuple>, rec: &Record, index: &IndexDef) -> CompareAction {
        let Some(search) = search else { return CompareAction::Process };
        match self {
            Self::Equal => compare_equal(search, rec, index),
            Self::Like => compare_like(search, rec, index),
            Self::Ordered(mode) => compare_ordered(search, rec, index, mode),
        }
    }
}

/// Collation-aware equality on the search fields. The scan runs in key
/// order, so a record past the search tuple ends it.
#[must_use]
pub fn compare_equal(search: &Tuple, rec: &Record, index: &IndexDef) -> CompareAction {
    match search.compare_with_record(rec, index).0 {
        Ordering::Equal => CompareAction::Process,
        Ordering::Less => CompareAction::Stop,
        Ordering::Greater => CompareAction::Skip,
    }
}

/// `LIKE 'prefix%'` on the first field
#[must_use]
pub fn compare_like(search: &Tuple, rec: &Record, index: &IndexDef) -> CompareAction {
    let (Some(Value::Text(prefix)), Some(Value::Text(value))) = (search.field(0), rec.field(0)) else {
        return compare_equal(search, rec, index);
    };
    let collation = index.field(0).collation;
    if !collation.starts_with(value, prefix) {
        // Records sorting before the prefix are skipped, later ones end the scan
        return if collation.weight(value) < collation.weight(prefix) {
            CompareAction::Skip
        } else {
            CompareAction::Stop
        };
    }
    let rest_equal = search.fields().iter().enumerate().skip(1).all(|(i, v)| {
        let collation = index.field(i).collation;
        rec.field(i).is_some_and(|r| r.key_part(collation) == v.key_part(collation))
    });
    if rest_equal { CompareAction::Process } else { CompareAction::Skip }
}

/// Ordering match for ascending range scans
#[must_use]
pub fn compare_ordered(search: &Tuple, rec: &Record, index: &IndexDef, mode: SearchMode) -> CompareAction {
    match (search.compare_with_record(rec, index).0, mode) {
        (Ordering::Less, _) | (Ordering::Equal, SearchMode::GreaterOrEqual) => CompareAction::Process,
        _ => CompareAction::Skip,
    }
}

/// Callback built from two closures
pub struct FnCallback<C, P> {
    compare: C,
    process: P,
}

impl<C, P> FnCallback<C, P>
where
    C: FnMut(Option<&Tuple>, &Record, &IndexDef) -> CompareAction,
    P: FnMut(&Record, &IndexDef) -> bool,
{
    pub const fn new(compare: C, process: P) -> Self {
        Self { compare, process }
    }
}

impl<C, P> RecordCallback for FnCallback<C, P>
where
    C: FnMut(Option<&Tuple>, &Record, &IndexDef) -> CompareAction,
    P: FnMut(&Record, &IndexDef) -> bool,
{
    fn compare(&mut self, search: Option<&Tuple>, rec: &Record, index: &IndexDef) -> CompareAction {
        (self.compare)(search, rec, index)
    }

    fn process(&mut self, rec: &Record, index: &IndexDef) -> bool {
        (self.process)(rec, index)
    }
}

/// Collects every matching record
#[derive(Debug, Clone)]
pub struct RecordCollector {
    mode: MatchMode,
    pub records: Vec<Record>,
}

impl RecordCollector {
    #[must_use]
    pub const fn new(mode: MatchMode) -> Self {
        Self { mode, records: Vec::new() }
    }
}

impl RecordCallback for RecordCollector {
    fn compare(&mut self, search: Option<&Tuple>, rec: &Record, index: &IndexDef) -> CompareAction {
        self.mode.compare(search, rec, index)
    }

    fn process(&mut self, rec: &Record, _index: &IndexDef) -> bool {
        self.records.push(rec.clone());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TableSchema;
    use crate::types::{Collation, DataType};

    fn index() -> IndexDef {
        TableSchema::new("words")
            .column_with_collation("word", DataType::Varchar { max_len: 20 }, Collation::Utf8GeneralCi)
            .column("doc", DataType::BigUnsigned)
            .primary_key(&["word", "doc"])
            .build_indexes(1, || 1)
            .unwrap()
            .remove(0)
    }

    fn rec(word: &str, doc: u64) -> Record {
        Record::new(vec![Value::Text(word.to_string()), Value::U64(doc), Value::U64(1), Value::U64(0)])
    }

    fn word(w: &str) -> Tuple {
        Tuple::new(vec![Value::Text(w.to_string())])
    }

    #[test]
    fn test_equal_match() {
        let index = index();
        assert_eq!(compare_equal(&word("CAT"), &rec("cat", 1), &index), CompareAction::Process);
        assert_eq!(compare_equal(&word("cat"), &rec("dog", 1), &index), CompareAction::Stop);
        assert_eq!(compare_equal(&word("dog"), &rec("cat", 1), &index), CompareAction::Skip);
    }

    #[test]
    fn test_like_match() {
        let index = index();
        assert_eq!(compare_like(&word("cat"), &rec("Catalog", 1), &index), CompareAction::Process);
        assert_eq!(compare_like(&word("cat"), &rec("bat", 1), &index), CompareAction::Skip);
        assert_eq!(compare_like(&word("cat"), &rec("dog", 1), &index), CompareAction::Stop);
    }

    #[test]
    fn test_ordered_match() {
        let index = index();
        let ge = SearchMode::GreaterOrEqual;
        let gt = SearchMode::Greater;
        assert_eq!(compare_ordered(&word("cat"), &rec("cat", 1), &index, ge), CompareAction::Process);
        assert_eq!(compare_ordered(&word("cat"), &rec("cat", 1), &index, gt), CompareAction::Skip);
        assert_eq!(compare_ordered(&word("cat"), &rec("dog", 1), &index, gt), CompareAction::Process);
        assert_eq!(compare_ordered(&word("dog"), &rec("cat", 1), &index, ge), CompareAction::Skip);
    }

    #[test]
    fn test_absent_tuple_processes_everything() {
        let index = index();
        assert_eq!(MatchMode::Equal.compare(None, &rec("x", 1), &index), CompareAction::Process);
    }

    #[test]
    fn test_fn_callback() {
        let index = index();
        let mut seen = Vec::new();
        let mut cb = FnCallback::new(
            |_: Option<&Tuple>, r: &Record, _: &IndexDef| {
                if r.fields[1] == Value::U64(2) { CompareAction::Stop } else { CompareAction::Process }
            },
            |r: &Record, _: &IndexDef| {
                seen.push(r.fields[1].clone());
                true
            },
        );
        assert_eq!(cb.compare(None, &rec("a", 2), &index), CompareAction::Stop);
        assert!(cb.process(&rec("a", 1), &index));
        drop(cb);
        assert_eq!(seen, vec![Value::U64(1)]);
    }
}
