/// Scan consumers for the FTS tables
///
/// - `CommonTableReader` collects the doc ids of a DELETED-style table
/// - `ConfigReader` fetches one CONFIG value
/// - `PostingListReader` groups posting rows per word under a memory budget

use std::cmp::Ordering;
use std::mem::size_of;
use serde::{Deserialize, Serialize};
use crate::catalog::IndexDef;
use crate::executor::{CompareAction, MatchMode, RecordCallback};
use crate::types::{Record, Tuple, Value};
use super::tables::CONFIG_VALUE_FIELD;

/// Field numbers of a posting record
const AUX_WORD: usize = 0;
const AUX_FIRST_DOC_ID: usize = 1;
const AUX_LAST_DOC_ID: usize = 4;
const AUX_DOC_COUNT: usize = 5;
const AUX_ILIST: usize = 6;

#[derive(Debug, Clone, Default)]
pub struct CommonTableReader {
    doc_ids: Vec<u64>,
}

impl CommonTableReader {
    #[must_use]
    pub const fn new() -> Self {
        Self { doc_ids: Vec::new() }
    }

    #[must_use]
    pub fn doc_ids(&self) -> &[u64] {
        &self.doc_ids
    }

    pub fn clear(&mut self) {
        self.doc_ids.clear();
    }
}

impl RecordCallback for CommonTableReader {
    fn compare(&mut self, _search: Option<&Tuple>, _rec: &Record, _index: &IndexDef) -> CompareAction {
        CompareAction::Process
    }

    fn process(&mut self, rec: &Record, _index: &IndexDef) -> bool {
        if let Some(doc_id) = rec.field(0).and_then(Value::as_u64) {
            self.doc_ids.push(doc_id);
        }
        true
    }
}

/// Reads the value of the first CONFIG record whose key equals the search key
#[derive(Debug, Clone, Default)]
pub struct ConfigReader {
    pub value: Option<String>,
}

impl ConfigReader {
    #[must_use]
    pub const fn new() -> Self {
        Self { value: None }
    }
}

impl RecordCallback for ConfigReader {
    fn compare(&mut self, search: Option<&Tuple>, rec: &Record, index: &IndexDef) -> CompareAction {
        let Some(search) = search else { return CompareAction::Process };
        match search.compare_with_record(rec, index).0 {
            Ordering::Equal => CompareAction::Process,
            _ => CompareAction::Stop,
        }
    }

    fn process(&mut self, rec: &Record, _index: &IndexDef) -> bool {
        self.value = rec.field(CONFIG_VALUE_FIELD).and_then(Value::as_text).map(str::to_string);
        false
    }
}

/// One posting row of a word
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FtsNode {
    pub first_doc_id: u64,
    pub last_doc_id: u64,
    pub doc_count: u32,
    pub ilist: Vec<u8>,
}

impl FtsNode {
    /// Memory charged against the reader's budget
    #[must_use]
    pub fn mem_size(&self) -> usize {
        size_of::<Self>() + self.ilist.len()
    }
}

/// Every posting row read for one word, in `first_doc_id` order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FtsWord {
    pub text: String,
    pub nodes: Vec<FtsNode>,
}

/// Groups consecutive posting rows of the same word. Stops the scan once
/// the charged memory reaches the limit; the row that crossed the limit is
/// kept, so the overshoot is bounded by that row's size.
#[derive(Debug, Clone)]
pub struct PostingListReader {
    mode: MatchMode,
    limit: usize,
    total_memory: usize,
    last_record_size: usize,
    words: Vec<FtsWord>,
}

impl PostingListReader {
    #[must_use]
    pub const fn new(mode: MatchMode, limit: usize) -> Self {
        Self { mode, limit, total_memory: 0, last_record_size: 0, words: Vec::new() }
    }

    #[must_use]
    pub fn words(&self) -> &[FtsWord] {
        &self.words
    }

    #[must_use]
    pub fn into_words(self) -> Vec<FtsWord> {
        self.words
    }

    #[must_use]
    pub const fn total_memory(&self) -> usize {
        self.total_memory
    }

    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Size charged for the most recently processed row
    #[must_use]
    pub const fn last_record_size(&self) -> usize {
        self.last_record_size
    }

    #[must_use]
    pub const fn is_over_budget(&self) -> bool {
        self.total_memory >= self.limit
    }

    fn node_of(rec: &Record) -> Option<(String, FtsNode)> {
        let word = rec.field(AUX_WORD)?.as_text()?.to_string();
        let node = FtsNode {
            first_doc_id: rec.field(AUX_FIRST_DOC_ID)?.as_u64()?,
            last_doc_id: rec.field(AUX_LAST_DOC_ID)?.as_u64()?,
            doc_count: rec.field(AUX_DOC_COUNT)?.as_u32()?,
            ilist: rec.field(AUX_ILIST)?.as_bytes()?.to_vec(),
        };
        Some((word, node))
    }
}

impl RecordCallback for PostingListReader {
    fn compare(&mut self, search: Option<&Tuple>, rec: &Record, index: &IndexDef) -> CompareAction {
        self.mode.compare(search, rec, index)
    }

    fn process(&mut self, rec: &Record, index: &IndexDef) -> bool {
        let Some((text, node)) = Self::node_of(rec) else {
            return true;
        };
        let collation = index.field(AUX_WORD).collation;
        let mut size = node.mem_size();
        match self.words.last_mut() {
            Some(last) if collation.equals(&last.text, &text) => last.nodes.push(node),
            _ => {
                size += size_of::<FtsWord>() + text.len();
                self.words.push(FtsWord { text, nodes: vec![node] });
            }
        }
        self.last_record_size = size;
        self.total_memory += size;
        !self.is_over_budget()
    }
}
