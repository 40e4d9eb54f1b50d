// Integration tests for the FTS table executor
use postgrust_fts::executor::{MatchMode, RecordCollector};
use postgrust_fts::fts::{
    common_table_name, create_aux_tables, create_common_tables, CommonTable, CommonTableReader, ConfigReader,
    FTSQueryExecutor, FtsAuxData, PostingListReader, FTS_MAX_CONFIG_VALUE_LEN,
};
use postgrust_fts::storage::SearchMode;
use postgrust_fts::types::{Collation, Database, DatabaseError, Value};

const TABLE_ID: u64 = 0x41;
const INDEX_ID: u64 = 0x7;

fn setup() -> Database {
    let db = Database::default();
    create_common_tables(&db, TABLE_ID).unwrap();
    create_aux_tables(&db, TABLE_ID, INDEX_ID, Collation::Utf8GeneralCi).unwrap();
    db
}

fn executor(db: &Database) -> FTSQueryExecutor {
    FTSQueryExecutor::new(db, db.begin(), TABLE_ID, Some(INDEX_ID))
}

fn posting(word: &str, first: u64, last: u64, count: u32) -> FtsAuxData {
    FtsAuxData {
        word: word.to_string(),
        first_doc_id: first,
        last_doc_id: last,
        doc_count: count,
        ilist: vec![0xAB; 8],
    }
}

fn config_value(exec: &mut FTSQueryExecutor, key: &str) -> Option<String> {
    let mut reader = ConfigReader::new();
    exec.read_config_with_lock(key, &mut reader).ok()?;
    exec.release_lock();
    reader.value
}

fn count_config_rows(exec: &mut FTSQueryExecutor, key: &str) -> usize {
    let mut all = RecordCollector::new(MatchMode::Equal);
    exec.read_all_common(CommonTable::Config, &mut all).unwrap();
    all.records
        .iter()
        .filter(|r| r.fields[0] == Value::Text(key.to_string()))
        .count()
}

#[test]
fn test_config_insert_read_update() {
    let db = setup();
    let mut exec = executor(&db);

    exec.insert_config_record("limit", "100").unwrap();
    assert_eq!(config_value(&mut exec, "limit").as_deref(), Some("100"));

    exec.update_config_record("limit", "200").unwrap();
    assert_eq!(config_value(&mut exec, "limit").as_deref(), Some("200"));
    assert_eq!(count_config_rows(&mut exec, "limit"), 1);
}

#[test]
fn test_config_defaults_seeded() {
    let db = setup();
    let mut exec = executor(&db);
    assert_eq!(config_value(&mut exec, "optimize_checkpoint_limit").as_deref(), Some("180"));
    assert_eq!(config_value(&mut exec, "table_state").as_deref(), Some("0"));
    assert_eq!(config_value(&mut exec, "missing"), None);
}

#[test]
fn test_config_update_inserts_missing_key() {
    let db = setup();
    let mut exec = executor(&db);
    exec.update_config_record("fresh", "1").unwrap();
    assert_eq!(config_value(&mut exec, "fresh").as_deref(), Some("1"));
}

#[test]
fn test_config_value_truncated() {
    let db = setup();
    let mut exec = executor(&db);
    let long = "v".repeat(FTS_MAX_CONFIG_VALUE_LEN + 50);
    exec.insert_config_record("long", &long).unwrap();
    assert_eq!(config_value(&mut exec, "long").map(|v| v.len()), Some(FTS_MAX_CONFIG_VALUE_LEN));
}

#[test]
fn test_config_delete() {
    let db = setup();
    let mut exec = executor(&db);
    exec.insert_config_record("gone", "1").unwrap();
    exec.delete_config_record("gone").unwrap();
    assert_eq!(config_value(&mut exec, "gone"), None);
    assert!(matches!(exec.delete_config_record("gone"), Err(DatabaseError::RecordNotFound)));
}

#[test]
fn test_aux_insert_read_delete() {
    let db = setup();
    let mut exec = executor(&db);
    exec.insert_aux_record(0, &posting("cat", 1, 5, 5)).unwrap();

    let mut reader = PostingListReader::new(MatchMode::Equal, usize::MAX);
    exec.read_aux(0, "cat", SearchMode::GreaterOrEqual, &mut reader).unwrap();
    assert_eq!(reader.words().len(), 1);
    let word = &reader.words()[0];
    assert_eq!(word.text, "cat");
    assert_eq!(word.nodes.len(), 1);
    assert_eq!(word.nodes[0].last_doc_id, 5);
    assert_eq!(word.nodes[0].doc_count, 5);

    exec.delete_aux_record(0, &FtsAuxData::word("cat")).unwrap();
    let mut reader = PostingListReader::new(MatchMode::Equal, usize::MAX);
    assert!(matches!(
        exec.read_aux(0, "cat", SearchMode::GreaterOrEqual, &mut reader),
        Err(DatabaseError::RecordNotFound)
    ));
}

#[test]
fn test_aux_delete_removes_every_node_of_word() {
    let db = setup();
    let mut exec = executor(&db);
    exec.insert_aux_record(2, &posting("cat", 1, 5, 5)).unwrap();
    exec.insert_aux_record(2, &posting("cat", 6, 9, 2)).unwrap();
    exec.insert_aux_record(2, &posting("dog", 1, 1, 1)).unwrap();

    exec.delete_aux_record(2, &FtsAuxData::word("CAT")).unwrap();

    let mut reader = PostingListReader::new(MatchMode::Equal, usize::MAX);
    exec.read_aux_all(2, &mut reader).unwrap();
    let words: Vec<&str> = reader.words().iter().map(|w| w.text.as_str()).collect();
    assert_eq!(words, vec!["dog"]);
}

#[test]
fn test_aux_prefix_and_range_reads() {
    let db = setup();
    let mut exec = executor(&db);
    for word in ["apple", "cat", "catalog", "dog"] {
        exec.insert_aux_record(1, &posting(word, 1, 2, 1)).unwrap();
    }

    let mut like = PostingListReader::new(MatchMode::Like, usize::MAX);
    exec.read_aux(1, "cat", SearchMode::GreaterOrEqual, &mut like).unwrap();
    let words: Vec<&str> = like.words().iter().map(|w| w.text.as_str()).collect();
    assert_eq!(words, vec!["cat", "catalog"]);

    let mut after = PostingListReader::new(MatchMode::Ordered(SearchMode::Greater), usize::MAX);
    exec.read_aux(1, "cat", SearchMode::Greater, &mut after).unwrap();
    let words: Vec<&str> = after.words().iter().map(|w| w.text.as_str()).collect();
    assert_eq!(words, vec!["catalog", "dog"]);
}

#[test]
fn test_posting_reader_memory_bound() {
    let db = setup();
    let mut exec = executor(&db);
    for n in 0..50_u64 {
        exec.insert_aux_record(3, &posting(&format!("word{n:02}"), n, n, 1)).unwrap();
    }

    let limit = 1_000;
    let mut reader = PostingListReader::new(MatchMode::Equal, limit);
    exec.read_aux_all(3, &mut reader).unwrap();
    assert!(reader.words().len() < 50);
    assert!(reader.total_memory() >= limit);
    assert!(reader.total_memory() <= limit + reader.last_record_size());
}

#[test]
fn test_common_insert_read_delete_all() {
    let db = setup();
    let mut exec = executor(&db);
    for doc_id in [9, 3, 7] {
        exec.insert_common_record(CommonTable::Deleted, doc_id).unwrap();
    }
    exec.insert_common_record(CommonTable::BeingDeleted, 3).unwrap();

    let mut reader = CommonTableReader::new();
    exec.read_all_common(CommonTable::Deleted, &mut reader).unwrap();
    assert_eq!(reader.doc_ids(), &[3, 7, 9]);

    exec.delete_common_record(CommonTable::Deleted, 7).unwrap();
    assert!(matches!(
        exec.delete_common_record(CommonTable::Deleted, 7),
        Err(DatabaseError::RecordNotFound)
    ));

    exec.delete_all_common_records(CommonTable::Deleted).unwrap();
    let mut reader = CommonTableReader::new();
    exec.read_all_common(CommonTable::Deleted, &mut reader).unwrap();
    assert!(reader.doc_ids().is_empty());

    // Other common tables are untouched
    let mut reader = CommonTableReader::new();
    exec.read_all_common(CommonTable::BeingDeleted, &mut reader).unwrap();
    assert_eq!(reader.doc_ids(), &[3]);
}

#[test]
fn test_common_table_by_name() {
    let db = setup();
    let mut exec = executor(&db);
    let table = CommonTable::from_name("deleted_cache").unwrap();
    exec.insert_common_record(table, 11).unwrap();
    let mut reader = CommonTableReader::new();
    exec.read_all_common(table, &mut reader).unwrap();
    assert_eq!(reader.doc_ids(), &[11]);
}

#[test]
fn test_layout_mismatch_is_structural() {
    let db = setup();
    let mut exec = executor(&db);
    // CONFIG has four fields, not the three of a doc-id table
    assert!(matches!(
        exec.insert_common_record(CommonTable::Config, 5),
        Err(DatabaseError::StructuralMismatch(_))
    ));
}

#[test]
fn test_invalid_aux_index() {
    let db = setup();
    let mut exec = executor(&db);
    assert!(matches!(
        exec.insert_aux_record(6, &posting("cat", 1, 1, 1)),
        Err(DatabaseError::InvalidAuxIndex(6))
    ));
    let mut reader = PostingListReader::new(MatchMode::Equal, usize::MAX);
    assert!(matches!(exec.read_aux_all(9, &mut reader), Err(DatabaseError::InvalidAuxIndex(9))));
}

#[test]
fn test_unknown_table_family() {
    let db = setup();
    let mut exec = FTSQueryExecutor::new(&db, db.begin(), 0x99, Some(INDEX_ID));
    assert!(matches!(exec.insert_config_record("k", "v"), Err(DatabaseError::TableNotFound(_))));
    assert!(matches!(
        exec.insert_aux_record(0, &posting("cat", 1, 1, 1)),
        Err(DatabaseError::TableNotFound(_))
    ));
}

#[test]
fn test_table_handles_cached_until_drop() {
    let db = setup();
    let probe = db.open_table(&common_table_name(TABLE_ID, CommonTable::Deleted)).unwrap();
    assert_eq!(probe.n_ref(), 1);

    let mut exec = executor(&db);
    exec.insert_common_record(CommonTable::Deleted, 1).unwrap();
    exec.insert_common_record(CommonTable::Deleted, 2).unwrap();
    assert_eq!(probe.n_ref(), 2);

    drop(exec);
    assert_eq!(probe.n_ref(), 1);
}

#[test]
fn test_rollback_discards_fts_writes() {
    let db = setup();
    let trx = db.begin();
    let mut exec = FTSQueryExecutor::new(&db, trx.clone(), TABLE_ID, Some(INDEX_ID));
    exec.insert_aux_record(4, &posting("ghost", 1, 1, 1)).unwrap();
    exec.update_config_record("synced_doc_id", "99").unwrap();
    drop(exec);
    db.rollback(&trx).unwrap();

    let mut exec = executor(&db);
    let mut reader = PostingListReader::new(MatchMode::Equal, usize::MAX);
    assert!(matches!(
        exec.read_aux(4, "ghost", SearchMode::GreaterOrEqual, &mut reader),
        Err(DatabaseError::RecordNotFound)
    ));
    assert_eq!(config_value(&mut exec, "synced_doc_id").as_deref(), Some("0"));
}
