use clap::Parser;
use comfy_table::{presets::UTF8_FULL, Cell, Table as ComfyTable};
use postgrust_fts::executor::{MatchMode, RecordCollector};
use postgrust_fts::fts::{
    create_aux_tables, create_common_tables, CommonTable, CommonTableReader, FTSQueryExecutor, FtsAuxData,
    PostingListReader, FTS_NUM_AUX_INDEX,
};
use postgrust_fts::storage::SearchMode;
use postgrust_fts::types::{Collation, Value};
use postgrust_fts::{Database, ExecutorConfig};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "fts_inspect")]
#[command(about = "Load FTS postings and config entries and print the auxiliary tables", long_about = None)]
struct Args {
    /// JSON file with postings, config entries and deleted doc ids
    input: PathBuf,

    /// Executor configuration file (TOML, YAML or JSON)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Only show postings of words starting with this prefix
    #[arg(short = 'w', long)]
    word: Option<String>,

    /// Table id used to name the FTS tables
    #[arg(long, default_value_t = 1)]
    table_id: u64,

    /// FTS index id used to name the posting tables
    #[arg(long, default_value_t = 1)]
    index_id: u64,
}

#[derive(Debug, Deserialize)]
struct PostingEntry {
    aux_index: u8,
    word: String,
    first_doc_id: u64,
    last_doc_id: u64,
    doc_count: u32,
    /// Hex-encoded posting bytes
    #[serde(default)]
    ilist: String,
}

#[derive(Debug, Default, Deserialize)]
struct Input {
    #[serde(default)]
    postings: Vec<PostingEntry>,
    #[serde(default)]
    config: BTreeMap<String, String>,
    #[serde(default)]
    deleted: Vec<u64>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => ExecutorConfig::from_file(path)?,
        None => ExecutorConfig::load()?,
    };
    config.validate()?;

    let input: Input = serde_json::from_reader(BufReader::new(File::open(&args.input)?))?;

    let db = Database::new(config);
    create_common_tables(&db, args.table_id)?;
    create_aux_tables(&db, args.table_id, args.index_id, Collation::Utf8GeneralCi)?;

    load(&db, &args, &input)?;
    print_tables(&db, &args)?;
    Ok(())
}

/// Write the input into the FTS tables in one committed transaction
fn load(db: &Database, args: &Args, input: &Input) -> Result<(), Box<dyn std::error::Error>> {
    let trx = db.begin();
    let result = (|| -> Result<(), Box<dyn std::error::Error>> {
        let mut exec = FTSQueryExecutor::new(db, trx.clone(), args.table_id, Some(args.index_id));
        for p in &input.postings {
            let data = FtsAuxData {
                word: p.word.clone(),
                first_doc_id: p.first_doc_id,
                last_doc_id: p.last_doc_id,
                doc_count: p.doc_count,
                ilist: hex::decode(&p.ilist)?,
            };
            exec.insert_aux_record(p.aux_index, &data)?;
        }
        for (key, value) in &input.config {
            exec.update_config_record(key, value)?;
        }
        for doc_id in &input.deleted {
            exec.insert_common_record(CommonTable::Deleted, *doc_id)?;
        }
        Ok(())
    })();
    match result {
        Ok(()) => db.commit(&trx)?,
        Err(e) => {
            db.rollback(&trx)?;
            return Err(e);
        }
    }
    Ok(())
}

fn print_tables(db: &Database, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let trx = db.begin();
    let mut exec = FTSQueryExecutor::new(db, trx.clone(), args.table_id, Some(args.index_id));
    let limit = db.config().fts_result_cache_limit;

    let mut postings = ComfyTable::new();
    postings.load_preset(UTF8_FULL);
    postings.set_header(vec!["aux", "word", "first_doc_id", "last_doc_id", "doc_count", "ilist"]);
    for aux_index in 0..FTS_NUM_AUX_INDEX as u8 {
        let mut reader = match &args.word {
            Some(_) => PostingListReader::new(MatchMode::Like, limit),
            None => PostingListReader::new(MatchMode::Ordered(SearchMode::GreaterOrEqual), limit),
        };
        let result = match &args.word {
            Some(prefix) => exec.read_aux(aux_index, prefix, SearchMode::GreaterOrEqual, &mut reader),
            None => exec.read_aux_all(aux_index, &mut reader),
        };
        match result {
            Ok(()) => {}
            Err(e) if e.is_not_found() => continue,
            Err(e) => return Err(e.into()),
        }
        for word in reader.words() {
            for node in &word.nodes {
                postings.add_row(vec![
                    Cell::new(aux_index + 1),
                    Cell::new(&word.text),
                    Cell::new(node.first_doc_id),
                    Cell::new(node.last_doc_id),
                    Cell::new(node.doc_count),
                    Cell::new(hex::encode(&node.ilist)),
                ]);
            }
        }
    }
    println!("Postings");
    println!("{postings}");

    let mut config = RecordCollector::new(MatchMode::Equal);
    exec.read_all_common(CommonTable::Config, &mut config)?;
    let mut config_table = ComfyTable::new();
    config_table.load_preset(UTF8_FULL);
    config_table.set_header(vec!["key", "value"]);
    for rec in &config.records {
        let text = |n: usize| rec.field(n).and_then(Value::as_text).unwrap_or_default().to_string();
        config_table.add_row(vec![Cell::new(text(0)), Cell::new(text(3))]);
    }
    println!("Config");
    println!("{config_table}");

    let mut deleted = CommonTableReader::new();
    exec.read_all_common(CommonTable::Deleted, &mut deleted)?;
    let ids: Vec<String> = deleted.doc_ids().iter().map(ToString::to_string).collect();
    println!("Deleted doc ids: [{}]", ids.join(", "));

    drop(exec);
    db.commit(&trx)?;
    Ok(())
}
