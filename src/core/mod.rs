// Module declarations
pub mod error;
pub mod value;
pub mod data_type;
pub mod record;
pub mod database;

// Re-exports for convenience
pub use error::DatabaseError;
pub use value::{KeyPart, SortKey, Value};
pub use data_type::{Collation, DataType, DATA_ROLL_PTR_LEN, DATA_TRX_ID_LEN};
pub use record::{Record, Tuple, Update, UpdateField};
pub use database::Database;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TableSchema;

    fn index() -> crate::catalog::IndexDef {
        TableSchema::new("t")
            .column("word", DataType::Varchar { max_len: 20 })
            .column("n", DataType::Unsigned)
            .column("blob", DataType::Varbinary { max_len: 100 })
            .primary_key(&["word", "n"])
            .build_indexes(1, || 1)
            .unwrap()
            .remove(0)
    }

    fn rec(word: &str, n: u32) -> Record {
        Record::new(vec![
            Value::Text(word.to_string()),
            Value::U32(n),
            Value::U64(4),
            Value::U64(9),
            Value::Bytes(vec![1, 2, 3]),
        ])
    }

    #[test]
    fn test_record_system_fields() {
        let index = index();
        let mut r = rec("cat", 1);
        assert_eq!(r.trx_id(&index), 4);
        assert_eq!(r.roll_ptr(&index), 9);
        r.set_system_fields(&index, 11, 12);
        assert_eq!(r.trx_id(&index), 11);
        assert_eq!(r.roll_ptr(&index), 12);
    }

    #[test]
    fn test_tuple_prefix_compare() {
        let index = index();
        let r = rec("cat", 5);
        let exact = Tuple::new(vec![Value::Text("cat".to_string()), Value::U32(5)]);
        assert_eq!(exact.compare_with_record(&r, &index), (std::cmp::Ordering::Equal, 2));

        let prefix = Tuple::new(vec![Value::Text("cat".to_string())]);
        assert!(prefix.matches(&r, &index));

        let before = Tuple::new(vec![Value::Text("bat".to_string())]);
        assert_eq!(before.compare_with_record(&r, &index), (std::cmp::Ordering::Less, 0));
    }

    #[test]
    fn test_update_keeps_size() {
        let index = index();
        let r = rec("cat", 1);
        assert!(Update::new().set(4, Value::Bytes(vec![9, 9, 9])).keeps_size(&r, &index));
        assert!(!Update::new().set(4, Value::Bytes(vec![9; 10])).keeps_size(&r, &index));
        assert!(Update::new().set(4, Value::Null).keeps_size(&r, &index));

        let mut r2 = r.clone();
        Update::new().set(4, Value::Bytes(vec![7])).apply_to(&mut r2);
        assert_eq!(r2.fields[4], Value::Bytes(vec![7]));
    }
}
