use serde::{Deserialize, Serialize};
use super::data_type::Collation;

/// A single field value as stored in an index record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Value {
    Null,
    U32(u32),
    U64(u64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub const fn as_u64(&self) -> Option<u64> {
        match self {
            Self::U64(v) => Some(*v),
            Self::U32(v) => Some(*v as u64),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_u32(&self) -> Option<u32> {
        match self {
            Self::U32(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            Self::Text(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Sort weight of this value under the given collation
    #[must_use]
    pub fn key_part(&self, collation: Collation) -> KeyPart {
        match self {
            Self::Null => KeyPart::Null,
            Self::U32(v) => KeyPart::Int(u64::from(*v)),
            Self::U64(v) => KeyPart::Int(*v),
            Self::Text(s) => KeyPart::Bytes(collation.weight(s)),
            Self::Bytes(b) => KeyPart::Bytes(b.clone()),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::U32(v) => write!(f, "{v}"),
            Self::U64(v) => write!(f, "{v}"),
            Self::Text(s) => write!(f, "{s}"),
            Self::Bytes(b) => write!(f, "\\x{}", hex::encode(b)),
        }
    }
}

/// One component of an index sort key.
///
/// NULL sorts first, same as in the clustered index of the storage engine.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum KeyPart {
    Null,
    Int(u64),
    Bytes(Vec<u8>),
}

/// Ordered key of an index record (the first `n_uniq` fields)
pub type SortKey = Vec<KeyPart>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Null.to_string(), "NULL");
        assert_eq!(Value::U64(42).to_string(), "42");
        assert_eq!(Value::Text("cat".to_string()).to_string(), "cat");
        assert_eq!(Value::Bytes(vec![0xde, 0xad]).to_string(), "\\xdead");
    }

    #[test]
    fn test_key_part_ordering() {
        let null = Value::Null.key_part(Collation::Binary);
        let one = Value::U32(1).key_part(Collation::Binary);
        let two = Value::U64(2).key_part(Collation::Binary);
        assert!(null < one);
        assert!(one < two);

        let key_a: SortKey = vec![KeyPart::Bytes(b"cat".to_vec())];
        let key_b: SortKey = vec![KeyPart::Bytes(b"cat".to_vec()), KeyPart::Int(1)];
        // A prefix sorts before every key it is a prefix of
        assert!(key_a < key_b);
    }

    #[test]
    fn test_key_part_uses_collation() {
        let upper = Value::Text("CAT".to_string()).key_part(Collation::Utf8GeneralCi);
        let lower = Value::Text("cat".to_string()).key_part(Collation::Utf8GeneralCi);
        assert_eq!(upper, lower);

        let upper = Value::Text("CAT".to_string()).key_part(Collation::Binary);
        assert_ne!(upper, lower);
    }
}
