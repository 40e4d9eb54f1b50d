use serde::{Deserialize, Serialize};
use super::value::Value;

/// Stored length of `DB_TRX_ID`
pub const DATA_TRX_ID_LEN: usize = 6;
/// Stored length of `DB_ROLL_PTR`
pub const DATA_ROLL_PTR_LEN: usize = 7;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DataType {
    // Integer types
    Unsigned,     // 4-byte unsigned
    BigUnsigned,  // 8-byte unsigned
    // Variable-length types
    Varchar { max_len: usize },    // VARCHAR(n), length in bytes
    Varbinary { max_len: usize },  // VARBINARY(n)
    // Hidden system columns of a clustered index
    TrxId,
    RollPtr,
}

impl DataType {
    /// Byte size a value occupies in a record, `None` for SQL NULL
    #[must_use]
    pub fn stored_len(&self, value: &Value) -> Option<usize> {
        match value {
            Value::Null => None,
            _ => Some(match self {
                Self::Unsigned => 4,
                Self::BigUnsigned => 8,
                Self::TrxId => DATA_TRX_ID_LEN,
                Self::RollPtr => DATA_ROLL_PTR_LEN,
                Self::Varchar { .. } | Self::Varbinary { .. } => {
                    value.as_bytes().map_or(0, <[u8]>::len)
                }
            }),
        }
    }

    /// Can a value of this shape be stored in a field of this type?
    #[must_use]
    pub const fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (Self::Unsigned, Value::U32(_))
                | (Self::BigUnsigned | Self::TrxId | Self::RollPtr, Value::U64(_))
                | (Self::Varchar { .. }, Value::Text(_))
                | (Self::Varbinary { .. }, Value::Bytes(_))
        )
    }

    /// Declared maximum length of a variable-length type
    #[must_use]
    pub const fn max_len(&self) -> Option<usize> {
        match self {
            Self::Varchar { max_len } | Self::Varbinary { max_len } => Some(*max_len),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_system(&self) -> bool {
        matches!(self, Self::TrxId | Self::RollPtr)
    }
}

/// Collation used to order and compare character fields
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Collation {
    /// Byte-wise comparison
    #[default]
    Binary,
    /// Case-insensitive, trailing spaces ignored (PAD SPACE)
    Utf8GeneralCi,
}

impl Collation {
    /// Sort weight of a string
    #[must_use]
    pub fn weight(&self, s: &str) -> Vec<u8> {
        match self {
            Self::Binary => s.as_bytes().to_vec(),
            Self::Utf8GeneralCi => s.trim_end_matches(' ').to_lowercase().into_bytes(),
        }
    }

    #[must_use]
    pub fn equals(&self, a: &str, b: &str) -> bool {
        self.weight(a) == self.weight(b)
    }

    /// `s LIKE 'prefix%'` under this collation
    #[must_use]
    pub fn starts_with(&self, s: &str, prefix: &str) -> bool {
        let prefix = match self {
            Self::Binary => prefix.as_bytes().to_vec(),
            // Trailing spaces of a LIKE pattern are significant
            Self::Utf8GeneralCi => prefix.to_lowercase().into_bytes(),
        };
        let weight = match self {
            Self::Binary => s.as_bytes().to_vec(),
            Self::Utf8GeneralCi => s.to_lowercase().into_bytes(),
        };
        weight.starts_with(&prefix)
    }
}
