use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    /// No matching row. A normal outcome of a lookup, not a failure.
    #[error("Record not found")]
    RecordNotFound,
    /// A lock request was queued. Resolved by `handle_wait` and never
    /// returned from a completed executor operation.
    #[error("Lock wait")]
    LockWait,
    #[error("Lock wait timeout exceeded")]
    LockWaitTimeout,
    #[error("Deadlock found when trying to get lock")]
    Deadlock,
    #[error("Structural mismatch: {0}")]
    StructuralMismatch(String),
    #[error("Record does not fit in its page")]
    Overflow,
    #[error("Record too big: {0}")]
    TooBigRecord(String),
    #[error("Duplicate entry for key in index '{0}'")]
    DuplicateKey(String),
    #[error("Table '{0}' not found")]
    TableNotFound(String),
    #[error("Table '{0}' already exists")]
    TableAlreadyExists(String),
    #[error("Auxiliary index {0} is out of range")]
    InvalidAuxIndex(u8),
    #[error("Unknown FTS common table '{0}'")]
    UnknownCommonTable(String),
    #[error("No positioned cursor to update")]
    NoCursor,
    #[error("Value too long for field '{field}': {len} exceeds {max}")]
    ValueTooLong { field: String, len: usize, max: usize },
    #[error("Type mismatch for field '{0}'")]
    TypeMismatch(String),
    #[error("Transaction {0} is not active")]
    TransactionNotActive(u64),
    #[error("Corruption: {0}")]
    Corruption(String),
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Binary Serialization error: {0}")]
    BinarySerialization(String),
}

impl DatabaseError {
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::RecordNotFound)
    }

    /// Errors raised by the lock manager (wait, timeout, deadlock victim)
    #[must_use]
    pub const fn is_lock_error(&self) -> bool {
        matches!(self, Self::LockWait | Self::LockWaitTimeout | Self::Deadlock)
    }
}

impl From<bincode::Error> for DatabaseError {
    fn from(e: bincode::Error) -> Self {
        Self::BinarySerialization(e.to_string())
    }
}
