use thiserror::Error;

#[derive(Error, Debug)]
pub enum TinyError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("data corruption: {0}")]
    Corruption(String),

    #[error("unsupported on-disk format version {found} (supported: {supported})")]
    Version { found: u8, supported: u8 },

    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    #[error("duplicate name: {0}")]
    DuplicateName(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("database is busy: {0}")]
    Busy(String),

    #[error("transaction error: {0}")]
    Transaction(String),
}

pub type Result<T> = std::result::Result<T, TinyError>;
