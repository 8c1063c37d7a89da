//! Crate-wide error taxonomy.
//!
//! One enum covers the whole store rather than one-per-module, because the
//! three core subsystems (pages, records, trie index) are tightly coupled
//! and a caller rarely cares which one failed, only which kind of failure
//! it was.

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("no index on attribute '{0}'")]
    NoIndex(String),

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corruption: {0}")]
    Corruption(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Corruption(format!("descriptor: {e}"))
    }
}
