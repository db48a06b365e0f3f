use thiserror::Error;

/// Errors raised while parsing the virtual table's DDL or servicing a query,
/// before they cross into `rusqlite`'s `Result<()>` ABI boundary.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("httpvtab schema error: {0}")]
    Schema(String),

    #[error("httpvtab: {0}")]
    Fetch(#[from] httpvtab_core::Error),

    #[error("httpvtab: malformed row document: {0}")]
    Row(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for rusqlite::Error {
    fn from(err: Error) -> Self {
        rusqlite::Error::ModuleError(err.to_string())
    }
}
