pub mod connector;
pub mod db_pool;
pub mod schema;

use std::error::Error;
use std::fmt;

#[derive(Debug)]
pub enum DbError {
    /// The uploaded file could not be opened as a SQLite database
    InvalidDatabase(String),
    /// SQLite rejected or failed the statement; shown to the user verbatim
    Sql(String),
    Pool(String),
    Task(String),
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbError::InvalidDatabase(msg) => write!(f, "Not a valid SQLite database: {}", msg),
            DbError::Sql(msg) => write!(f, "{}", msg),
            DbError::Pool(msg) => write!(f, "Database connection error: {}", msg),
            DbError::Task(msg) => write!(f, "Database task failed: {}", msg),
        }
    }
}

impl Error for DbError {}

impl From<rusqlite::Error> for DbError {
    fn from(err: rusqlite::Error) -> Self {
        DbError::Sql(err.to_string())
    }
}

impl From<r2d2::Error> for DbError {
    fn from(err: r2d2::Error) -> Self {
        DbError::Pool(err.to_string())
    }
}

impl From<tokio::task::JoinError> for DbError {
    fn from(err: tokio::task::JoinError) -> Self {
        DbError::Task(err.to_string())
    }
}

/// Quotes an identifier for interpolation into PRAGMA / SELECT text.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
