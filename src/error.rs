use rusqlite::Error as RusqliteError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ColMigrateError {
    #[error("Error connecting to the database: {0}")]
    ConnectionError(String),

    #[error("Error getting the total number of rows: {0}")]
    CountError(String),

    #[error("Error fetching all ID numbers: {0}")]
    EnumerationError(String),

    #[error("Line {line} in {} does not appear to be a number: {content}", path.display())]
    CorruptProgressRecord {
        path: PathBuf,
        line: usize,
        content: String,
    },

    #[error("Error creating column: {0}")]
    SchemaEvolutionError(String),

    #[error("Error updating the table: {0}")]
    CommitError(String),

    #[error("Progress file I/O error: {0}")]
    FileIOError(#[from] io::Error), // Converts io::Error into ColMigrateError automatically

    #[error("Database error: {0}")]
    DatabaseError(#[from] RusqliteError), // Converts rusqlite::Error automatically

    #[cfg(feature = "postgres")]
    #[error("PostgreSQL error: {0}")]
    PostgresError(#[from] postgres::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Logging error: {0}")]
    LoggingError(#[from] flexi_logger::FlexiLoggerError),

    #[error("Interrupted")]
    Interrupted,
}
