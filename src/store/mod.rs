mod sqlite;

#[cfg(feature = "postgres")]
mod postgres;

use log::info;

use crate::config::{Backend, ConnectionConfig};
use crate::error::ColMigrateError;
use crate::progress_store::RowId;
use crate::sql::{Dialect, MigrationTarget};

pub use sqlite::SqliteStore;

#[cfg(feature = "postgres")]
pub use self::postgres::PostgresStore;

/// The relational store a migration runs against.
///
/// Every call is a blocking request/response that may fail; callers decide
/// which pipeline step a failure belongs to.
pub trait RelationalStore {
    fn dialect(&self) -> Dialect;

    /// Scalar count query
    fn count(&mut self, sql: &str) -> Result<i64, ColMigrateError>;

    /// Single-column id listing query
    fn list_ids(&mut self, sql: &str) -> Result<Vec<RowId>, ColMigrateError>;

    /// Executes a semicolon-separated statement batch as one operation
    fn execute_compound(&mut self, sql: &str) -> Result<(), ColMigrateError>;

    /// Adds the destination column of `target` unless it already exists.
    /// Returns true if the column was created.
    fn add_column_if_absent(
        &mut self,
        target: &MigrationTarget,
        type_def: &str,
    ) -> Result<bool, ColMigrateError>;
}

/// Opens the backend named in `config`
pub fn connect(config: &ConnectionConfig) -> Result<Box<dyn RelationalStore>, ColMigrateError> {
    info!("Connecting: {}", config.describe());

    match config.backend {
        Backend::Sqlite => Ok(Box::new(SqliteStore::open(&config.dbname)?)),
        #[cfg(feature = "postgres")]
        Backend::Postgres => Ok(Box::new(PostgresStore::connect(config)?)),
        #[cfg(not(feature = "postgres"))]
        Backend::Postgres => Err(ColMigrateError::ConnectionError(
            "this build of colmigrate does not include the postgres backend (enable the 'postgres' feature)".into(),
        )),
    }
}
