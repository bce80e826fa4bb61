use std::path::Path;

use log::{debug, info};
use rusqlite::{Connection, OpenFlags};

use crate::error::ColMigrateError;
use crate::progress_store::RowId;
use crate::sql::{Dialect, MigrationTarget};

use super::RelationalStore;

/// SQLite backend. `dbname` is the path of an existing database file.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(db_path: &str) -> Result<Self, ColMigrateError> {
        let path = Path::new(db_path);

        // Refuse to silently create an empty database for a mistyped path
        if !path.is_file() {
            return Err(ColMigrateError::ConnectionError(format!(
                "Database file '{}' does not exist or is not a file",
                db_path
            )));
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| ColMigrateError::ConnectionError(e.to_string()))?;

        // Reading the schema forces SQLite to validate the file header
        conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
            row.get::<_, i64>(0)
        })
        .map_err(|e| ColMigrateError::ConnectionError(e.to_string()))?;

        info!("Database opened at: {}", path.display());
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    #[cfg(test)]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl RelationalStore for SqliteStore {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn count(&mut self, sql: &str) -> Result<i64, ColMigrateError> {
        debug!("{}", sql);
        let total = self.conn.query_row(sql, [], |row| row.get(0))?;
        Ok(total)
    }

    fn list_ids(&mut self, sql: &str) -> Result<Vec<RowId>, ColMigrateError> {
        debug!("{}", sql);
        let mut stmt = self.conn.prepare(sql)?;
        let ids = stmt
            .query_map([], |row| row.get::<_, RowId>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn execute_compound(&mut self, sql: &str) -> Result<(), ColMigrateError> {
        // Dropping an uncommitted transaction rolls it back
        let tx = self.conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.commit()?;
        Ok(())
    }

    fn add_column_if_absent(
        &mut self,
        target: &MigrationTarget,
        type_def: &str,
    ) -> Result<bool, ColMigrateError> {
        let (schema, table) = match target.table_name().split_once('.') {
            Some((schema, table)) => (schema, table),
            None => ("main", target.table_name()),
        };
        let existing: i64 = self.conn.query_row(
            "SELECT count(*) FROM pragma_table_info(?1, ?2) WHERE name = ?3 COLLATE NOCASE",
            [table, schema, target.destination_name()],
            |row| row.get(0),
        )?;

        if existing > 0 {
            debug!(
                "Column {} already exists in {}",
                target.destination_name(),
                target.table_name()
            );
            return Ok(false);
        }

        let sql = target.add_column_sql(Dialect::Sqlite, type_def);
        debug!("{}", sql);
        self.conn.execute_batch(&sql)?;
        Ok(true)
    }
}
