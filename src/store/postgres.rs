//! PostgreSQL backend.
//!
//! Only compiled when the `postgres` feature is enabled.

use log::{debug, info};
use postgres::config::SslMode;
use postgres::{Client, Config, NoTls};

use crate::config::ConnectionConfig;
use crate::error::ColMigrateError;
use crate::progress_store::RowId;
use crate::sql::{Dialect, MigrationTarget};

use super::RelationalStore;

pub struct PostgresStore {
    client: Client,
}

impl PostgresStore {
    pub fn connect(config: &ConnectionConfig) -> Result<Self, ColMigrateError> {
        let mut pg_config = Config::new();
        pg_config
            .host(&config.host)
            .port(config.port)
            .user(&config.user)
            .password(config.password.as_str())
            .dbname(&config.dbname);

        let client = if config.sslmode {
            pg_config.ssl_mode(SslMode::Require);
            let connector = native_tls::TlsConnector::new()
                .map_err(|e| ColMigrateError::ConnectionError(e.to_string()))?;
            pg_config.connect(postgres_native_tls::MakeTlsConnector::new(connector))
        } else {
            pg_config.ssl_mode(SslMode::Disable);
            pg_config.connect(NoTls)
        }
        .map_err(|e| ColMigrateError::ConnectionError(e.to_string()))?;

        info!(
            "Connected to PostgreSQL at {}:{}/{}",
            config.host, config.port, config.dbname
        );
        Ok(Self { client })
    }
}

impl RelationalStore for PostgresStore {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn count(&mut self, sql: &str) -> Result<i64, ColMigrateError> {
        debug!("{}", sql);
        let row = self.client.query_one(sql, &[])?;
        Ok(row.try_get(0)?)
    }

    fn list_ids(&mut self, sql: &str) -> Result<Vec<RowId>, ColMigrateError> {
        debug!("{}", sql);
        self.client
            .query(sql, &[])?
            .iter()
            .map(|row| row.try_get::<_, RowId>(0).map_err(ColMigrateError::from))
            .collect()
    }

    fn execute_compound(&mut self, sql: &str) -> Result<(), ColMigrateError> {
        // A multi-statement simple query runs as one implicit transaction
        self.client.batch_execute(sql)?;
        Ok(())
    }

    fn add_column_if_absent(
        &mut self,
        target: &MigrationTarget,
        type_def: &str,
    ) -> Result<bool, ColMigrateError> {
        let (schema, table) = match target.table_name().split_once('.') {
            Some((schema, table)) => (Some(schema), table),
            None => (None, target.table_name()),
        };
        let existing: i64 = self
            .client
            .query_one(
                "SELECT COUNT(*) FROM information_schema.columns \
                 WHERE table_schema::text = COALESCE($1::text, current_schema()::text) \
                 AND table_name::text = $2::text AND column_name::text = $3::text",
                &[&schema, &table, &target.destination_name()],
            )?
            .try_get(0)?;
        if existing > 0 {
            return Ok(false);
        }

        let sql = target.add_column_sql(Dialect::Postgres, type_def);
        debug!("{}", sql);
        self.client.batch_execute(&sql)?;
        Ok(true)
    }
}
