use crate::config::MigrationConfig;
use crate::error::ColMigrateError;
use crate::progress_store::RowId;

/// SQL flavour used for the null-safe inequality and column-add statements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    #[cfg_attr(not(feature = "postgres"), allow(dead_code))]
    Postgres,
}

/// Which rows are candidates for migration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    /// Rows whose source and destination values differ (NULL-aware)
    Differing,
    /// Every row in the table
    All,
}

/// Validated, pre-quoted names of the table and columns being migrated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationTarget {
    table_name: String,
    destination_name: String,
    table: String,
    id_column: String,
    source_column: String,
    destination_column: String,
    predicate: Predicate,
}

impl MigrationTarget {
    pub fn new(
        table: &str,
        id_column: &str,
        source_column: &str,
        destination_column: &str,
        predicate: Predicate,
    ) -> Result<Self, ColMigrateError> {
        Ok(Self {
            table_name: table.to_ascii_lowercase(),
            destination_name: destination_column.to_ascii_lowercase(),
            table: quote_ident(table)?,
            id_column: quote_ident(id_column)?,
            source_column: quote_ident(source_column)?,
            destination_column: quote_ident(destination_column)?,
            predicate,
        })
    }

    pub fn from_config(config: &MigrationConfig) -> Result<Self, ColMigrateError> {
        let predicate = if config.all_rows {
            Predicate::All
        } else {
            Predicate::Differing
        };
        Self::new(
            &config.table,
            &config.id_column,
            &config.source_column,
            &config.destination_column,
            predicate,
        )
    }

    fn where_clause(&self, dialect: Dialect) -> String {
        match (self.predicate, dialect) {
            (Predicate::All, _) => String::new(),
            (Predicate::Differing, Dialect::Sqlite) => format!(
                " WHERE {} IS NOT {}",
                self.source_column, self.destination_column
            ),
            (Predicate::Differing, Dialect::Postgres) => format!(
                " WHERE {} IS DISTINCT FROM {}",
                self.source_column, self.destination_column
            ),
        }
    }

    pub fn count_sql(&self, dialect: Dialect) -> String {
        format!(
            "SELECT COUNT(*) FROM {}{}",
            self.table,
            self.where_clause(dialect)
        )
    }

    pub fn list_sql(&self, dialect: Dialect) -> String {
        format!(
            "SELECT CAST({} AS BIGINT) FROM {}{}",
            self.id_column,
            self.table,
            self.where_clause(dialect)
        )
    }

    /// Single-row update; setting destination = source again is idempotent
    pub fn update_sql(&self, id: RowId) -> String {
        format!(
            "UPDATE {} SET {} = {} WHERE {} = {};",
            self.table, self.destination_column, self.source_column, self.id_column, id
        )
    }

    /// `ALTER TABLE .. ADD COLUMN` for the destination column
    pub fn add_column_sql(&self, dialect: Dialect, type_def: &str) -> String {
        let if_not_exists = match dialect {
            Dialect::Sqlite => "",
            Dialect::Postgres => "IF NOT EXISTS ",
        };
        format!(
            "ALTER TABLE {} ADD COLUMN {}{} {}",
            self.table, if_not_exists, self.destination_column, type_def
        )
    }

    /// Unquoted, case-folded table name
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Unquoted, case-folded destination column name
    pub fn destination_name(&self) -> &str {
        &self.destination_name
    }
}

/// Accepts `[A-Za-z_][A-Za-z0-9_]*`, optionally schema-qualified with one dot,
/// and returns the name folded to lower case and double-quoted. Folding keeps
/// the case-insensitive matching of unquoted names on PostgreSQL.
pub fn quote_ident(name: &str) -> Result<String, ColMigrateError> {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 2 {
        return Err(ColMigrateError::ConfigError(format!(
            "'{}' is not a valid SQL identifier",
            name
        )));
    }

    let mut quoted = Vec::with_capacity(parts.len());
    for part in parts {
        if !is_plain_ident(part) {
            return Err(ColMigrateError::ConfigError(format!(
                "'{}' is not a valid SQL identifier",
                name
            )));
        }
        quoted.push(format!("\"{}\"", part.to_ascii_lowercase()));
    }

    Ok(quoted.join("."))
}

fn is_plain_ident(part: &str) -> bool {
    let mut chars = part.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
