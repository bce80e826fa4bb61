use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::ColMigrateError;
use crate::sql::quote_ident;

/// Prefix for environment overrides, e.g. `COLMIGRATE_MIGRATION__BATCH_SIZE=100`
const ENV_PREFIX: &str = "COLMIGRATE_";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Sqlite,
    Postgres,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    pub backend: Backend,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Database name; for the sqlite backend this is the database file path
    pub dbname: String,
    /// true means "require", false means "disable"
    pub sslmode: bool,
}

impl ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            backend: Backend::Sqlite,
            host: "127.0.0.1".to_owned(),
            port: 5432,
            user: "userGoesHere".to_owned(),
            password: "passwordGoesHere".to_owned(),
            dbname: "dbNameGoesHere".to_owned(),
            sslmode: false,
        }
    }

    /// Connection description with the password masked
    pub fn describe(&self) -> String {
        match self.backend {
            Backend::Sqlite => format!("sqlite database={}", self.dbname),
            Backend::Postgres => format!(
                "host={} port={} user={} password=******** dbname={} sslmode={}",
                self.host,
                self.port,
                self.user,
                self.dbname,
                if self.sslmode { "require" } else { "disable" }
            ),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MigrationConfig {
    pub table: String,
    pub id_column: String,
    /// Column to get the value from
    pub source_column: String,
    /// Column to set (and overwrite) the value of
    pub destination_column: String,
    /// Type of the destination column, like `BOOLEAN DEFAULT FALSE NOT NULL`.
    /// When set, the column is added before scanning if it is missing.
    pub new_column_type: Option<String>,
    /// Number of update statements committed together
    pub batch_size: usize,
    pub flush_trailing_partial_batch: bool,
    /// Migrate every row instead of only rows where source and destination differ
    pub all_rows: bool,
    pub progress_file: PathBuf,
}

impl MigrationConfig {
    const DEFAULT_PROGRESS_FILE: &str = "progress.txt";

    fn default() -> Self {
        MigrationConfig {
            table: "tableNameGoesHere".to_owned(),
            id_column: "id".to_owned(),
            source_column: "sourceFieldGoesHere".to_owned(),
            destination_column: "destinationFieldGoesHere".to_owned(),
            new_column_type: None,
            batch_size: 1,
            flush_trailing_partial_batch: true,
            all_rows: false,
            progress_file: PathBuf::from(Self::DEFAULT_PROGRESS_FILE),
        }
    }

    fn validate(&mut self) -> Result<(), ColMigrateError> {
        for name in [
            &self.table,
            &self.id_column,
            &self.source_column,
            &self.destination_column,
        ] {
            quote_ident(name)?;
        }

        if self.source_column == self.destination_column {
            return Err(ColMigrateError::ConfigError(format!(
                "source and destination columns are both '{}'",
                self.source_column
            )));
        }

        if self.batch_size == 0 {
            return Err(ColMigrateError::ConfigError(
                "batch size must be at least 1".into(),
            ));
        }

        if self.progress_file.as_os_str().is_empty() {
            return Err(ColMigrateError::ConfigError(
                "progress file path is empty".into(),
            ));
        }

        // An empty type definition means "no schema evolution"
        if let Some(type_def) = &self.new_column_type {
            let trimmed = type_def.trim();
            self.new_column_type = if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_owned())
            };
        }

        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    pub level: String,
    pub to_file: bool,
    pub directory: Option<PathBuf>,
}

impl LoggingConfig {
    const LOG_LEVELS: [&str; 6] = ["off", "error", "warn", "info", "debug", "trace"];
    const DEFAULT_LEVEL: &str = "info";

    fn default() -> Self {
        LoggingConfig {
            level: Self::DEFAULT_LEVEL.to_string(),
            to_file: true,
            directory: None,
        }
    }

    fn ensure_valid(&mut self) {
        // An invalid level is not fatal: inform the user and use the default
        let str_original = self.level.clone();
        self.level = self.level.trim().to_ascii_lowercase();
        if !Self::LOG_LEVELS.contains(&self.level.as_str()) {
            eprintln!(
                "Config error: log level of '{}' is invalid - using default of '{}'",
                str_original,
                Self::DEFAULT_LEVEL
            );
            self.level = Self::DEFAULT_LEVEL.to_owned();
        }
    }

    /// Directory for log files: the configured one, else `<data dir>/logs`
    pub fn log_directory(&self) -> Option<PathBuf> {
        self.directory.clone().or_else(|| {
            ProjectDirs::from("", "", "colmigrate")
                .map(|dirs| dirs.data_local_dir().join("logs"))
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub migration: MigrationConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn default() -> Self {
        Config {
            connection: ConnectionConfig::default(),
            migration: MigrationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Default config file: `config.toml` in the platform config directory
    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "colmigrate").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Builds the effective configuration.
    ///
    /// Layers, lowest to highest precedence: built-in defaults, the TOML file
    /// (`config_path`, or the default path if it exists), `COLMIGRATE_`
    /// environment variables (nested keys split on `__`), then `overrides`
    /// from the command line.
    pub fn load<T: Serialize>(
        config_path: Option<&Path>,
        overrides: &T,
    ) -> Result<Self, ColMigrateError> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));

        match config_path {
            Some(path) => {
                if !path.is_file() {
                    return Err(ColMigrateError::ConfigError(format!(
                        "config file {} does not exist",
                        path.display()
                    )));
                }
                figment = figment.merge(Toml::file(path));
            }
            None => {
                if let Some(path) = Self::default_config_path().filter(|p| p.is_file()) {
                    debug!("Using config file {}", path.display());
                    figment = figment.merge(Toml::file(path));
                }
            }
        }

        let figment = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(Serialized::defaults(overrides));

        let mut config: Config = figment
            .extract()
            .map_err(|e| ColMigrateError::ConfigError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&mut self) -> Result<(), ColMigrateError> {
        self.logging.ensure_valid();
        self.migration.validate()
    }

    /// The configuration as TOML, password masked
    pub fn to_display_toml(&self) -> Result<String, ColMigrateError> {
        let mut shown = self.clone();
        shown.connection.password = "********".to_owned();
        toml::to_string_pretty(&shown)
            .map_err(|e| ColMigrateError::ConfigError(format!("Failed to serialize config: {}", e)))
    }
}
