use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use log::info;
use serde::Serialize;

use crate::config::{Backend, Config};
use crate::driver::Driver;
use crate::error::ColMigrateError;
use crate::reporter::ConsoleReporter;
use crate::signals::{install_signal_listener, InterruptToken};

#[derive(Parser)]
#[command(
    name = "colmigrate",
    version,
    about = "colmigrate: resumable, batched copy of one table column into another"
)]
pub struct Cli {
    /// Path to a TOML config file (default: config.toml in the platform config directory)
    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Subcommand)]
pub enum Command {
    /// Copy the source column into the destination column (default if no command specified)
    Run(RunArgs),

    /// Print the effective configuration and exit
    ShowConfig(RunArgs),
}

/// Flags that override configuration values. Unset flags leave the
/// configured value in place.
#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// Store backend
    #[arg(long = "backend", value_enum)]
    pub backend: Option<BackendArg>,

    /// Database host
    #[arg(long = "host")]
    pub host: Option<String>,

    /// Database port
    #[arg(long = "port")]
    pub port: Option<u16>,

    /// Database user
    #[arg(long = "user")]
    pub user: Option<String>,

    /// Database password
    #[arg(long = "password")]
    pub password: Option<String>,

    /// Database name (for sqlite: path to the database file)
    #[arg(long = "dbname")]
    pub dbname: Option<String>,

    /// Require a secure connection ("require" instead of "disable")
    #[arg(long = "sslmode", num_args = 0..=1, default_missing_value = "true")]
    pub sslmode: Option<bool>,

    /// Table name
    #[arg(long = "table")]
    pub table: Option<String>,

    /// ID column name
    #[arg(long = "id")]
    pub id: Option<String>,

    /// Table column to get the value from
    #[arg(long = "src")]
    pub src: Option<String>,

    /// Table column to set (and overwrite) the value of
    #[arg(long = "dst")]
    pub dst: Option<String>,

    /// Type of the new column, like "BOOLEAN DEFAULT FALSE NOT NULL"; adds the column if missing
    #[arg(long = "newcol")]
    pub newcol: Option<String>,

    /// Number of update statements committed together
    #[arg(long = "batch")]
    pub batch: Option<usize>,

    /// Leave a final batch smaller than --batch uncommitted
    #[arg(long = "no-trailing-flush", default_value_t = false)]
    pub no_trailing_flush: bool,

    /// Migrate every row, not only rows where source and destination differ
    #[arg(long = "all-rows", default_value_t = false)]
    pub all_rows: bool,

    /// File recording processed row IDs
    #[arg(long = "progress-file")]
    pub progress_file: Option<PathBuf>,

    /// Only print the banner and summary, not one line per row
    #[arg(long = "quiet", short = 'q', default_value_t = false)]
    pub quiet: bool,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendArg {
    Sqlite,
    Postgres,
}

impl From<BackendArg> for Backend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Sqlite => Backend::Sqlite,
            BackendArg::Postgres => Backend::Postgres,
        }
    }
}

/// Config-shaped view of the flags that were actually given
#[derive(Serialize, Default)]
struct Overrides {
    connection: ConnectionOverrides,
    migration: MigrationOverrides,
}

#[derive(Serialize, Default)]
struct ConnectionOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    backend: Option<Backend>,
    #[serde(skip_serializing_if = "Option::is_none")]
    host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dbname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sslmode: Option<bool>,
}

#[derive(Serialize, Default)]
struct MigrationOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    table: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id_column: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_column: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    destination_column: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    new_column_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    batch_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    flush_trailing_partial_batch: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    all_rows: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    progress_file: Option<PathBuf>,
}

impl RunArgs {
    /// Fills flags unset here from `outer`, the flags given before the subcommand
    fn or(&self, outer: &RunArgs) -> RunArgs {
        RunArgs {
            backend: self.backend.or(outer.backend),
            host: self.host.clone().or_else(|| outer.host.clone()),
            port: self.port.or(outer.port),
            user: self.user.clone().or_else(|| outer.user.clone()),
            password: self.password.clone().or_else(|| outer.password.clone()),
            dbname: self.dbname.clone().or_else(|| outer.dbname.clone()),
            sslmode: self.sslmode.or(outer.sslmode),
            table: self.table.clone().or_else(|| outer.table.clone()),
            id: self.id.clone().or_else(|| outer.id.clone()),
            src: self.src.clone().or_else(|| outer.src.clone()),
            dst: self.dst.clone().or_else(|| outer.dst.clone()),
            newcol: self.newcol.clone().or_else(|| outer.newcol.clone()),
            batch: self.batch.or(outer.batch),
            no_trailing_flush: self.no_trailing_flush || outer.no_trailing_flush,
            all_rows: self.all_rows || outer.all_rows,
            progress_file: self
                .progress_file
                .clone()
                .or_else(|| outer.progress_file.clone()),
            quiet: self.quiet || outer.quiet,
        }
    }

    fn overrides(&self) -> Overrides {
        Overrides {
            connection: ConnectionOverrides {
                backend: self.backend.map(Backend::from),
                host: self.host.clone(),
                port: self.port,
                user: self.user.clone(),
                password: self.password.clone(),
                dbname: self.dbname.clone(),
                sslmode: self.sslmode,
            },
            migration: MigrationOverrides {
                table: self.table.clone(),
                id_column: self.id.clone(),
                source_column: self.src.clone(),
                destination_column: self.dst.clone(),
                new_column_type: self.newcol.clone(),
                batch_size: self.batch,
                // Boolean switches only ever turn behavior on, so absence is not an override
                flush_trailing_partial_batch: self.no_trailing_flush.then_some(false),
                all_rows: self.all_rows.then_some(true),
                progress_file: self.progress_file.clone(),
            },
        }
    }
}

/// What `main` should do after the command completed
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Interrupted,
}

impl Cli {
    /// Parses arguments and loads the configuration, without running anything
    pub fn load() -> Result<(Cli, Config), ColMigrateError> {
        let cli = Cli::parse();
        let config = cli.resolve_config()?;
        Ok((cli, config))
    }

    /// Flags of the subcommand, falling back to flags given before it
    fn active_args(&self) -> RunArgs {
        match &self.command {
            Some(Command::Run(args)) | Some(Command::ShowConfig(args)) => args.or(&self.run),
            None => self.run.clone(),
        }
    }

    pub fn resolve_config(&self) -> Result<Config, ColMigrateError> {
        Config::load(self.config.as_deref(), &self.active_args().overrides())
    }

    pub fn handle_command(&self, config: &Config) -> Result<Outcome, ColMigrateError> {
        match &self.command {
            Some(Command::ShowConfig(_)) => {
                print!("{}", config.to_display_toml()?);
                Ok(Outcome::Completed)
            }
            Some(Command::Run(_)) | None => Self::run_migration(config, self.active_args().quiet),
        }
    }

    fn run_migration(config: &Config, quiet: bool) -> Result<Outcome, ColMigrateError> {
        let interrupt = InterruptToken::new();
        install_signal_listener(interrupt.clone())?;

        let mut driver = Driver::new(config, interrupt, ConsoleReporter::new(quiet));
        match driver.run() {
            Ok(summary) => {
                info!(
                    "Run started {} completed in {}s: {}/{} candidates enumerated, {} rows updated in {} commits, {} skipped, {} left pending{}",
                    summary.started_at.format("%Y-%m-%d %H:%M:%S"),
                    summary.elapsed.num_seconds(),
                    summary.enumerated,
                    summary.total_candidates,
                    summary.modified,
                    summary.commits,
                    summary.skipped,
                    summary.left_pending,
                    if summary.column_added { ", destination column added" } else { "" }
                );
                Ok(Outcome::Completed)
            }
            Err(ColMigrateError::Interrupted) => {
                info!("Stopped during {}", driver.state());
                Ok(Outcome::Interrupted)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use figment::Jail;
    use pretty_assertions::assert_eq;
    use serial_test::serial;
    use std::path::Path;

    #[test]
    fn test_cli_parsing_no_command_defaults_to_run() {
        let result = Cli::try_parse_from(["colmigrate", "--table", "trades", "--batch", "10"]);
        assert!(result.is_ok(), "Should accept flags without a command");

        let cli = result.unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.active_args().table.as_deref(), Some("trades"));
        assert_eq!(cli.active_args().batch, Some(10));
    }

    #[test]
    fn test_cli_parsing_explicit_run_command() {
        let cli = Cli::try_parse_from(["colmigrate", "run", "--src", "a", "--dst", "b", "-q"])
            .unwrap();
        assert!(matches!(cli.command, Some(Command::Run(_))));
        assert_eq!(cli.active_args().src.as_deref(), Some("a"));
        assert!(cli.active_args().quiet);
    }

    #[test]
    fn test_flags_before_subcommand_are_kept() {
        let cli = Cli::try_parse_from([
            "colmigrate", "--table", "outer", "--batch", "7", "run", "--batch", "9", "--all-rows",
        ])
        .unwrap();
        let args = cli.active_args();

        assert_eq!(args.table.as_deref(), Some("outer"));
        assert_eq!(args.batch, Some(9));
        assert!(args.all_rows);
    }

    #[test]
    fn test_cli_parsing_invalid_arguments() {
        let result = Cli::try_parse_from(["colmigrate", "nonexistent-command"]);
        assert!(result.is_err(), "Should reject unknown commands");

        let result = Cli::try_parse_from(["colmigrate", "run", "--batch", "many"]);
        assert!(result.is_err(), "Should reject a non-numeric batch size");

        let result = Cli::try_parse_from(["colmigrate", "--backend", "oracle"]);
        assert!(result.is_err(), "Should reject unknown backends");
    }

    #[test]
    fn test_absent_flags_produce_no_overrides() {
        let args = RunArgs::default();
        let overrides = toml::to_string(&args.overrides()).unwrap();
        assert!(!overrides.contains('='), "unexpected overrides: {}", overrides);
    }

    #[test]
    #[serial]
    fn test_flags_override_config_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "c.toml",
                "[migration]\ntable = \"from_file\"\nbatch_size = 5\n",
            )?;
            let cli = Cli::try_parse_from([
                "colmigrate",
                "--config",
                "c.toml",
                "run",
                "--batch",
                "20",
                "--no-trailing-flush",
                "--backend",
                "postgres",
            ])
            .map_err(|e| figment::Error::from(e.to_string()))?;

            let config = cli
                .resolve_config()
                .map_err(|e| figment::Error::from(e.to_string()))?;

            assert_eq!(cli.config.as_deref(), Some(Path::new("c.toml")));
            assert_eq!(config.migration.table, "from_file");
            assert_eq!(config.migration.batch_size, 20);
            assert!(!config.migration.flush_trailing_partial_batch);
            assert!(!config.migration.all_rows);
            assert_eq!(config.connection.backend, Backend::Postgres);
            Ok(())
        });
    }
}
