mod batch;
mod cli;
mod config;
mod driver;
mod enumerator;
mod error;
mod progress_store;
mod reporter;
mod signals;
mod sql;
mod store;

use cli::{Cli, Outcome};
use config::LoggingConfig;
use error::ColMigrateError;
use flexi_logger::{Cleanup, Criterion, Duplicate, FileSpec, Logger, LoggerHandle, Naming};
use log::{debug, error};

fn main() {
    let (cli, config) = match Cli::load() {
        Ok(loaded) => loaded,
        Err(err) => {
            eprintln!("{}", err);
            std::process::exit(1);
        }
    };

    // The handle must stay alive for the duration of the process
    let _logger = match setup_logging(&config.logging) {
        Ok(handle) => handle,
        Err(err) => {
            eprintln!("{}", err);
            std::process::exit(1);
        }
    };
    debug!("Command-line args: {:?}", std::env::args_os().collect::<Vec<_>>());

    match cli.handle_command(&config) {
        Ok(Outcome::Completed) => {}
        Ok(Outcome::Interrupted) => {
            println!("Exiting...");
        }
        Err(err) => {
            error!("{:?}", err);
            eprintln!("{}", err);
            std::process::exit(1);
        }
    }
}

/// Starts flexi_logger. RUST_LOG, when set, takes precedence over the configured level.
fn setup_logging(logging: &LoggingConfig) -> Result<LoggerHandle, ColMigrateError> {
    let spec = format!("warn, colmigrate={}", logging.level);
    let logger = Logger::try_with_env_or_str(spec)?;

    let logger = match logging.log_directory().filter(|_| logging.to_file) {
        Some(dir) => logger
            .log_to_file(FileSpec::default().directory(dir).basename("colmigrate"))
            .rotate(
                Criterion::Size(10 * 1024 * 1024),
                Naming::Timestamps,
                Cleanup::KeepLogFiles(7),
            )
            .duplicate_to_stderr(Duplicate::Warn),
        None => logger.log_to_stderr(),
    };

    Ok(logger.format(flexi_logger::detailed_format).start()?)
}
