use std::io::{self, Write};

use crate::progress_store::RowId;

/// Console output for a migration run.
///
/// Purely observational: nothing here affects control flow. In quiet mode the
/// per-row lines are suppressed but the banner and summary are still printed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleReporter {
    quiet: bool,
    silent: bool,
}

impl ConsoleReporter {
    pub fn new(quiet: bool) -> Self {
        Self {
            quiet,
            silent: false,
        }
    }

    /// Prints nothing at all
    #[cfg(test)]
    pub fn silent() -> Self {
        Self {
            quiet: true,
            silent: true,
        }
    }

    pub fn percentage(position: u64, total: i64) -> f64 {
        if total <= 0 {
            return 100.0;
        }
        (position as f64 / total as f64) * 100.0
    }

    pub fn progress_prefix(position: u64, total: i64) -> String {
        format!(
            "[{:6.1}% ({}/{})] ",
            Self::percentage(position, total),
            position,
            total
        )
    }

    pub fn banner(&self, line: &str) {
        if !self.silent {
            println!("{}", line);
        }
    }

    pub fn queued(&self, position: u64, total: i64, id: RowId) {
        if !self.quiet {
            println!("{}Queued {}", Self::progress_prefix(position, total), id);
        }
    }

    pub fn skipped(&self, position: u64, total: i64, id: RowId) {
        if !self.quiet {
            println!(
                "{}Already processed ID {}, skipping.",
                Self::progress_prefix(position, total),
                id
            );
        }
    }

    /// Printed before a flush; completed by `flush_done`
    pub fn flushing(&self, first_statement: &str, rows: usize) {
        if self.quiet {
            return;
        }
        if rows <= 1 {
            print!("{}", first_statement);
        } else {
            print!("{} (and {} more)", first_statement, rows - 1);
        }
        let _ = io::stdout().flush();
    }

    pub fn flush_done(&self) {
        if !self.quiet {
            println!(" DONE");
        }
    }

    pub fn summary(&self, line: &str) {
        if !self.silent {
            println!("\n{}", line);
        }
    }
}
