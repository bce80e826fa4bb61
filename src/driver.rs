// Driver States
// INIT             - nothing done yet
// CONNECTING       - open the relational store
// EVOLVING_SCHEMA  - add the destination column if configured and missing
// COUNTING         - snapshot the candidate count (progress denominator)
// LOADING_PROGRESS - read the progress file, open it for appending
// ENUMERATING      - list candidate row ids
// SCANNING         - skip known ids, queue and commit the rest in batches
// DONE             - scan finished, trailing batch handled
// FATAL            - any step failed; the error is returned to the caller
//
// The interrupt token is checked before every row and before every flush.
// An interrupt drops the pending batch, so at most one batch of work is lost.

use chrono::{DateTime, Local};
use log::{error, info, warn};
use strum::Display;

use crate::batch::BatchCommitter;
use crate::config::Config;
use crate::enumerator::RowEnumerator;
use crate::error::ColMigrateError;
use crate::progress_store::ProgressStore;
use crate::reporter::ConsoleReporter;
use crate::signals::InterruptToken;
use crate::sql::MigrationTarget;
use crate::store::{self, RelationalStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DriverState {
    Init,
    Connecting,
    EvolvingSchema,
    Counting,
    LoadingProgress,
    Enumerating,
    Scanning,
    Done,
    Fatal,
}

/// Outcome of a completed run
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Candidate count snapshot taken before scanning
    pub total_candidates: i64,
    /// Ids yielded by the enumerator
    pub enumerated: u64,
    /// Ids skipped because the progress file already held them
    pub skipped: u64,
    /// Rows updated and recorded this run
    pub modified: u64,
    /// Compound statements committed this run
    pub commits: u64,
    /// Rows queued but left uncommitted because trailing flush is disabled
    pub left_pending: u64,
    /// Lines in the progress file: loaded ids plus ids appended this run
    pub progress_entries: u64,
    pub column_added: bool,
    pub started_at: DateTime<Local>,
    pub elapsed: chrono::Duration,
}

pub struct Driver<'a> {
    config: &'a Config,
    interrupt: InterruptToken,
    reporter: ConsoleReporter,
    state: DriverState,
}

impl<'a> Driver<'a> {
    pub fn new(config: &'a Config, interrupt: InterruptToken, reporter: ConsoleReporter) -> Self {
        Self {
            config,
            interrupt,
            reporter,
            state: DriverState::Init,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Connects to the configured store and runs the migration
    pub fn run(&mut self) -> Result<RunSummary, ColMigrateError> {
        self.transition(DriverState::Connecting);
        self.reporter.banner(&self.config.connection.describe());
        let mut store = match store::connect(&self.config.connection) {
            Ok(store) => store,
            Err(e) => return Err(self.fail(connection_error(e))),
        };

        self.run_with_store(store.as_mut())
    }

    /// Runs the migration against an already-open store
    pub fn run_with_store(
        &mut self,
        store: &mut dyn RelationalStore,
    ) -> Result<RunSummary, ColMigrateError> {
        match self.execute(store, Local::now()) {
            Ok(summary) => {
                self.transition(DriverState::Done);
                Ok(summary)
            }
            Err(ColMigrateError::Interrupted) => {
                warn!(
                    "Interrupted in state {}; uncommitted rows will be retried next run",
                    self.state
                );
                Err(ColMigrateError::Interrupted)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn execute(
        &mut self,
        store: &mut dyn RelationalStore,
        started_at: DateTime<Local>,
    ) -> Result<RunSummary, ColMigrateError> {
        info!("Run started at {}", started_at.to_rfc3339());
        let config = self.config;
        let migration = &config.migration;
        let target = MigrationTarget::from_config(migration)?;

        self.interrupt.check()?;
        self.transition(DriverState::EvolvingSchema);
        let mut column_added = false;
        if let Some(type_def) = &migration.new_column_type {
            column_added = store
                .add_column_if_absent(&target, type_def)
                .map_err(|e| {
                    ColMigrateError::SchemaEvolutionError(format!(
                        "column {} in table {} with type {}: {}",
                        migration.destination_column, migration.table, type_def, e
                    ))
                })?;
            if column_added {
                info!(
                    "Added column {} to {} ({})",
                    migration.destination_column, migration.table, type_def
                );
            }
        }

        self.interrupt.check()?;
        self.transition(DriverState::Counting);
        let total = RowEnumerator::new(store, &target).count_candidates()?;

        self.interrupt.check()?;
        self.transition(DriverState::LoadingProgress);
        let (mut progress, done) = ProgressStore::open(&migration.progress_file)?;
        let loaded_entries = done.len() as u64;
        if !done.is_empty() {
            info!("Resuming: {} ids already processed", loaded_entries);
        }

        self.interrupt.check()?;
        self.transition(DriverState::Enumerating);
        let mut enumerator = RowEnumerator::new(store, &target);
        self.reporter.banner(&enumerator.listing_sql());
        let ids = enumerator.enumerate()?;

        self.reporter.banner(&format!(
            "Copying data from {} to {}, for {} rows.",
            migration.source_column, migration.destination_column, total
        ));

        self.transition(DriverState::Scanning);
        let mut committer = BatchCommitter::new(store, &mut progress, migration.batch_size);
        let mut enumerated = 0u64;
        let mut skipped = 0u64;

        for id in ids {
            self.interrupt.check()?;
            enumerated += 1;

            if done.contains(id) {
                skipped += 1;
                self.reporter.skipped(enumerated, total, id);
                continue;
            }

            committer.add(id, target.update_sql(id));
            self.reporter.queued(enumerated, total, id);

            if committer.is_due() {
                self.interrupt.check()?;
                self.flush(&mut committer)?;
            }
        }

        let mut left_pending = 0u64;
        if !committer.pending().is_empty() {
            if migration.flush_trailing_partial_batch {
                self.interrupt.check()?;
                self.flush(&mut committer)?;
            } else {
                left_pending = committer.pending().len() as u64;
                warn!(
                    "Trailing flush disabled: {} queued rows were not committed",
                    left_pending
                );
            }
        }

        let modified = committer.modified();
        let commits = committer.commits();
        drop(committer);

        let summary = RunSummary {
            total_candidates: total,
            enumerated,
            skipped,
            modified,
            commits,
            left_pending,
            progress_entries: loaded_entries + progress.appended(),
            column_added,
            started_at,
            elapsed: Local::now() - started_at,
        };

        info!(
            "Run finished: {} rows updated in {} commits, {} skipped, {} left pending",
            modified, commits, skipped, left_pending
        );
        self.reporter.summary(&format!(
            "Data copy completed successfully. Updated {} rows. {} has {} entries.",
            summary.modified,
            progress.path().display(),
            summary.progress_entries
        ));

        Ok(summary)
    }

    fn flush(&self, committer: &mut BatchCommitter) -> Result<(), ColMigrateError> {
        let pending = committer.pending();
        self.reporter
            .flushing(pending.first_statement().unwrap_or_default(), pending.len());
        committer.flush()?;
        self.reporter.flush_done();
        Ok(())
    }

    fn transition(&mut self, next: DriverState) {
        info!("{} -> {}", self.state, next);
        self.state = next;
    }

    fn fail(&mut self, err: ColMigrateError) -> ColMigrateError {
        error!("Run failed in state {}: {}", self.state, err);
        self.state = DriverState::Fatal;
        err
    }
}

fn connection_error(err: ColMigrateError) -> ColMigrateError {
    match err {
        ColMigrateError::ConnectionError(_) => err,
        other => ColMigrateError::ConnectionError(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::RecordingStore;
    use crate::store::SqliteStore;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use rusqlite::Connection;
    use std::collections::BTreeSet;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    /// Table `t` with rows 1..=rows where src = id and dst = 0
    fn seeded_store(rows: i64) -> RecordingStore<SqliteStore> {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, src INTEGER, dst INTEGER);")
            .unwrap();
        for id in 1..=rows {
            conn.execute("INSERT INTO t VALUES (?1, ?1, 0)", [id]).unwrap();
        }
        RecordingStore::new(SqliteStore::from_connection(conn))
    }

    fn test_config(dir: &Path, batch_size: usize) -> Config {
        let mut config = Config::default();
        config.migration.table = "t".into();
        config.migration.id_column = "id".into();
        config.migration.source_column = "src".into();
        config.migration.destination_column = "dst".into();
        config.migration.batch_size = batch_size;
        config.migration.progress_file = dir.join("progress.txt");
        config
    }

    fn run(config: &Config, store: &mut dyn RelationalStore) -> Result<RunSummary, ColMigrateError> {
        Driver::new(config, InterruptToken::new(), ConsoleReporter::silent()).run_with_store(store)
    }

    fn logged_ids(path: &Path) -> Vec<i64> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| l.trim().parse().unwrap())
            .collect()
    }

    fn differing(store: &mut RecordingStore<SqliteStore>) -> i64 {
        store
            .inner()
            .connection()
            .query_row("SELECT COUNT(*) FROM t WHERE src IS NOT dst", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_resume_processes_only_unrecorded_rows() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path(), 1);
        fs::write(&config.migration.progress_file, "2\n4\n6\n").unwrap();
        let mut store = seeded_store(6);

        let summary = run(&config, &mut store).unwrap();

        assert_eq!(summary.total_candidates, 6);
        assert_eq!(summary.skipped, 3);
        assert_eq!(summary.modified, 3);
        assert_eq!(summary.progress_entries, 6);

        let mut appended = logged_ids(&config.migration.progress_file)[3..].to_vec();
        appended.sort();
        assert_eq!(appended, vec![1, 3, 5]);

        let all: BTreeSet<i64> = logged_ids(&config.migration.progress_file).into_iter().collect();
        assert_eq!(all, (1..=6).collect::<BTreeSet<i64>>());
    }

    #[test]
    fn test_recorded_ids_never_reach_the_store() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path(), 2);
        fs::write(&config.migration.progress_file, "2\n4\n6\n").unwrap();
        let mut store = seeded_store(6);

        run(&config, &mut store).unwrap();

        for compound in &store.compounds {
            for skipped in [2, 4, 6] {
                assert!(
                    !compound.contains(&format!("\"id\" = {};", skipped)),
                    "{} was sent to the store: {}",
                    skipped,
                    compound
                );
            }
        }
        // The skipped rows were not touched in the table either
        assert_eq!(differing(&mut store), 3);
    }

    #[test]
    fn test_second_run_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path(), 4);
        let mut store = seeded_store(5);

        let first = run(&config, &mut store).unwrap();
        assert_eq!(first.modified, 5);
        assert_eq!(differing(&mut store), 0);
        let commits_after_first = store.compounds.len();

        let second = run(&config, &mut store).unwrap();
        assert_eq!(second.total_candidates, 0);
        assert_eq!(second.modified, 0);
        assert_eq!(store.compounds.len(), commits_after_first);
        assert_eq!(logged_ids(&config.migration.progress_file).len(), 5);
    }

    #[test]
    fn test_trailing_partial_batch_flushed_by_default() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path(), 3);
        let mut store = seeded_store(7);

        let summary = run(&config, &mut store).unwrap();

        assert_eq!(summary.commits, 3);
        assert_eq!(summary.modified, 7);
        assert_eq!(summary.left_pending, 0);
        assert_eq!(differing(&mut store), 0);
    }

    #[test]
    fn test_trailing_partial_batch_left_when_disabled() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(dir.path(), 3);
        config.migration.flush_trailing_partial_batch = false;
        let mut store = seeded_store(7);

        let summary = run(&config, &mut store).unwrap();

        assert_eq!(summary.commits, 2);
        assert_eq!(summary.modified, 6);
        assert_eq!(summary.left_pending, 1);
        assert_eq!(differing(&mut store), 1);
        assert_eq!(logged_ids(&config.migration.progress_file).len(), 6);
    }

    #[test]
    fn test_corrupt_progress_file_aborts_before_any_update() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path(), 1);
        fs::write(&config.migration.progress_file, "1\nnot-a-number\n").unwrap();
        let mut store = seeded_store(3);

        let mut driver = Driver::new(&config, InterruptToken::new(), ConsoleReporter::silent());
        let result = driver.run_with_store(&mut store);

        assert!(matches!(
            result,
            Err(ColMigrateError::CorruptProgressRecord { line: 2, .. })
        ));
        assert_eq!(driver.state(), DriverState::Fatal);
        assert!(store.compounds.is_empty());
        assert_eq!(differing(&mut store), 3);
    }

    #[test]
    fn test_commit_error_is_fatal_and_batch_not_recorded() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path(), 2);
        let mut store = seeded_store(6);
        // Rows arrive in rowid order, so the second batch is {3, 4}
        store.fail_on = Some("\"id\" = 4;".into());

        let mut driver = Driver::new(&config, InterruptToken::new(), ConsoleReporter::silent());
        let result = driver.run_with_store(&mut store);

        assert!(matches!(result, Err(ColMigrateError::CommitError(_))));
        assert_eq!(driver.state(), DriverState::Fatal);
        assert_eq!(logged_ids(&config.migration.progress_file), vec![1, 2]);
        assert_eq!(differing(&mut store), 4);
    }

    #[test]
    fn test_interrupt_before_scan_commits_nothing() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path(), 1);
        let mut store = seeded_store(3);
        let token = InterruptToken::new();
        token.interrupt();

        let mut driver = Driver::new(&config, token, ConsoleReporter::silent());
        let result = driver.run_with_store(&mut store);

        assert!(matches!(result, Err(ColMigrateError::Interrupted)));
        assert_ne!(driver.state(), DriverState::Fatal);
        assert!(store.compounds.is_empty());
    }

    #[test]
    fn test_interrupt_mid_scan_keeps_committed_batches_only() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path(), 2);
        let mut store = seeded_store(7);
        let token = InterruptToken::new();
        store.interrupt_after = Some((2, token.clone()));

        let mut driver = Driver::new(&config, token, ConsoleReporter::silent());
        let result = driver.run_with_store(&mut store);

        assert!(matches!(result, Err(ColMigrateError::Interrupted)));
        assert_eq!(driver.state(), DriverState::Scanning);
        assert_eq!(store.compounds.len(), 2);
        assert_eq!(logged_ids(&config.migration.progress_file), vec![1, 2, 3, 4]);
        assert_eq!(differing(&mut store), 3);

        // The next run picks up exactly the rows the interrupted one never committed
        store.interrupt_after = None;
        let summary = run(&config, &mut store).unwrap();
        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.modified, 3);
        assert_eq!(
            logged_ids(&config.migration.progress_file),
            vec![1, 2, 3, 4, 5, 6, 7]
        );
        assert_eq!(differing(&mut store), 0);
    }

    #[test]
    fn test_schema_evolution_adds_destination_column() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(dir.path(), 2);
        config.migration.destination_column = "flag".into();
        config.migration.new_column_type = Some("INTEGER".into());
        let mut store = seeded_store(3);

        let summary = run(&config, &mut store).unwrap();

        assert!(summary.column_added);
        assert_eq!(summary.modified, 3);
        let unset: i64 = store
            .inner()
            .connection()
            .query_row("SELECT COUNT(*) FROM t WHERE flag IS NOT src", [], |r| r.get(0))
            .unwrap();
        assert_eq!(unset, 0);
    }

    #[test]
    fn test_failed_schema_evolution_is_fatal() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(dir.path(), 1);
        config.migration.destination_column = "flag".into();
        config.migration.new_column_type = Some("INTEGER NOT NULL".into());
        let mut store = seeded_store(2);

        // SQLite refuses to add a NOT NULL column without a default
        let result = run(&config, &mut store);
        assert!(matches!(
            result,
            Err(ColMigrateError::SchemaEvolutionError(_))
        ));
    }

    #[test]
    fn test_missing_table_fails_counting() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(dir.path(), 1);
        config.migration.table = "nope".into();
        let mut store = seeded_store(1);

        let mut driver = Driver::new(&config, InterruptToken::new(), ConsoleReporter::silent());
        assert!(matches!(
            driver.run_with_store(&mut store),
            Err(ColMigrateError::CountError(_))
        ));
        assert_eq!(driver.state(), DriverState::Fatal);
        // Counting precedes loading, so no progress file was created
        assert!(!config.migration.progress_file.exists());
    }

    #[test]
    fn test_crash_between_commit_and_append_reapplies_one_batch() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path(), 2);
        let mut store = seeded_store(4);

        // Simulate a batch {1, 2} that was committed but never recorded
        store
            .inner()
            .connection()
            .execute_batch("UPDATE t SET dst = src WHERE id IN (1, 2);")
            .unwrap();
        fs::write(&config.migration.progress_file, "").unwrap();

        // Candidates are now {3, 4} only; the idempotent update makes re-runs safe
        let summary = run(&config, &mut store).unwrap();
        assert_eq!(summary.modified, 2);
        assert_eq!(differing(&mut store), 0);

        // With the all-rows predicate the unrecorded batch is redone, and only it
        let mut all_rows = test_config(dir.path(), 2);
        all_rows.migration.all_rows = true;
        let summary = run(&all_rows, &mut store).unwrap();
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.modified, 2);
        assert_eq!(differing(&mut store), 0);
    }

    #[test]
    fn test_progress_file_only_grows() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(dir.path(), 2);
        config.migration.all_rows = true;
        let mut store = seeded_store(3);
        fs::write(&config.migration.progress_file, "3\n").unwrap();

        let before = fs::read_to_string(&config.migration.progress_file).unwrap();
        run(&config, &mut store).unwrap();
        let after = fs::read_to_string(&config.migration.progress_file).unwrap();

        assert!(after.starts_with(&before));
        assert!(after.len() > before.len());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_commit_count_matches_batch_size(rows in 0i64..40, batch_size in 1usize..9, trailing in any::<bool>()) {
            let dir = TempDir::new().unwrap();
            let mut config = test_config(dir.path(), batch_size);
            config.migration.flush_trailing_partial_batch = trailing;
            let mut store = seeded_store(rows);

            let summary = run(&config, &mut store).unwrap();

            let m = rows as usize;
            let expected_commits = if trailing { m.div_ceil(batch_size) } else { m / batch_size };
            prop_assert_eq!(store.compounds.len(), expected_commits);
            prop_assert_eq!(summary.commits as usize, expected_commits);

            for (i, compound) in store.compounds.iter().enumerate() {
                let statements = compound.matches("UPDATE ").count();
                if i + 1 < store.compounds.len() {
                    prop_assert_eq!(statements, batch_size);
                } else {
                    prop_assert!(statements >= 1 && statements <= batch_size);
                }
            }
        }
    }
}
