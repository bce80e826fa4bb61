use std::collections::HashMap;

use log::{debug, Level};
use logging_timer::timer;

use crate::error::ColMigrateError;
use crate::progress_store::{ProgressStore, RowId};
use crate::store::RelationalStore;

/// Pending per-row update statements, kept in insertion order.
///
/// Adding an id that is already pending replaces its statement in place.
#[derive(Debug, Default)]
pub struct PendingBatch {
    entries: Vec<(RowId, String)>,
    positions: HashMap<RowId, usize>,
}

impl PendingBatch {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            positions: HashMap::with_capacity(capacity),
        }
    }

    pub fn insert(&mut self, id: RowId, statement: String) {
        match self.positions.get(&id) {
            Some(&pos) => self.entries[pos].1 = statement,
            None => {
                self.positions.insert(id, self.entries.len());
                self.entries.push((id, statement));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> Vec<RowId> {
        self.entries.iter().map(|(id, _)| *id).collect()
    }

    pub fn first_statement(&self) -> Option<&str> {
        self.entries.first().map(|(_, stmt)| stmt.as_str())
    }

    /// All statements concatenated into one compound statement
    pub fn compound(&self) -> String {
        let mut sql = String::with_capacity(self.entries.iter().map(|(_, s)| s.len()).sum());
        for (_, statement) in &self.entries {
            sql.push_str(statement);
        }
        sql
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.positions.clear();
    }
}

/// Accumulates row updates and commits them in batches of `batch_size`.
///
/// A flush executes the compound statement, then appends the committed ids to
/// the progress store. If the process dies between the two, the next run
/// re-applies that one batch, which is harmless since the update is idempotent.
pub struct BatchCommitter<'a> {
    store: &'a mut dyn RelationalStore,
    progress: &'a mut ProgressStore,
    pending: PendingBatch,
    batch_size: usize,
    queued_since_flush: usize,
    modified: u64,
    commits: u64,
}

impl<'a> BatchCommitter<'a> {
    pub fn new(
        store: &'a mut dyn RelationalStore,
        progress: &'a mut ProgressStore,
        batch_size: usize,
    ) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            store,
            progress,
            pending: PendingBatch::with_capacity(batch_size),
            batch_size,
            queued_since_flush: 0,
            modified: 0,
            commits: 0,
        }
    }

    pub fn add(&mut self, id: RowId, statement: String) {
        self.pending.insert(id, statement);
        self.queued_since_flush += 1;
    }

    /// True once `batch_size` rows have been queued since the last flush
    pub fn is_due(&self) -> bool {
        self.queued_since_flush >= self.batch_size
    }

    pub fn pending(&self) -> &PendingBatch {
        &self.pending
    }

    /// Commits the pending batch and records its ids. Returns the rows committed.
    pub fn flush(&mut self) -> Result<usize, ColMigrateError> {
        if self.pending.is_empty() {
            self.queued_since_flush = 0;
            return Ok(0);
        }

        let rows = self.pending.len();
        let _tmr = timer!(Level::Trace; "BatchCommitter.flush", "{}", rows);

        self.store
            .execute_compound(&self.pending.compound())
            .map_err(|e| ColMigrateError::CommitError(e.to_string()))?;

        self.progress.append(&self.pending.ids())?;

        self.modified += rows as u64;
        self.commits += 1;
        self.pending.clear();
        self.queued_since_flush = 0;

        debug!("Committed batch {} with {} rows", self.commits, rows);
        Ok(rows)
    }

    /// Rows committed so far
    pub fn modified(&self) -> u64 {
        self.modified
    }

    /// Compound statements committed so far
    pub fn commits(&self) -> u64 {
        self.commits
    }
}
