use log::info;

use crate::error::ColMigrateError;
use crate::progress_store::RowId;
use crate::sql::MigrationTarget;
use crate::store::RelationalStore;

/// Produces the candidate rows of a migration.
pub struct RowEnumerator<'a> {
    store: &'a mut dyn RelationalStore,
    target: &'a MigrationTarget,
}

impl<'a> RowEnumerator<'a> {
    pub fn new(store: &'a mut dyn RelationalStore, target: &'a MigrationTarget) -> Self {
        Self { store, target }
    }

    /// Snapshot count of candidate rows, used only as the progress denominator
    pub fn count_candidates(&mut self) -> Result<i64, ColMigrateError> {
        let sql = self.target.count_sql(self.store.dialect());
        let total = self
            .store
            .count(&sql)
            .map_err(|e| ColMigrateError::CountError(e.to_string()))?;
        info!("{} candidate rows", total);
        Ok(total)
    }

    /// Query `enumerate` runs, shown to the user before the scan
    pub fn listing_sql(&self) -> String {
        self.target.list_sql(self.store.dialect())
    }

    /// All candidate ids, in the order the store yields them
    pub fn enumerate(&mut self) -> Result<Vec<RowId>, ColMigrateError> {
        let sql = self.listing_sql();
        info!("{}", sql);
        self.store
            .list_ids(&sql)
            .map_err(|e| ColMigrateError::EnumerationError(e.to_string()))
    }
}
