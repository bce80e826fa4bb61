use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::error::ColMigrateError;

/// Integer key of a table row targeted for migration
pub type RowId = i64;

/// Set of row ids already migrated, as reconstructed from the progress file.
///
/// Duplicate lines in the file collapse on load. The set never shrinks.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProgressSet {
    ids: HashSet<RowId>,
}

impl ProgressSet {
    pub fn contains(&self, id: RowId) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn insert(&mut self, id: RowId) {
        self.ids.insert(id);
    }
}

impl FromIterator<RowId> for ProgressSet {
    fn from_iter<I: IntoIterator<Item = RowId>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

/// Append-only log of migrated row ids, one decimal id per line.
///
/// Opened once per process in append mode. Every `append` is flushed and
/// synced to disk before returning so a committed batch is never forgotten
/// once its ids have been recorded.
pub struct ProgressStore {
    path: PathBuf,
    writer: BufWriter<File>,
    appended: u64,
}

impl ProgressStore {
    /// Load the progress file at `path` and open it for appending.
    ///
    /// A missing file yields an empty set and is created. Any non-blank line
    /// that is not an integer aborts with `CorruptProgressRecord`. A final
    /// line without its newline was never completely written; it is not
    /// loaded and is cut from the file.
    pub fn open(path: &Path) -> Result<(Self, ProgressSet), ColMigrateError> {
        let loaded = Self::load(path)?;

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;

        Self::truncate_torn_tail(&mut file, path)?;

        info!(
            "Progress file {} holds {} processed ids",
            path.display(),
            loaded.len()
        );

        let store = Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            appended: 0,
        };

        Ok((store, loaded))
    }

    fn load(path: &Path) -> Result<ProgressSet, ColMigrateError> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No progress file at {}, starting fresh", path.display());
                return Ok(ProgressSet::default());
            }
            Err(e) => return Err(e.into()),
        };

        // Only newline-terminated lines are complete records
        let complete = match data.iter().rposition(|&b| b == b'\n') {
            Some(last_newline) => &data[..=last_newline],
            None => &data[..0],
        };

        let mut set = ProgressSet::default();
        for (index, line) in complete.split(|&b| b == b'\n').enumerate() {
            let corrupt = || ColMigrateError::CorruptProgressRecord {
                path: path.to_path_buf(),
                line: index + 1,
                content: String::from_utf8_lossy(line).trim().to_owned(),
            };
            let trimmed = std::str::from_utf8(line).map_err(|_| corrupt())?.trim();
            if trimmed.is_empty() {
                continue;
            }
            let id = trimmed.parse::<RowId>().map_err(|_| corrupt())?;
            set.insert(id);
        }

        Ok(set)
    }

    /// Cuts a final line left without its newline by an interrupted write
    fn truncate_torn_tail(file: &mut File, path: &Path) -> io::Result<()> {
        let len = file.metadata()?.len();
        if len == 0 {
            return Ok(());
        }

        let mut data = Vec::with_capacity(len as usize);
        file.seek(SeekFrom::Start(0))?;
        file.read_to_end(&mut data)?;

        if data.last() == Some(&b'\n') {
            return Ok(());
        }

        let keep = data
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |last_newline| last_newline + 1);
        warn!(
            "Progress file {} ends with an incomplete line {:?}, discarding it",
            path.display(),
            String::from_utf8_lossy(&data[keep..])
        );
        // Append mode still writes at the new end after truncation
        file.set_len(keep as u64)?;
        file.sync_data()?;

        Ok(())
    }

    /// Append `ids` to the log, one per line, then force them to stable storage.
    pub fn append(&mut self, ids: &[RowId]) -> Result<(), ColMigrateError> {
        if ids.is_empty() {
            return Ok(());
        }

        for id in ids {
            writeln!(self.writer, "{}", id)?;
        }
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;

        self.appended += ids.len() as u64;
        Ok(())
    }

    /// Number of ids appended by this process
    pub fn appended(&self) -> u64 {
        self.appended
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
