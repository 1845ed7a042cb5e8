//! The history journal.
//!
//! Every executed command is recorded as a [`HistoryItem`]; at engine
//! teardown the sequence is serialized as a JSON document into a file named
//! after the engine start time. Writes are best-effort; callers log failures
//! instead of aborting.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::result::HistoryItem;

/// Timestamp format used for journal file names.
const FILE_STAMP: &str = "%Y-%m-%dT%H:%M:%S";

/// An ordered sequence of executed commands with their results.
#[derive(Debug, Default)]
pub struct History {
    items: Vec<HistoryItem>,
    started: Option<DateTime<Utc>>,
}

impl History {
    /// Creates an empty history stamped with the engine start time.
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            started: Some(Utc::now()),
        }
    }

    /// Appends an executed command.
    pub fn push(&mut self, item: HistoryItem) {
        self.items.push(item);
    }

    /// The recorded items, oldest first.
    pub fn items(&self) -> &[HistoryItem] {
        &self.items
    }

    /// The journal file path for this history under `dir`.
    pub fn path(&self, dir: &Path) -> PathBuf {
        let stamp = self.started.unwrap_or_else(Utc::now).format(FILE_STAMP);
        dir.join(format!("{}.json", stamp))
    }

    /// Writes the history as a JSON list into `dir`, creating the directory
    /// when missing. Returns the file written.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = self.path(dir);
        let data = serde_json::to_vec_pretty(&self.items)?;
        std::fs::write(&path, data)?;
        Ok(path)
    }
}

/// Path of the interactive readline history under the journal directory.
pub fn interactive_history_path(dir: &Path) -> PathBuf {
    dir.join("interactive")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::RunResult;
    use std::collections::BTreeMap;

    #[test]
    fn test_save_writes_json_list() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = History::new();
        let mut results = BTreeMap::new();
        let mut result = RunResult::started("web1.example.com");
        result.exit_status = 0;
        result.stdout = b"ok\n".to_vec();
        results.insert("web1.example.com".to_string(), result);
        history.push(HistoryItem {
            command: "uptime".into(),
            start_time: Utc::now(),
            end_time: Utc::now(),
            results,
        });

        let path = history.save(dir.path()).unwrap();
        assert!(path.file_name().unwrap().to_str().unwrap().ends_with(".json"));

        let data = std::fs::read_to_string(&path).unwrap();
        let parsed: Vec<HistoryItem> = serde_json::from_str(&data).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].command, "uptime");
        assert_eq!(parsed[0].results["web1.example.com"].stdout, b"ok\n");
    }

    #[test]
    fn test_journal_name_carries_timestamp() {
        let history = History::new();
        let path = history.path(Path::new("/var/lib/herd"));
        let name = path.file_name().unwrap().to_str().unwrap();
        // e.g. 2026-08-01T12:34:56.json
        assert_eq!(name.len(), "2026-08-01T12:34:56.json".len());
    }
}
