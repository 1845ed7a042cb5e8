//! The interactive line loop.
//!
//! Reads single-line commands with history and word completion, hands them
//! to the script engine, and keeps the prompt showing the live size of the
//! active set. Line history persists under the journal directory.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use dialoguer::theme::ColorfulTheme;
use dialoguer::{Completion, History, Input};
use tracing::{debug, error};

use herd::history::interactive_history_path;
use herd::scripting::ScriptEngine;

/// Maximum lines kept in the persisted interactive history.
const HISTORY_LIMIT: usize = 1000;

/// Runs the interactive loop until EOF or `exit`.
pub async fn run_loop(engine: &mut ScriptEngine) {
    let path = interactive_history_path(&engine.settings().history_dir);
    let mut history = FileHistory::load(&path);
    let completion = CommandCompletion;

    loop {
        let prompt = format!("herd [{} hosts] $", engine.active_hosts().len());
        let line = match Input::<String>::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .allow_empty(true)
            .history_with(&mut history)
            .completion_with(&completion)
            .interact_text()
        {
            Ok(line) => line,
            Err(err) => {
                debug!(error = %err, "Leaving interactive mode");
                break;
            }
        };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        if line == "exit" {
            break;
        }
        if let Err(err) = engine.parse_code_line(&line) {
            error!("{}", err);
            continue;
        }
        engine.execute().await;
    }

    history.save();
}

// Line history persisted to HistoryDir/interactive, newest first in memory.
struct FileHistory {
    entries: VecDeque<String>,
    path: PathBuf,
}

impl FileHistory {
    fn load(path: &Path) -> Self {
        let entries = std::fs::read_to_string(path)
            .map(|content| {
                content
                    .lines()
                    .rev()
                    .take(HISTORY_LIMIT)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        Self {
            entries,
            path: path.to_path_buf(),
        }
    }

    fn save(&self) {
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let mut lines: Vec<&str> = self.entries.iter().map(String::as_str).collect();
        lines.reverse();
        if let Err(err) = std::fs::write(&self.path, lines.join("\n") + "\n") {
            error!(path = %self.path.display(), error = %err, "Unable to save history");
        }
    }
}

impl<T: ToString> History<T> for FileHistory {
    fn read(&self, pos: usize) -> Option<String> {
        self.entries.get(pos).cloned()
    }

    fn write(&mut self, val: &T) {
        let line = val.to_string();
        if line.is_empty() || self.entries.front() == Some(&line) {
            return;
        }
        self.entries.push_front(line);
        self.entries.truncate(HISTORY_LIMIT);
    }
}

// Prefix completion over the command vocabulary.
struct CommandCompletion;

const COMPLETIONS: &[&str] = &[
    "add hosts ",
    "remove hosts ",
    "list hosts",
    "list hosts oneline",
    "list hosts csv",
    "run ",
    "set Parallel ",
    "set Timeout ",
    "set HostTimeout ",
    "set ConnectTimeout ",
    "set Output ",
    "set LogLevel ",
    "set HistoryDir ",
    "set CacheDir ",
    "help",
    "exit",
];

impl Completion for CommandCompletion {
    fn get(&self, input: &str) -> Option<String> {
        if input.is_empty() {
            return None;
        }
        let mut candidates = COMPLETIONS
            .iter()
            .filter(|c| c.starts_with(input) && c.len() > input.len());
        let first = candidates.next()?;
        match candidates.next() {
            // Ambiguous; complete nothing.
            Some(_) => None,
            None => Some(first.trim_end().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_is_unambiguous_only() {
        let completion = CommandCompletion;
        assert_eq!(completion.get("ru"), Some("run".to_string()));
        assert_eq!(completion.get("set P"), Some("set Parallel".to_string()));
        // "list hosts" has several continuations.
        assert_eq!(completion.get("list"), None);
        assert_eq!(completion.get("zzz"), None);
    }

    #[test]
    fn test_history_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("interactive");
        let mut history = FileHistory::load(&path);
        History::<String>::write(&mut history, &"run uptime".to_string());
        History::<String>::write(&mut history, &"list hosts".to_string());
        // Duplicate of the most recent entry is dropped.
        History::<String>::write(&mut history, &"list hosts".to_string());
        history.save();

        let reloaded = FileHistory::load(&path);
        assert_eq!(
            History::<String>::read(&reloaded, 0),
            Some("list hosts".to_string())
        );
        assert_eq!(
            History::<String>::read(&reloaded, 1),
            Some("run uptime".to_string())
        );
    }
}
