//! Per-host execution results and the history they accumulate into.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Exit status sentinel used before a command reports one.
pub const UNKNOWN_EXIT_STATUS: i32 = -1;

/// The error family that can end up inside a per-host result.
///
/// These never propagate across the fan-out; they live inside the host's
/// result and are projected through the `err` synthetic attribute.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunError {
    /// The enclosing context expired while connecting or executing.
    #[error("{0}")]
    Timeout(String),
    /// SSH dial, handshake, auth, or session failure.
    #[error("{0}")]
    Transport(String),
    /// The command ran and exited non-zero.
    #[error("command exited with status {0}")]
    Remote(i32),
}

impl RunError {
    /// True for the timeout variant.
    pub fn is_timeout(&self) -> bool {
        matches!(self, RunError::Timeout(_))
    }
}

/// The outcome of running one command on one host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RunResult {
    /// Host name the command ran on
    pub host: String,
    /// When the run started
    pub start_time: DateTime<Utc>,
    /// When the run finished
    pub end_time: DateTime<Utc>,
    /// Elapsed wall time in seconds
    pub elapsed_time: f64,
    /// Captured standard output
    #[serde(with = "lossy_bytes")]
    pub stdout: Vec<u8>,
    /// Captured standard error
    #[serde(with = "lossy_bytes")]
    pub stderr: Vec<u8>,
    /// Remote exit status, -1 until reported
    pub exit_status: i32,
    /// Error, if the run did not complete cleanly
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<RunError>,
}

impl RunResult {
    /// Starts a result for a host; start and end are both "now" until
    /// [`finish`](Self::finish) is called.
    pub fn started(host: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            host: host.into(),
            start_time: now,
            end_time: now,
            elapsed_time: 0.0,
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_status: UNKNOWN_EXIT_STATUS,
            err: None,
        }
    }

    /// An empty placeholder used for the synthetic result projections when a
    /// host has not run anything yet.
    pub fn empty(host: impl Into<String>) -> Self {
        Self::started(host)
    }

    /// Stamps the end time and elapsed seconds.
    pub fn finish(&mut self) {
        self.end_time = Utc::now();
        self.elapsed_time =
            (self.end_time - self.start_time).num_microseconds().unwrap_or(0) as f64 / 1e6;
    }

    /// True when the command completed with exit status 0.
    pub fn success(&self) -> bool {
        self.err.is_none() && self.exit_status == 0
    }
}

/// One line of streamed output from a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    /// Originating host name
    pub host: String,
    /// True when the line came from standard error
    pub stderr: bool,
    /// Raw line bytes, including the trailing newline when there was one
    pub data: Vec<u8>,
}

/// One executed command with its per-host results.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HistoryItem {
    /// The command that ran
    pub command: String,
    /// Batch start time
    pub start_time: DateTime<Utc>,
    /// Batch end time
    pub end_time: DateTime<Utc>,
    /// Results keyed by host name
    pub results: BTreeMap<String, RunResult>,
}

impl HistoryItem {
    /// Number of hosts that did not complete with exit status 0.
    pub fn failures(&self) -> usize {
        self.results.values().filter(|r| !r.success()).count()
    }
}

mod lossy_bytes {
    //! Journal-friendly byte buffers: serialized as (lossy) UTF-8 strings.

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from_utf8_lossy(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        Ok(String::deserialize(deserializer)?.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unstarted_result_shape() {
        let r = RunResult::empty("web1.example.com");
        assert_eq!(r.exit_status, UNKNOWN_EXIT_STATUS);
        assert!(r.stdout.is_empty());
        assert!(r.err.is_none());
        assert!(!r.success());
    }

    #[test]
    fn test_finish_stamps_elapsed() {
        let mut r = RunResult::started("web1");
        r.exit_status = 0;
        r.finish();
        assert!(r.elapsed_time >= 0.0);
        assert!(r.end_time >= r.start_time);
        assert!(r.success());
    }

    #[test]
    fn test_result_serializes_output_as_text() {
        let mut r = RunResult::started("web1");
        r.stdout = b"hello\n".to_vec();
        r.exit_status = 0;
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["Stdout"], "hello\n");
        assert_eq!(json["ExitStatus"], 0);
        assert!(json.get("Err").is_none());
    }

    #[test]
    fn test_history_item_failures() {
        let mut item = HistoryItem {
            command: "uptime".into(),
            start_time: Utc::now(),
            end_time: Utc::now(),
            results: BTreeMap::new(),
        };
        let mut ok = RunResult::started("a");
        ok.exit_status = 0;
        let mut bad = RunResult::started("b");
        bad.exit_status = 1;
        bad.err = Some(RunError::Remote(1));
        item.results.insert("a".into(), ok);
        item.results.insert("b".into(), bad);
        assert_eq!(item.failures(), 1);
    }
}
