//! Output formatting.
//!
//! Streaming output flows from the executors through a bounded channel into
//! a single consumer; a slow terminal intentionally back-pressures the
//! workers. The non-streaming modes format complete results once a run
//! finishes.

use std::collections::BTreeMap;

use colored::Colorize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::OutputMode;
use crate::host::Host;
use crate::hostset::HostSet;
use crate::result::{HistoryItem, OutputLine, RunResult};

/// Capacity of the streaming output channel. Back-pressure from a slow
/// consumer blocks the workers, which bounds memory.
pub const OUTPUT_CHANNEL_SIZE: usize = 64;

/// Splits a byte stream on newline boundaries into [`OutputLine`] messages
/// while accumulating the full stream for the result.
///
/// A short last line with no newline is still delivered on
/// [`flush`](Self::flush).
pub struct LineBuffer {
    host: String,
    stderr: bool,
    sender: Option<mpsc::Sender<OutputLine>>,
    buf: Vec<u8>,
    emitted: usize,
}

impl LineBuffer {
    /// Creates a buffer; with `sender = None` it only accumulates.
    pub fn new(host: impl Into<String>, stderr: bool, sender: Option<mpsc::Sender<OutputLine>>) -> Self {
        Self {
            host: host.into(),
            stderr,
            sender,
            buf: Vec::new(),
            emitted: 0,
        }
    }

    /// Appends bytes, emitting any newly completed lines.
    pub async fn write(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
        if self.sender.is_none() {
            return;
        }
        while let Some(offset) = self.buf[self.emitted..].iter().position(|&b| b == b'\n') {
            let end = self.emitted + offset + 1;
            let line = self.buf[self.emitted..end].to_vec();
            self.emitted = end;
            self.send(line).await;
        }
    }

    /// Emits any trailing partial line.
    pub async fn flush(&mut self) {
        if self.sender.is_some() && self.emitted < self.buf.len() {
            let line = self.buf[self.emitted..].to_vec();
            self.emitted = self.buf.len();
            self.send(line).await;
        }
    }

    async fn send(&mut self, data: Vec<u8>) {
        if let Some(sender) = &self.sender {
            let line = OutputLine {
                host: self.host.clone(),
                stderr: self.stderr,
                data,
            };
            if sender.send(line).await.is_err() {
                // Consumer went away; keep accumulating silently.
                self.sender = None;
            }
        }
    }

    /// The full accumulated stream.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Spawns the single consumer draining a streaming channel, printing each
/// line prefixed with its host name.
pub fn spawn_line_printer(mut receiver: mpsc::Receiver<OutputLine>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(line) = receiver.recv().await {
            let text = String::from_utf8_lossy(&line.data);
            let text = text.trim_end_matches('\n');
            if line.stderr {
                eprintln!("{} {}", line.host.cyan(), text.red());
            } else {
                println!("{} {}", line.host.cyan(), text);
            }
        }
    })
}

/// Prints a completed run according to the output mode.
///
/// `inline` already streamed its lines, so only failures are summarised;
/// `pager` renders like `all` (paging itself is left to the terminal).
pub fn print_history_item(item: &HistoryItem, mode: OutputMode) {
    match mode {
        OutputMode::Inline => print_summary(&item.results),
        OutputMode::All | OutputMode::Pager => {
            for (name, result) in &item.results {
                print_host_result(name, result, false);
            }
            print_summary(&item.results);
        }
        OutputMode::PerHost => {
            for (name, result) in &item.results {
                print_host_result(name, result, true);
            }
            print_summary(&item.results);
        }
    }
}

fn print_host_result(name: &str, result: &RunResult, header: bool) {
    if header {
        println!("{}", format!("==== {} ====", name).bold());
    } else {
        let status = if result.success() {
            "ok".green()
        } else {
            "failed".red()
        };
        println!(
            "{} {} ({:.2}s)",
            name.cyan().bold(),
            status,
            result.elapsed_time
        );
    }
    let stdout = String::from_utf8_lossy(&result.stdout);
    for line in stdout.lines() {
        println!("    {}", line);
    }
    let stderr = String::from_utf8_lossy(&result.stderr);
    for line in stderr.lines() {
        println!("    {}", line.red());
    }
    if let Some(err) = &result.err {
        println!("    {}", err.to_string().red());
    }
}

fn print_summary(results: &BTreeMap<String, RunResult>) {
    let failed = results.values().filter(|r| !r.success()).count();
    let ok = results.len() - failed;
    if failed == 0 {
        println!("{}", format!("{} hosts ok", ok).green());
    } else {
        println!(
            "{}",
            format!("{} hosts ok, {} hosts failed", ok, failed).yellow()
        );
    }
}

/// Prints a host list, one host per line with the requested attributes.
///
/// `oneline` joins the names with commas; `csv` emits a header row and
/// comma-separated values.
pub fn print_host_list(hosts: &HostSet, attributes: &[String], oneline: bool, csv: bool) {
    if oneline {
        let names: Vec<&str> = hosts.iter().map(|h| h.name.as_str()).collect();
        println!("{}", names.join(","));
        return;
    }
    if csv {
        let mut header = vec!["name".to_string()];
        header.extend(attributes.iter().cloned());
        println!("{}", header.join(","));
    }
    for host in hosts {
        print_host_line(host, attributes, csv);
    }
}

fn print_host_line(host: &Host, attributes: &[String], csv: bool) {
    if attributes.is_empty() {
        println!("{}", host.name);
        return;
    }
    let values: Vec<String> = attributes
        .iter()
        .map(|a| {
            host.get_attribute(a)
                .map(|v| v.to_string())
                .unwrap_or_default()
        })
        .collect();
    if csv {
        println!("{},{}", host.name, values.join(","));
    } else {
        println!("{} {}", host.name, values.join(" "));
    }
}
