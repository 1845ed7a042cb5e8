//! The script engine.
//!
//! Commands arrive either as a command-line argument vector (filter groups
//! separated by `+` and `-`, with everything after `--` becoming a single
//! `run`) or as interactive single-line input. Both parse into the same
//! [`Command`] queue, which the engine executes in order against the active
//! host set.

pub mod engine;
pub mod parser;

pub use engine::ScriptEngine;

use crate::matcher::MatchAttributes;

/// A queued engine command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Add matching universe hosts to the active set.
    AddHosts {
        /// Hostname glob, `*` when implicit
        glob: String,
        /// Conjunctive attribute filters
        attributes: MatchAttributes,
        /// Attribute names grouping a deterministic sample
        sampled: Vec<String>,
        /// Hosts to keep per sample group; 0 disables sampling
        count: usize,
    },
    /// Remove matching hosts from the active set.
    RemoveHosts {
        /// Hostname glob
        glob: String,
        /// Conjunctive attribute filters
        attributes: MatchAttributes,
    },
    /// Print the active set.
    ListHosts {
        /// Join all names on one comma-separated line
        oneline: bool,
        /// Emit CSV with a header row
        csv: bool,
        /// Extra attributes to print per host
        attributes: Vec<String>,
    },
    /// Change a runtime option.
    Set {
        /// Option name (`Parallel`, `Timeout`, …)
        key: String,
        /// New value in textual form
        value: String,
    },
    /// Run a shell command on the active set.
    Run {
        /// The command line to execute remotely
        command: String,
    },
    /// Print interactive help.
    Help {
        /// Optional topic
        topic: String,
    },
}
