//! # Herd - Parallel Remote Command Execution
//!
//! Herd discovers a fleet of hosts from heterogeneous providers, lets an
//! operator narrow that fleet with globs and attribute filters, then runs
//! shell commands concurrently across the surviving set while streaming
//! output and collecting per-host results.
//!
//! ## Core Concepts
//!
//! - **Hosts**: entities with a name, an address, and a dynamically typed
//!   attribute bag contributed by providers
//! - **Filters**: conjunctions of attribute predicates plus a hostname glob
//! - **Providers**: sources of host definitions (files, subprocess plugins,
//!   the known-hosts file, cache wrappers)
//! - **The active set**: the subset of the universe the next `run` acts on
//! - **The runner**: bounded fan-out of the SSH executor with per-host and
//!   per-batch deadlines
//! - **History**: every executed command with its per-host results,
//!   journalled as JSON
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use herd::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load(None)?;
//!     herd::provider::register_builtin_providers();
//!     let loader = Loader::from_config(&config)?;
//!     let executor = Arc::new(
//!         SshExecutor::new(config.settings.agent_timeout, config.settings.connect_timeout)
//!             .await?,
//!     );
//!
//!     let mut engine = ScriptEngine::new(config.settings.clone(), loader, executor);
//!     engine.parse_code_line("add hosts *.example.com role=db")?;
//!     engine.parse_code_line("run uptime")?;
//!     engine.execute().await;
//!     engine.save_history();
//!     engine.end().await;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]

/// Error types and result alias.
pub mod error;

/// Dynamically typed attribute values.
pub mod value;

/// The host entity: attributes, matching, merging, ordering.
pub mod host;

/// Ordered deduplicated host collections with deterministic sampling.
pub mod hostset;

/// Attribute match expressions.
pub mod matcher;

/// Per-host results, streamed output lines, and history items.
pub mod result;

/// The history journal.
pub mod history;

/// Runtime settings and configuration loading.
pub mod config;

/// Host providers: registry, loader, and the built-in provider kinds.
pub mod provider;

/// SSH transport: agent, client configuration, host keys, executor.
pub mod ssh;

/// Bounded fan-out of an executor over a host set.
pub mod runner;

/// Command parsing and the script engine.
pub mod scripting;

/// Output formatting and the streaming line printer.
pub mod output;

/// Convenient re-exports of the commonly used types.
pub mod prelude {
    pub use crate::config::{Config, LogLevel, OutputMode, Settings};
    pub use crate::error::{Error, Result};
    pub use crate::history::History;
    pub use crate::host::{Attributes, Host};
    pub use crate::hostset::HostSet;
    pub use crate::matcher::{MatchAttribute, MatchAttributes};
    pub use crate::provider::{HostProvider, Loader};
    pub use crate::result::{HistoryItem, OutputLine, RunError, RunResult};
    pub use crate::runner::{Executor, Runner};
    pub use crate::scripting::{Command, ScriptEngine};
    pub use crate::ssh::SshExecutor;
}

/// Returns the current version of Herd.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
