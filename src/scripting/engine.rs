//! Command queue execution.
//!
//! The engine owns the active host set, the runtime settings, and the
//! history. Commands are queued by the parsers and drained in order; a
//! failing command surfaces its error to the logger but does not abort the
//! queue. The universe is loaded from the provider layer once, on the first
//! command that needs it.

use std::sync::Arc;

use indexmap::IndexMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::{OutputMode, Settings};
use crate::error::Result;
use crate::history::History;
use crate::host::Host;
use crate::hostset::HostSet;
use crate::output;
use crate::provider::{LoadProgress, Loader};
use crate::runner::{Executor, Runner};

use super::parser;
use super::Command;

/// Interactive help text, per topic.
const HELP_TOPICS: &[(&str, &str)] = &[
    ("add", "add hosts GLOB [FILTERS]    add matching hosts to the active set"),
    ("remove", "remove hosts GLOB [FILTERS] remove matching hosts from the active set"),
    ("list", "list hosts [oneline] [csv] [ATTR...]  print the active set"),
    ("run", "run COMMAND...              run a command on all active hosts"),
    ("set", "set OPTION VALUE            change Parallel, Timeout, HostTimeout,\n                            ConnectTimeout, Output, LogLevel, HistoryDir or CacheDir"),
    ("exit", "exit                        leave the interactive loop"),
];

/// Parses and executes command queues against the active host set.
pub struct ScriptEngine {
    settings: Settings,
    loader: Loader,
    executor: Arc<dyn Executor>,
    universe: Option<Vec<Arc<Host>>>,
    active: HostSet,
    commands: Vec<Command>,
    history: History,
    host_failures: usize,
    errors: usize,
    sample_count: usize,
    sample_attributes: Vec<String>,
}

impl ScriptEngine {
    /// Creates an engine with an empty active set and command queue.
    pub fn new(settings: Settings, loader: Loader, executor: Arc<dyn Executor>) -> Self {
        executor.set_connect_timeout(settings.connect_timeout);
        Self {
            settings,
            loader,
            executor,
            universe: None,
            active: HostSet::new(),
            commands: Vec::new(),
            history: History::new(),
            host_failures: 0,
            errors: 0,
            sample_count: 0,
            sample_attributes: Vec::new(),
        }
    }

    /// Applies deterministic sampling to every subsequent `add` parsed from
    /// the command line: keep `count` hosts per group of equal `attributes`
    /// values.
    pub fn set_sampling(&mut self, count: usize, attributes: Vec<String>) {
        self.sample_count = count;
        self.sample_attributes = attributes;
    }

    /// Parses an argument vector into the queue. `split_at` is the index of
    /// the `--` separator, when present.
    pub fn parse_command_line(&mut self, args: &[String], split_at: Option<usize>) -> Result<()> {
        let mut commands = parser::parse_command_line(args, split_at)?;
        if self.sample_count > 0 {
            for command in &mut commands {
                if let Command::AddHosts { sampled, count, .. } = command {
                    *count = self.sample_count;
                    *sampled = self.sample_attributes.clone();
                }
            }
        }
        self.commands.extend(commands);
        Ok(())
    }

    /// Parses one interactive line into the queue.
    pub fn parse_code_line(&mut self, line: &str) -> Result<()> {
        if let Some(command) = parser::parse_code_line(line)? {
            self.commands.push(command);
        }
        Ok(())
    }

    /// The queued, not yet executed commands.
    pub fn queued_commands(&self) -> &[Command] {
        &self.commands
    }

    /// The current active host set.
    pub fn active_hosts(&self) -> &HostSet {
        &self.active
    }

    /// The current runtime settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Hosts that failed across all runs so far.
    pub fn host_failures(&self) -> usize {
        self.host_failures
    }

    /// Engine-level errors (provider load, bad option) so far.
    pub fn errors(&self) -> usize {
        self.errors
    }

    /// Drains the queue. A failing command is logged and counted;
    /// subsequent commands still run.
    pub async fn execute(&mut self) {
        let commands = std::mem::take(&mut self.commands);
        for command in commands {
            debug!(command = ?command, "Executing command");
            if let Err(err) = self.execute_one(command).await {
                error!("{}", err);
                self.errors += 1;
            }
        }
    }

    async fn execute_one(&mut self, command: Command) -> Result<()> {
        match command {
            Command::AddHosts {
                glob,
                attributes,
                sampled,
                count,
            } => {
                let universe = self.ensure_universe().await?;
                let mut matched: HostSet = universe
                    .iter()
                    .filter(|host| host.matches(&glob, &attributes))
                    .cloned()
                    .collect();
                matched.sort(&[]);
                let selected = if count > 0 {
                    sample_groups(&matched, count, &sampled, &glob)
                } else {
                    matched
                };
                self.active.extend(selected.iter().cloned());
                self.active.uniq();
                self.active.sort(&[]);
            }
            Command::RemoveHosts { glob, attributes } => {
                self.ensure_universe().await?;
                self.active.retain(|host| !host.matches(&glob, &attributes));
            }
            Command::ListHosts {
                oneline,
                csv,
                attributes,
            } => {
                output::print_host_list(&self.active, &attributes, oneline, csv);
            }
            Command::Set { key, value } => {
                self.settings.set(&key, &value)?;
                if key == "ConnectTimeout" {
                    self.executor.set_connect_timeout(self.settings.connect_timeout);
                }
            }
            Command::Run { command } => {
                let runner = Runner::new(
                    self.executor.clone(),
                    self.settings.parallel,
                    self.settings.timeout,
                    self.settings.host_timeout,
                );
                let (sender, printer) = match self.settings.output {
                    OutputMode::Inline => {
                        let (tx, rx) = mpsc::channel(output::OUTPUT_CHANNEL_SIZE);
                        (Some(tx), Some(output::spawn_line_printer(rx)))
                    }
                    _ => (None, None),
                };
                let item = runner.run(&self.active, &command, sender).await;
                if let Some(printer) = printer {
                    let _ = printer.await;
                }
                output::print_history_item(&item, self.settings.output);
                self.host_failures += item.failures();
                self.history.push(item);
            }
            Command::Help { topic } => {
                for (name, text) in HELP_TOPICS {
                    if topic.is_empty() || *name == topic {
                        println!("{}", text);
                    }
                }
            }
        }
        Ok(())
    }

    // One-shot universe load, triggered by the first add or remove.
    async fn ensure_universe(&mut self) -> Result<&[Arc<Host>]> {
        if self.universe.is_none() {
            info!("Loading hosts from providers");
            let progress: LoadProgress = Arc::new(|name, done, err| match (done, err) {
                (true, Some(err)) => error!(provider = name, "{}", err),
                (true, None) => debug!(provider = name, "Loaded"),
                (false, _) => debug!(provider = name, "Loading"),
            });
            let hosts = self.loader.load(CancellationToken::new(), progress).await?;
            info!(hosts = hosts.len(), "Universe loaded");
            self.universe = Some(hosts);
        }
        Ok(self.universe.as_deref().expect("universe was just loaded"))
    }

    /// Writes the history journal; failure is logged, not fatal.
    pub fn save_history(&self) {
        if self.history.items().is_empty() {
            return;
        }
        match self.history.save(&self.settings.history_dir) {
            Ok(path) => debug!(path = %path.display(), "History saved"),
            Err(err) => error!(error = %err, "Unable to save history"),
        }
    }

    /// Tears the engine down: closes pooled connections and shuts down the
    /// providers.
    pub async fn end(&mut self) {
        if let Some(universe) = &self.universe {
            for host in universe {
                if let Some(connection) = host.take_connection().await {
                    connection.close().await;
                }
            }
        }
        self.loader.shutdown().await;
    }
}

// Deterministic sampling: group by the values of the sampled attributes
// (one group seeded by the glob when the list is empty) and keep `count`
// hosts per group.
fn sample_groups(hosts: &HostSet, count: usize, sampled: &[String], glob: &str) -> HostSet {
    if sampled.is_empty() {
        return hosts.sample(count, glob);
    }
    let mut groups: IndexMap<String, HostSet> = IndexMap::new();
    for host in hosts {
        let seed = sampled
            .iter()
            .map(|attribute| {
                host.get_attribute(attribute)
                    .and_then(|v| v.coerce_str())
                    .unwrap_or_default()
            })
            .collect::<Vec<_>>()
            .join("\x1f");
        groups.entry(seed).or_default().push(host.clone());
    }
    let mut selected = HostSet::new();
    for (seed, group) in groups {
        selected.extend(group.sample(count, &seed).iter().cloned());
    }
    selected.sort(&[]);
    selected
}
