//! CLI surface.
//!
//! Three commands: `run` executes a command on the matching hosts and
//! exits, `interactive` seeds the active set and enters the line loop, and
//! `list` prints the matching host set.

pub mod interactive;

use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

/// Run commands on a herd of hosts in parallel over SSH.
#[derive(Parser, Debug)]
#[command(name = "herd")]
#[command(version)]
#[command(about = "Run commands on a herd of hosts in parallel over SSH", long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the configuration file
    #[arg(short, long, global = true, env = "HERD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a single command on all matching hosts
    Run(RunArgs),

    /// Interactive shell for running commands on a set of hosts
    Interactive(InteractiveArgs),

    /// Print the matching hosts
    List(ListArgs),
}

/// Sampling flags shared by the subcommands.
#[derive(Args, Debug, Clone)]
pub struct SampleArgs {
    /// Keep only COUNT hosts per sample group of each added match
    #[arg(long, value_name = "COUNT")]
    pub count: Option<usize>,

    /// Group sampled hosts by this attribute (repeatable)
    #[arg(long = "sample", value_name = "ATTR")]
    pub sample: Vec<String>,
}

/// Arguments for `run`.
#[derive(Args, Debug)]
#[command(about = "run GLOB [FILTERS] [+|- GLOB [FILTERS]...] -- COMMAND...")]
pub struct RunArgs {
    /// Filter groups: GLOB [NAME=VALUE...], separated by + and -
    #[arg(value_name = "GLOB|FILTER")]
    pub filters: Vec<String>,

    /// The command to run, after --
    #[arg(last = true, required = true, value_name = "COMMAND")]
    pub command: Vec<String>,

    #[command(flatten)]
    pub sampling: SampleArgs,
}

/// Arguments for `interactive`.
#[derive(Args, Debug)]
pub struct InteractiveArgs {
    /// Initial filter groups seeding the active set
    #[arg(value_name = "GLOB|FILTER", allow_hyphen_values = true)]
    pub filters: Vec<String>,

    #[command(flatten)]
    pub sampling: SampleArgs,
}

/// Arguments for `list`.
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Filter groups selecting the hosts to print
    #[arg(value_name = "GLOB|FILTER", allow_hyphen_values = true)]
    pub filters: Vec<String>,

    /// Join all names on one comma-separated line
    #[arg(long)]
    pub oneline: bool,

    /// Emit CSV with a header row
    #[arg(long)]
    pub csv: bool,

    /// Attribute to print per host (repeatable)
    #[arg(short, long = "attribute", value_name = "ATTR")]
    pub attributes: Vec<String>,

    #[command(flatten)]
    pub sampling: SampleArgs,
}
