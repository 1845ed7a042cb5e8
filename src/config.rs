//! Runtime configuration.
//!
//! Settings are loaded from a TOML file (project `herd.toml`, then
//! `~/.config/herd/config.toml`), overridden by `HERD_*` environment
//! variables, and finally mutated at runtime through the script engine's
//! `set` command.

use std::path::{Path, PathBuf};
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Output formatter selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OutputMode {
    /// Print all results per host once the run completes
    #[default]
    All,
    /// Stream output lines as they arrive, prefixed with the host name
    Inline,
    /// Like `all`, handed to a pager
    Pager,
    /// Per-host blocks with headers
    PerHost,
}

impl std::str::FromStr for OutputMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(OutputMode::All),
            "inline" => Ok(OutputMode::Inline),
            "pager" => Ok(OutputMode::Pager),
            "per-host" => Ok(OutputMode::PerHost),
            _ => Err(Error::config(format!("unknown output mode: {}", s))),
        }
    }
}

/// Log verbosity, as exposed through the `LogLevel` option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Everything, including per-connection detail
    Debug,
    /// Normal operation
    #[default]
    Info,
    /// Problems that do not stop the run
    Warning,
    /// Failures only
    Error,
}

impl LogLevel {
    /// The equivalent tracing filter directive.
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARNING" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            _ => Err(Error::config(format!("unknown log level: {}", s))),
        }
    }
}

/// The runtime options recognised by the `set` command and the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Settings {
    /// Concurrent worker count
    pub parallel: usize,

    /// Whole-run deadline
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Per-host deadline
    #[serde(with = "humantime_serde")]
    pub host_timeout: Duration,

    /// Dial deadline
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Deadline for SSH agent signing operations
    #[serde(with = "humantime_serde")]
    pub agent_timeout: Duration,

    /// Output formatter
    pub output: OutputMode,

    /// Log verbosity
    pub log_level: LogLevel,

    /// Journal location
    pub history_dir: PathBuf,

    /// Cache provider root
    pub cache_dir: PathBuf,

    /// Proceed with partial data when a provider fails to load
    pub ignore_provider_errors: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            parallel: 50,
            timeout: Duration::from_secs(60),
            host_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(3),
            agent_timeout: Duration::from_secs(5),
            output: OutputMode::default(),
            log_level: LogLevel::default(),
            history_dir: default_history_dir(),
            cache_dir: default_cache_dir(),
            ignore_provider_errors: false,
        }
    }
}

fn default_history_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("herd")
        .join("history")
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("herd")
}

impl Settings {
    /// Mutates one option from its textual form, as used by `set`.
    ///
    /// Option names follow the documented spelling (`Parallel`, `Timeout`,
    /// `HostTimeout`, `ConnectTimeout`, `Output`, `LogLevel`, `HistoryDir`,
    /// `CacheDir`).
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "Parallel" => {
                let n: usize = value
                    .parse()
                    .map_err(|_| Error::config(format!("invalid number: {}", value)))?;
                if n == 0 {
                    return Err(Error::config("Parallel must be at least 1"));
                }
                self.parallel = n;
            }
            "Timeout" => self.timeout = parse_duration(value)?,
            "HostTimeout" => self.host_timeout = parse_duration(value)?,
            "ConnectTimeout" => self.connect_timeout = parse_duration(value)?,
            "Output" => self.output = value.parse()?,
            "LogLevel" => self.log_level = value.parse()?,
            "HistoryDir" => self.history_dir = expand_path(value),
            "CacheDir" => self.cache_dir = expand_path(value),
            _ => return Err(Error::parse(format!("unknown option: {}", key))),
        }
        Ok(())
    }

    /// True when `key` names a settable option.
    pub fn is_option(key: &str) -> bool {
        matches!(
            key,
            "Parallel"
                | "Timeout"
                | "HostTimeout"
                | "ConnectTimeout"
                | "Output"
                | "LogLevel"
                | "HistoryDir"
                | "CacheDir"
        )
    }
}

fn parse_duration(value: &str) -> Result<Duration> {
    humantime::parse_duration(value)
        .map_err(|_| Error::config(format!("invalid duration: {}", value)))
}

/// Expands `~` and environment variables in a path value.
pub fn expand_path(value: &str) -> PathBuf {
    PathBuf::from(
        shellexpand::full(value)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| value.to_string()),
    )
}

/// Top-level configuration: runtime settings plus provider definitions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Runtime options
    #[serde(flatten)]
    pub settings: Settings,

    /// Provider definitions, keyed by instance name
    pub providers: IndexMap<String, toml::Table>,
}

impl Config {
    /// Loads configuration from an explicit path, or from the default
    /// locations (`./herd.toml`, then `~/.config/herd/config.toml`). A
    /// missing file yields the defaults; a malformed one is fatal.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let candidates: Vec<PathBuf> = match path {
            Some(p) => vec![p.to_path_buf()],
            None => {
                let mut paths = vec![PathBuf::from("herd.toml")];
                if let Some(config_dir) = dirs::config_dir() {
                    paths.push(config_dir.join("herd").join("config.toml"));
                }
                paths
            }
        };

        let mut config = Config::default();
        for candidate in candidates {
            if candidate.exists() {
                let content = std::fs::read_to_string(&candidate)?;
                config = toml::from_str(&content)?;
                break;
            }
        }
        config.apply_env();
        Ok(config)
    }

    // HERD_PARALLEL=100, HERD_TIMEOUT=2m, etc. override the file.
    fn apply_env(&mut self) {
        for (key, option) in [
            ("HERD_PARALLEL", "Parallel"),
            ("HERD_TIMEOUT", "Timeout"),
            ("HERD_HOST_TIMEOUT", "HostTimeout"),
            ("HERD_CONNECT_TIMEOUT", "ConnectTimeout"),
            ("HERD_OUTPUT", "Output"),
            ("HERD_LOG_LEVEL", "LogLevel"),
            ("HERD_HISTORY_DIR", "HistoryDir"),
            ("HERD_CACHE_DIR", "CacheDir"),
        ] {
            if let Ok(value) = std::env::var(key) {
                if let Err(err) = self.settings.set(option, &value) {
                    tracing::warn!(variable = key, error = %err, "Ignoring environment override");
                }
            }
        }
    }
}
