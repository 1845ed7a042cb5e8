//! Error types for Herd.
//!
//! A single error enum covers the failure classes the engine distinguishes:
//! parse errors (user input), configuration errors (fatal at startup),
//! provider errors (per-provider, reported during load), and the transport
//! family carried inside per-host results.

use thiserror::Error;

/// Result type alias for Herd operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Herd.
#[derive(Error, Debug)]
pub enum Error {
    /// Bad filter, unknown directive, malformed script line.
    #[error("{0}")]
    Parse(String),

    /// Malformed option value or provider definition. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// A provider failed to load its hosts.
    #[error("provider '{name}' failed: {message}")]
    Provider {
        /// Provider instance name
        name: String,
        /// What went wrong
        message: String,
    },

    /// Context expired at the connect or run stage.
    #[error("{0}")]
    Timeout(String),

    /// SSH dial, handshake, auth, or session error.
    #[error("{0}")]
    Transport(String),

    /// The remote command exited non-zero.
    #[error("command on '{host}' exited with status {status}")]
    Remote {
        /// Target host
        host: String,
        /// Reported exit status
        status: i32,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML decoding error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Creates a parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates a provider error.
    pub fn provider(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Returns the error code for CLI exit status.
    ///
    /// Parse errors exit 1, execution errors exit 2, everything else
    /// (configuration, IO) exits 1 as a generic failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Remote { .. } | Error::Timeout(_) | Error::Transport(_) => 2,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display_is_bare() {
        let err = Error::parse("incorrect filter: foo");
        assert_eq!(err.to_string(), "incorrect filter: foo");
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_execution_errors_exit_two() {
        let err = Error::Remote {
            host: "db1".into(),
            status: 3,
        };
        assert_eq!(err.exit_code(), 2);
    }
}
