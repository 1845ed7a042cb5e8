//! SSH transport: configuration, agent, host key verification, and the
//! executor that runs commands on hosts.

pub mod agent;
pub mod config;
pub mod dns;
pub mod executor;

pub use agent::Agent;
pub use config::{ConfigBlock, SshConfig, StrictHostKeyChecking};
pub use executor::SshExecutor;
