//! Known-hosts provider.
//!
//! Parses the user and system `known_hosts` files into hosts carrying their
//! recorded public keys, which seeds host key verification for every other
//! provider's hosts through the merge.

use std::any::Any;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Result;
use crate::host::{Attributes, Host};

use super::{HostProvider, LoadProgress};

/// Provider reading `~/.ssh/known_hosts` and `/etc/ssh/ssh_known_hosts`.
pub struct KnownHostsProvider {
    name: String,
    paths: Vec<PathBuf>,
}

impl KnownHostsProvider {
    /// Creates the provider with the standard file locations.
    pub fn new(name: impl Into<String>) -> Self {
        let mut paths = Vec::new();
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".ssh").join("known_hosts"));
        }
        paths.push(PathBuf::from("/etc/ssh/ssh_known_hosts"));
        Self {
            name: name.into(),
            paths,
        }
    }

    /// Overrides the file locations; used by tests.
    pub fn with_paths(name: impl Into<String>, paths: Vec<PathBuf>) -> Self {
        Self {
            name: name.into(),
            paths,
        }
    }
}

#[async_trait]
impl HostProvider for KnownHostsProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn parse_config(&mut self, _options: &toml::Table) -> Result<()> {
        Ok(())
    }

    fn equivalent(&self, other: &dyn HostProvider) -> bool {
        other
            .as_any()
            .downcast_ref::<Self>()
            .is_some_and(|o| o.paths == self.paths)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn load(&self, _token: CancellationToken, _progress: LoadProgress) -> Result<Vec<Host>> {
        let mut hosts: indexmap::IndexMap<String, Host> = indexmap::IndexMap::new();
        for path in &self.paths {
            let Ok(content) = tokio::fs::read_to_string(path).await else {
                continue;
            };
            for line in content.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                let mut parts = line.split_whitespace();
                let (Some(names), Some(_keytype), Some(keydata)) =
                    (parts.next(), parts.next(), parts.next())
                else {
                    continue;
                };
                // Hashed entries cannot be mapped back to a host name.
                if names.starts_with('|') {
                    continue;
                }
                let Ok(key) = russh_keys::parse_public_key_base64(keydata) else {
                    continue;
                };
                for name in names.split(',') {
                    // Bracketed [host]:port entries and wildcard patterns do
                    // not name a concrete host.
                    if name.contains('*') || name.contains('?') || name.starts_with('[') {
                        continue;
                    }
                    hosts
                        .entry(name.to_string())
                        .or_insert_with(|| Host::new(name, "", Attributes::new()))
                        .add_public_key(key.clone());
                }
            }
            debug!(provider = %self.name, path = %path.display(), "Parsed known hosts");
        }
        Ok(hosts.into_values().collect())
    }
}
