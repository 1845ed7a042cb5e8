//! Static file provider.
//!
//! Loads hosts from a JSON document: a list of `{Name, Address, Attributes}`
//! objects, the same wire shape plugins use.

use std::any::Any;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::expand_path;
use crate::error::{Error, Result};
use crate::host::Host;

use super::{HostProvider, LoadProgress};

/// Provider reading a static JSON host list.
pub struct FileProvider {
    name: String,
    prefix: String,
    path: PathBuf,
}

impl FileProvider {
    /// Creates an unconfigured file provider.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix: String::new(),
            path: PathBuf::new(),
        }
    }

    /// Creates a provider for an explicit path.
    pub fn at(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            prefix: String::new(),
            path: path.into(),
        }
    }
}

#[async_trait]
impl HostProvider for FileProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn parse_config(&mut self, options: &toml::Table) -> Result<()> {
        self.path = options
            .get("file")
            .and_then(|v| v.as_str())
            .map(expand_path)
            .ok_or_else(|| {
                Error::config(format!("provider '{}' is missing the file key", self.name))
            })?;
        if let Some(prefix) = options.get("prefix").and_then(|v| v.as_str()) {
            self.prefix = prefix.to_string();
        }
        Ok(())
    }

    fn equivalent(&self, other: &dyn HostProvider) -> bool {
        other
            .as_any()
            .downcast_ref::<Self>()
            .is_some_and(|o| o.path == self.path)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn load(&self, _token: CancellationToken, _progress: LoadProgress) -> Result<Vec<Host>> {
        debug!(provider = %self.name, path = %self.path.display(), "Reading host file");
        let content = tokio::fs::read(&self.path)
            .await
            .map_err(|e| Error::provider(&self.name, format!("{}: {}", self.path.display(), e)))?;
        let hosts: Vec<Host> = serde_json::from_slice(&content)
            .map_err(|e| Error::provider(&self.name, format!("{}: {}", self.path.display(), e)))?;
        Ok(hosts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::silent_progress;
    use crate::value::Value;
    use std::io::Write;

    #[tokio::test]
    async fn test_load_parses_wire_shape() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"Name": "a.example.com", "Address": "10.0.0.1", "Attributes": {{"role": "db", "weight": 3}}}},
                {{"Name": "b.example.com", "Attributes": {{"role": "web"}}}}
            ]"#
        )
        .unwrap();

        let provider = FileProvider::at("inventory", file.path());
        let hosts = provider
            .load(CancellationToken::new(), silent_progress())
            .await
            .unwrap();
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[0].address, "10.0.0.1");
        assert_eq!(hosts[0].attributes.get("weight"), Some(&Value::Int(3)));
        assert_eq!(
            hosts[1].attributes.get("domainname"),
            Some(&Value::String("example.com".into()))
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_a_provider_error() {
        let provider = FileProvider::at("inventory", "/nonexistent/hosts.json");
        let err = provider
            .load(CancellationToken::new(), silent_progress())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provider { .. }));
    }
}
