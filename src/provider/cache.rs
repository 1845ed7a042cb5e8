//! Caching provider.
//!
//! Wraps another provider and serves its hosts from a JSON file under the
//! cache directory while the file is fresh, forwarding to the delegate and
//! writing through otherwise.

use std::any::Any;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::host::Host;

use super::{HostProvider, LoadProgress};

/// Wraps `provider` in a cache when its configuration carries a `cache`
/// lifetime, otherwise returns it untouched.
pub fn maybe_wrap(
    provider: Box<dyn HostProvider>,
    options: &toml::Table,
    settings: &Settings,
) -> Result<Box<dyn HostProvider>> {
    let Some(lifetime) = options.get("cache").and_then(|v| v.as_str()) else {
        return Ok(provider);
    };
    let lifetime = humantime::parse_duration(lifetime)
        .map_err(|_| Error::config(format!("invalid cache lifetime: {}", lifetime)))?;
    let file = settings
        .cache_dir
        .join(format!("{}.json", provider.name()));
    Ok(Box::new(CacheProvider::new(provider, lifetime, file)))
}

/// A provider that caches its delegate's hosts on disk.
pub struct CacheProvider {
    delegate: Box<dyn HostProvider>,
    lifetime: Duration,
    file: PathBuf,
}

impl CacheProvider {
    /// Wraps `delegate`, caching into `file` for `lifetime`.
    pub fn new(delegate: Box<dyn HostProvider>, lifetime: Duration, file: PathBuf) -> Self {
        Self {
            delegate,
            lifetime,
            file,
        }
    }

    fn is_fresh(&self) -> bool {
        let Ok(metadata) = std::fs::metadata(&self.file) else {
            return false;
        };
        let Ok(modified) = metadata.modified() else {
            return false;
        };
        SystemTime::now()
            .duration_since(modified)
            .map(|age| age < self.lifetime)
            .unwrap_or(false)
    }

    fn read_cache(&self) -> Result<Vec<Host>> {
        let content = std::fs::read(&self.file)?;
        Ok(serde_json::from_slice(&content)?)
    }

    fn write_cache(&self, hosts: &[Host]) -> Result<()> {
        if let Some(parent) = self.file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec(hosts)?;
        std::fs::write(&self.file, data)?;
        Ok(())
    }
}

#[async_trait]
impl HostProvider for CacheProvider {
    fn name(&self) -> &str {
        self.delegate.name()
    }

    fn prefix(&self) -> &str {
        self.delegate.prefix()
    }

    fn parse_config(&mut self, options: &toml::Table) -> Result<()> {
        self.delegate.parse_config(options)
    }

    fn equivalent(&self, other: &dyn HostProvider) -> bool {
        match other.as_any().downcast_ref::<Self>() {
            Some(o) => self.delegate.equivalent(o.delegate.as_ref()),
            None => self.delegate.equivalent(other),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn load(&self, token: CancellationToken, progress: LoadProgress) -> Result<Vec<Host>> {
        if self.is_fresh() {
            match self.read_cache() {
                Ok(hosts) => {
                    debug!(provider = self.name(), path = %self.file.display(), "Serving hosts from cache");
                    return Ok(hosts);
                }
                Err(err) => {
                    warn!(provider = self.name(), error = %err, "Discarding unreadable cache");
                }
            }
        }
        let hosts = self.delegate.load(token, progress).await?;
        if let Err(err) = self.write_cache(&hosts) {
            warn!(provider = self.name(), error = %err, "Unable to write cache");
        }
        Ok(hosts)
    }

    async fn shutdown(&self) {
        self.delegate.shutdown().await;
    }
}
