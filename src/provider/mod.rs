//! Host providers and the loading pipeline.
//!
//! A provider is a source of host definitions: a static file, a subprocess
//! plugin, the SSH known-hosts file, or a cache wrapped around any of them.
//! Providers are registered by kind in a process-wide registry at startup;
//! the [`Loader`] builds provider instances from configuration, loads them
//! all concurrently under a shared cancellation token, and merges the
//! results by host name in configured provider order.

pub mod cache;
pub mod file;
pub mod known_hosts;
pub mod plugin;

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::host::{Host, PROVIDER_ATTRIBUTE};
use crate::value::Value;

/// Progress callback: `(provider name, done, error)`.
///
/// Every provider load reports at least one `done = false` at start and one
/// `done = true` at finish or failure.
pub type LoadProgress = Arc<dyn Fn(&str, bool, Option<&Error>) + Send + Sync>;

/// A source of host definitions.
#[async_trait]
pub trait HostProvider: Send + Sync {
    /// Instance name, as configured.
    fn name(&self) -> &str;

    /// Prefix prepended to every attribute this provider contributes.
    fn prefix(&self) -> &str {
        ""
    }

    /// Applies the provider's configuration table.
    fn parse_config(&mut self, options: &toml::Table) -> Result<()>;

    /// True when the other provider would load the same data; used to
    /// collapse duplicate definitions.
    fn equivalent(&self, other: &dyn HostProvider) -> bool;

    /// Downcast support for [`equivalent`](Self::equivalent).
    fn as_any(&self) -> &dyn Any;

    /// Loads the provider's hosts.
    async fn load(&self, token: CancellationToken, progress: LoadProgress) -> Result<Vec<Host>>;

    /// Releases provider resources (subprocesses, sockets) at engine
    /// teardown.
    async fn shutdown(&self) {}
}

type Constructor = fn(name: &str) -> Box<dyn HostProvider>;

static REGISTRY: Lazy<RwLock<HashMap<&'static str, Constructor>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Registers a provider kind. Call at startup, before any command runs;
/// the registry is read-only afterwards.
pub fn register_provider(kind: &'static str, constructor: Constructor) {
    REGISTRY.write().insert(kind, constructor);
}

/// Instantiates a provider of the given kind.
pub fn new_provider(kind: &str, name: &str) -> Result<Box<dyn HostProvider>> {
    let registry = REGISTRY.read();
    let constructor = registry
        .get(kind)
        .ok_or_else(|| Error::config(format!("unknown provider type: {}", kind)))?;
    Ok(constructor(name))
}

/// Registers the built-in provider kinds.
pub fn register_builtin_providers() {
    register_provider("file", |name| Box::new(file::FileProvider::new(name)));
    register_provider("plugin", |name| Box::new(plugin::PluginProvider::new(name)));
    register_provider("known_hosts", |name| {
        Box::new(known_hosts::KnownHostsProvider::new(name))
    });
}

/// Builds providers from configuration and loads them concurrently.
#[derive(Default)]
pub struct Loader {
    providers: Vec<Arc<dyn HostProvider>>,
    allow_partial: bool,
}

impl Loader {
    /// A loader with no providers; loading yields an empty universe.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a loader from the `[providers.*]` configuration tables,
    /// collapsing equivalent definitions and wrapping cached providers.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut loader = Loader {
            providers: Vec::new(),
            allow_partial: config.settings.ignore_provider_errors,
        };
        // The known-hosts provider is always on; it contributes public keys
        // for host key verification.
        loader.add(Box::new(known_hosts::KnownHostsProvider::new("known_hosts")));
        for (name, options) in &config.providers {
            let kind = options
                .get("provider")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    Error::config(format!("provider '{}' is missing the provider key", name))
                })?;
            let mut provider = new_provider(kind, name)?;
            provider.parse_config(options)?;
            let provider = cache::maybe_wrap(provider, options, &config.settings)?;
            loader.add(provider);
        }
        Ok(loader)
    }

    /// Adds a provider unless an equivalent one is already present.
    pub fn add(&mut self, provider: Box<dyn HostProvider>) {
        if self
            .providers
            .iter()
            .any(|existing| existing.equivalent(provider.as_ref()))
        {
            debug!(provider = provider.name(), "Skipping equivalent provider");
            return;
        }
        self.providers.push(provider.into());
    }

    /// The configured providers, in priority order.
    pub fn providers(&self) -> &[Arc<dyn HostProvider>] {
        &self.providers
    }

    /// Loads all providers in parallel and merges the result into the
    /// universe.
    ///
    /// Hosts are grouped by name; within a group, attributes merge in
    /// provider priority order (last writer wins, provider lists append).
    /// Provider failures abort the load unless partial data was opted into.
    pub async fn load(
        &self,
        token: CancellationToken,
        progress: LoadProgress,
    ) -> Result<Vec<Arc<Host>>> {
        let mut handles = Vec::with_capacity(self.providers.len());
        for (index, provider) in self.providers.iter().enumerate() {
            let provider = provider.clone();
            let token = token.clone();
            let progress = progress.clone();
            handles.push(tokio::spawn(async move {
                progress(provider.name(), false, None);
                let outcome = provider.load(token, progress.clone()).await;
                match &outcome {
                    Ok(hosts) => {
                        debug!(provider = provider.name(), hosts = hosts.len(), "Provider loaded");
                        progress(provider.name(), true, None);
                    }
                    Err(err) => {
                        error!(provider = provider.name(), error = %err, "Provider failed");
                        progress(provider.name(), true, Some(err));
                    }
                }
                (index, provider, outcome)
            }));
        }

        let mut loaded: Vec<(usize, Arc<dyn HostProvider>, Vec<Host>)> = Vec::new();
        for handle in handles {
            let (index, provider, outcome) = handle
                .await
                .map_err(|e| Error::provider("loader", e.to_string()))?;
            match outcome {
                Ok(hosts) => loaded.push((index, provider, hosts)),
                Err(err) => {
                    if !self.allow_partial {
                        return Err(err);
                    }
                    warn!(error = %err, "Continuing with partial data");
                }
            }
        }
        loaded.sort_by_key(|(index, _, _)| *index);

        let mut universe: indexmap::IndexMap<String, Host> = indexmap::IndexMap::new();
        for (_, provider, hosts) in loaded {
            for mut host in hosts {
                host.apply_attribute_prefix(provider.prefix());
                host.attributes.insert(
                    PROVIDER_ATTRIBUTE.to_string(),
                    Value::List(vec![Value::String(provider.name().to_string())]),
                );
                match universe.get_mut(&host.name) {
                    Some(existing) => existing.amend(host),
                    None => {
                        universe.insert(host.name.clone(), host);
                    }
                }
            }
        }
        Ok(universe.into_values().map(Arc::new).collect())
    }

    /// Shuts down all providers.
    pub async fn shutdown(&self) {
        for provider in &self.providers {
            provider.shutdown().await;
        }
    }
}

/// A progress callback that logs and otherwise ignores reports.
pub fn silent_progress() -> LoadProgress {
    Arc::new(|name, done, err| match err {
        Some(err) => debug!(provider = name, error = %err, "load finished"),
        None => debug!(provider = name, done, "load progress"),
    })
}
