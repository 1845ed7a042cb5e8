//! The host entity.
//!
//! A host represents a remote machine. It can be instantiated manually, but
//! is usually produced by one or more providers, which all contribute to the
//! host's attribute bag. Runtime state (the cached transport, the last run
//! result, accepted public keys) lives behind locks so hosts can be shared
//! across workers as `Arc<Host>`.

use std::any::Any;
use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use russh_keys::key::PublicKey;
use serde::de::Deserializer;
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};

use crate::matcher::MatchAttributes;
use crate::result::{RunResult, UNKNOWN_EXIT_STATUS};
use crate::value::Value;

/// Attribute name listing the providers that contributed to a host.
pub const PROVIDER_ATTRIBUTE: &str = "herd_provider";

/// A host's attribute bag, in insertion order.
pub type Attributes = IndexMap<String, Value>;

/// A live transport attached to a host by an executor.
///
/// The concrete type is owned by the executor; the engine only needs to know
/// how to close it at teardown and whether it should be redialed.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// A protocol-level error has marked this connection unusable.
    fn is_dead(&self) -> bool;
    /// Marks the connection unusable; the next run will reconnect.
    fn mark_dead(&self);
    /// Closes the underlying transport.
    async fn close(&self);
    /// Downcast support for the owning executor.
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// A remote host with its attributes and runtime state.
pub struct Host {
    /// Host name, usually a fully qualified domain name
    pub name: String,
    /// Address to connect to; falls back to the name when empty
    pub address: String,
    /// Attribute bag
    pub attributes: Attributes,
    connection: Mutex<Option<Arc<dyn Connection>>>,
    public_keys: parking_lot::RwLock<Vec<PublicKey>>,
    last_result: parking_lot::RwLock<Option<Arc<RunResult>>>,
    csum: u32,
}

impl Host {
    /// Creates a host and initialises its derived attributes.
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        attributes: Attributes,
    ) -> Self {
        let mut host = Self {
            name: name.into(),
            address: address.into(),
            attributes,
            connection: Mutex::new(None),
            public_keys: parking_lot::RwLock::new(Vec::new()),
            last_result: parking_lot::RwLock::new(None),
            csum: 0,
        };
        host.init();
        host
    }

    // Derives hostname/domainname from the name and computes the checksum
    // backing the `random` attribute.
    fn init(&mut self) {
        self.csum = crc32fast::hash(self.name.as_bytes());
        let (hostname, domainname) = match self.name.split_once('.') {
            Some((h, d)) => (h.to_string(), d.to_string()),
            None => (self.name.clone(), String::new()),
        };
        self.attributes
            .insert("hostname".to_string(), Value::String(hostname));
        self.attributes
            .insert("domainname".to_string(), Value::String(domainname));
    }

    /// Adds a public key. Used by the known-hosts provider and by host key
    /// verification; duplicates are tolerated by the comparison path.
    pub fn add_public_key(&self, key: PublicKey) {
        self.public_keys.write().push(key);
    }

    /// The public keys known for this host.
    pub fn public_keys(&self) -> Vec<PublicKey> {
        self.public_keys.read().clone()
    }

    /// Looks up an attribute, falling back to the synthetic projections.
    ///
    /// The synthetic set is closed: `name`, `address`, `random`, and the
    /// last-result projections `stdout`, `stderr`, `exitstatus`, `err`.
    /// Stored attributes shadow synthetics.
    pub fn get_attribute(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.attributes.get(key) {
            return Some(value.clone());
        }
        match key {
            "name" => Some(Value::String(self.name.clone())),
            "address" => Some(Value::String(self.address.clone())),
            "random" => Some(Value::from(self.csum)),
            "stdout" | "stderr" | "exitstatus" | "err" => {
                let guard = self.last_result.read();
                let result = match guard.as_ref() {
                    Some(r) => r.as_ref().clone(),
                    None => {
                        let mut r = RunResult::empty(&self.name);
                        r.exit_status = UNKNOWN_EXIT_STATUS;
                        r
                    }
                };
                Some(match key {
                    "stdout" => {
                        Value::String(String::from_utf8_lossy(&result.stdout).into_owned())
                    }
                    "stderr" => {
                        Value::String(String::from_utf8_lossy(&result.stderr).into_owned())
                    }
                    "exitstatus" => Value::Int(i64::from(result.exit_status)),
                    _ => match result.err {
                        Some(e) => Value::String(e.to_string()),
                        None => Value::Null,
                    },
                })
            }
            _ => None,
        }
    }

    /// Tests the host against a hostname glob and a conjunction of filters.
    ///
    /// An empty glob matches every name. A filter on a missing attribute
    /// fails unless it is negated; "does not equal" is true of the absent.
    pub fn matches(&self, hostname_glob: &str, attributes: &MatchAttributes) -> bool {
        if !hostname_glob.is_empty() {
            match glob::Pattern::new(hostname_glob) {
                Ok(pattern) if pattern.matches(&self.name) => {}
                _ => return false,
            }
        }
        for attribute in attributes {
            match self.get_attribute(&attribute.name) {
                None => {
                    if !attribute.negate {
                        return false;
                    }
                }
                Some(value) => {
                    if !attribute.matches(&value) {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Merges another host with the same name into this one.
    ///
    /// The address fills in only when empty, the provider list is extended
    /// with the other host's single entry, all other attributes are
    /// overwritten last-writer-wins, and public keys are concatenated.
    pub fn amend(&mut self, other: Host) {
        if self.address.is_empty() {
            self.address = other.address;
        }
        let mut providers = match self.attributes.get(PROVIDER_ATTRIBUTE) {
            Some(Value::List(items)) => items.clone(),
            _ => Vec::new(),
        };
        if let Some(Value::List(items)) = other.attributes.get(PROVIDER_ATTRIBUTE) {
            providers.extend(items.iter().cloned());
        }
        for (key, value) in other.attributes {
            if key == PROVIDER_ATTRIBUTE {
                continue;
            }
            self.attributes.insert(key, value);
        }
        self.attributes
            .insert(PROVIDER_ATTRIBUTE.to_string(), Value::List(providers));
        let mut keys = self.public_keys.write();
        keys.extend(other.public_keys.into_inner());
    }

    /// Prefixes every provider-contributed attribute key, leaving the
    /// derived `hostname`/`domainname` pair alone.
    pub fn apply_attribute_prefix(&mut self, prefix: &str) {
        if prefix.is_empty() {
            return;
        }
        let attributes = std::mem::take(&mut self.attributes);
        for (key, value) in attributes {
            if key == "hostname" || key == "domainname" {
                self.attributes.insert(key, value);
            } else {
                self.attributes.insert(format!("{}{}", prefix, key), value);
            }
        }
    }

    /// Orders two hosts by a list of attributes.
    ///
    /// Hosts missing an attribute sort last within that tier; ties fall
    /// through to the next attribute; the final tiebreak is the host name.
    /// Comparison is done on the lossy string forms; attributes that cannot
    /// be coerced are skipped.
    pub fn compare(&self, other: &Host, attributes: &[String]) -> Ordering {
        for attribute in attributes {
            let v1 = self.get_attribute(attribute);
            let v2 = other.get_attribute(attribute);
            match (v1, v2) {
                (Some(_), None) => return Ordering::Less,
                (None, Some(_)) => return Ordering::Greater,
                (None, None) => continue,
                (Some(v1), Some(v2)) => {
                    let (s1, s2) = match (v1.coerce_str(), v2.coerce_str()) {
                        (Some(s1), Some(s2)) => (s1, s2),
                        _ => continue,
                    };
                    match s1.cmp(&s2) {
                        Ordering::Equal => continue,
                        other => return other,
                    }
                }
            }
        }
        self.name.cmp(&other.name)
    }

    /// The cached transport slot; the executor attaches connections here.
    pub async fn connection(&self) -> MutexGuard<'_, Option<Arc<dyn Connection>>> {
        self.connection.lock().await
    }

    /// Takes the cached transport out of the host, if any.
    pub async fn take_connection(&self) -> Option<Arc<dyn Connection>> {
        self.connection.lock().await.take()
    }

    /// Records the result of the host's most recent run.
    pub fn set_last_result(&self, result: Arc<RunResult>) {
        *self.last_result.write() = Some(result);
    }

    /// The result of the host's most recent run, if any.
    pub fn last_result(&self) -> Option<Arc<RunResult>> {
        self.last_result.read().clone()
    }
}

impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Host {}

impl std::hash::Hash for Host {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl std::fmt::Display for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Host{{Name: {}, Keys: {}, Attributes: {:?}}}",
            self.name,
            self.public_keys.read().len(),
            self.attributes
        )
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("keys", &self.public_keys.read().len())
            .field("attributes", &self.attributes)
            .finish()
    }
}

impl Clone for Host {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            address: self.address.clone(),
            attributes: self.attributes.clone(),
            connection: Mutex::new(None),
            public_keys: parking_lot::RwLock::new(self.public_keys.read().clone()),
            last_result: parking_lot::RwLock::new(self.last_result.read().clone()),
            csum: self.csum,
        }
    }
}

// Hosts travel over the wire (plugins, cache files) as
// {Name, Address, Attributes}; runtime state stays behind.
impl Serialize for Host {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Host", 3)?;
        s.serialize_field("Name", &self.name)?;
        s.serialize_field("Address", &self.address)?;
        s.serialize_field("Attributes", &self.attributes)?;
        s.end()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HostData {
    name: String,
    #[serde(default)]
    address: String,
    #[serde(default)]
    attributes: Attributes,
}

impl<'de> Deserialize<'de> for Host {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let data = HostData::deserialize(deserializer)?;
        Ok(Host::new(data.name, data.address, data.attributes))
    }
}
