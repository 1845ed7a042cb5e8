//! SSH agent access.
//!
//! Authentication always goes through an agent: either the one already
//! running (via `SSH_AUTH_SOCK`) or an ephemeral one spawned at startup and
//! loaded with the default keys from `~/.ssh`. Every agent round-trip is
//! bounded by the agent timeout, so a wedged agent cannot stall the whole
//! fan-out.

use std::path::{Path, PathBuf};
use std::time::Duration;

use russh::client::Handle;
use russh_keys::agent::client::AgentClient;
use russh_keys::key::PublicKey;
use russh_keys::PublicKeyBase64;
use tokio::net::UnixStream;
use tokio::process::Child;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

use super::executor::HostKeyHandler;

/// Key files loaded into a spawned ephemeral agent.
const DEFAULT_KEY_FILES: &[&str] = &["id_ed25519", "id_ecdsa", "id_rsa"];

/// A handle on the SSH agent used for all authentication.
pub struct Agent {
    socket: PathBuf,
    timeout: Duration,
    spawned: parking_lot::Mutex<Option<Child>>,
}

impl Agent {
    /// Uses the agent from `SSH_AUTH_SOCK`, or spawns an ephemeral one and
    /// loads the default keys from disk.
    pub async fn new(timeout: Duration) -> Result<Self> {
        if let Ok(socket) = std::env::var("SSH_AUTH_SOCK") {
            debug!(socket = %socket, "Using existing SSH agent");
            return Ok(Self {
                socket: PathBuf::from(socket),
                timeout,
                spawned: parking_lot::Mutex::new(None),
            });
        }
        Self::spawn_ephemeral(timeout).await
    }

    async fn spawn_ephemeral(timeout: Duration) -> Result<Self> {
        let dir = std::env::temp_dir();
        let socket = dir.join(format!("herd-agent-{}.sock", std::process::id()));
        debug!(socket = %socket.display(), "Spawning ephemeral SSH agent");
        let child = tokio::process::Command::new("ssh-agent")
            .arg("-D")
            .arg("-a")
            .arg(&socket)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::config(format!("unable to start ssh-agent: {}", e)))?;

        // The agent creates its socket asynchronously.
        for _ in 0..50 {
            if socket.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        if !socket.exists() {
            return Err(Error::config("ssh-agent did not create its socket"));
        }

        let agent = Self {
            socket,
            timeout,
            spawned: parking_lot::Mutex::new(Some(child)),
        };
        agent.load_default_keys().await;
        Ok(agent)
    }

    async fn load_default_keys(&self) {
        let Some(home) = dirs::home_dir() else {
            return;
        };
        for file in DEFAULT_KEY_FILES {
            let path = home.join(".ssh").join(file);
            if !path.exists() {
                continue;
            }
            match russh_keys::load_secret_key(&path, None) {
                Ok(key) => {
                    let Ok(mut client) = self.client().await else {
                        return;
                    };
                    match client.add_identity(&key, &[]).await {
                        Ok(()) => debug!(key = %path.display(), "Loaded key into agent"),
                        Err(err) => {
                            warn!(key = %path.display(), error = %err, "Unable to load key")
                        }
                    }
                }
                Err(err) => {
                    // Passphrase-protected keys cannot be loaded unattended.
                    debug!(key = %path.display(), error = %err, "Skipping key");
                }
            }
        }
    }

    async fn client(&self) -> Result<AgentClient<UnixStream>> {
        let connect = AgentClient::connect_uds(&self.socket);
        tokio::time::timeout(self.timeout, connect)
            .await
            .map_err(|_| Error::Timeout("timed out connecting to SSH agent".into()))?
            .map_err(|e| Error::Transport(format!("SSH agent: {}", e)))
    }

    /// The public keys the agent can sign with, optionally restricted to the
    /// key belonging to an `IdentityFile`.
    pub async fn identities(&self, identity_file: Option<&Path>) -> Result<Vec<PublicKey>> {
        let mut client = self.client().await?;
        let identities = tokio::time::timeout(self.timeout, client.request_identities())
            .await
            .map_err(|_| Error::Timeout("timed out listing agent identities".into()))?
            .map_err(|e| Error::Transport(format!("SSH agent: {}", e)))?;

        let Some(identity_file) = identity_file else {
            return Ok(identities);
        };
        let public = identity_file.with_extension("pub");
        let Ok(wanted) = russh_keys::load_public_key(&public) else {
            // No readable public half; fall back to every identity.
            return Ok(identities);
        };
        let wanted = wanted.public_key_base64();
        Ok(identities
            .into_iter()
            .filter(|key| key.public_key_base64() == wanted)
            .collect())
    }

    /// Authenticates an SSH session, trying each agent identity in turn.
    /// Each signing round-trip is bounded by the agent timeout.
    pub async fn authenticate(
        &self,
        session: &mut Handle<HostKeyHandler>,
        user: &str,
        identity_file: Option<&Path>,
    ) -> Result<()> {
        let identities = self.identities(identity_file).await?;
        if identities.is_empty() {
            return Err(Error::Transport("SSH agent has no usable identities".into()));
        }
        let mut agent = self.client().await?;
        for identity in identities {
            let attempt = session.authenticate_future(user, identity.clone(), agent);
            let (returned_agent, outcome) = tokio::time::timeout(self.timeout, attempt)
                .await
                .map_err(|_| Error::Timeout("timed out in agent authentication".into()))?;
            agent = returned_agent;
            match outcome {
                Ok(true) => {
                    trace!(user = %user, "Agent authentication succeeded");
                    return Ok(());
                }
                Ok(false) => trace!("Identity rejected, trying next"),
                Err(err) => trace!(error = %err, "Agent authentication attempt failed"),
            }
        }
        Err(Error::Transport(format!(
            "all agent identities rejected for user {}",
            user
        )))
    }

    /// Stops a spawned ephemeral agent; an inherited agent is left alone.
    pub fn close(&self) {
        if let Some(mut child) = self.spawned.lock().take() {
            let _ = child.start_kill();
            let _ = std::fs::remove_file(&self.socket);
        }
    }
}
