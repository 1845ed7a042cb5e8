//! The SSH executor.
//!
//! Runs one command on one host: reuse or dial the host's connection,
//! open a session, stream stdout/stderr, and race the command against the
//! cancellation token. Every failure ends up inside the returned result;
//! nothing here panics or propagates across the fan-out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect, Sig};
use russh_keys::key::PublicKey;
use russh_keys::PublicKeyBase64;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::host::{Connection, Host};
use crate::output::LineBuffer;
use crate::result::{OutputLine, RunError, RunResult};
use crate::runner::Executor;

use super::agent::Agent;
use super::config::{ConfigBlock, SshConfig, StrictHostKeyChecking};
use super::dns;

/// Wrapper giving russh's error a home in the handler trait.
#[derive(Debug)]
pub struct HandlerError(pub russh::Error);

impl From<russh::Error> for HandlerError {
    fn from(err: russh::Error) -> Self {
        HandlerError(err)
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ssh: {}", self.0)
    }
}

impl std::error::Error for HandlerError {}

/// Per-connection handler verifying the server's host key.
///
/// Keys the host already carries win; unknown keys may be accepted via
/// SSHFP records, and otherwise the `StrictHostKeyChecking` policy decides.
/// Accepted keys are remembered on the host.
pub struct HostKeyHandler {
    host: Arc<Host>,
    strict: StrictHostKeyChecking,
    verify_dns: bool,
}

#[async_trait]
impl client::Handler for HostKeyHandler {
    type Error = HandlerError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        let presented = server_public_key.public_key_base64();
        if self
            .host
            .public_keys()
            .iter()
            .any(|known| known.public_key_base64() == presented)
        {
            trace!(host = %self.host.name, "Host key already known");
            return Ok(true);
        }

        if self.verify_dns && dns::verify_host_key_dns(&self.host.name, server_public_key).await {
            self.host.add_public_key(server_public_key.clone());
            return Ok(true);
        }

        match self.strict {
            StrictHostKeyChecking::AcceptNew => {
                warn!(host = %self.host.name, "No known host key, accepting new key");
                self.host.add_public_key(server_public_key.clone());
                Ok(true)
            }
            StrictHostKeyChecking::No => {
                self.host.add_public_key(server_public_key.clone());
                Ok(true)
            }
            StrictHostKeyChecking::Yes => {
                warn!(host = %self.host.name, "No known host key, rejecting");
                Ok(false)
            }
        }
    }
}

/// A live SSH connection cached on a host between commands.
pub struct SshClient {
    handle: Handle<HostKeyHandler>,
    dead: AtomicBool,
}

impl SshClient {
    fn new(handle: Handle<HostKeyHandler>) -> Self {
        Self {
            handle,
            dead: AtomicBool::new(false),
        }
    }

    fn handle(&self) -> &Handle<HostKeyHandler> {
        &self.handle
    }
}

#[async_trait]
impl Connection for SshClient {
    fn is_dead(&self) -> bool {
        self.dead.load(Ordering::SeqCst)
    }

    fn mark_dead(&self) {
        self.dead.store(true, Ordering::SeqCst);
    }

    async fn close(&self) {
        let _ = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await;
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync> {
        self
    }
}

/// Executor running commands over SSH with agent-backed authentication.
pub struct SshExecutor {
    agent: Agent,
    config: SshConfig,
    connect_timeout: parking_lot::RwLock<Duration>,
}

impl SshExecutor {
    /// Builds an executor: attaches to (or spawns) the SSH agent and reads
    /// the OpenSSH client configuration.
    pub async fn new(agent_timeout: Duration, connect_timeout: Duration) -> Result<Self> {
        let agent = Agent::new(agent_timeout).await?;
        let config = SshConfig::read_openssh_config()?;
        Ok(Self {
            agent,
            config,
            connect_timeout: parking_lot::RwLock::new(connect_timeout),
        })
    }

    /// Stops the spawned agent, if any. Pooled connections are closed by
    /// the engine, which owns the hosts.
    pub fn close(&self) {
        self.agent.close();
    }

    async fn connect(
        &self,
        token: &CancellationToken,
        host: &Arc<Host>,
    ) -> std::result::Result<Arc<SshClient>, RunError> {
        let mut slot = host.connection().await;
        if let Some(connection) = slot.as_ref() {
            if connection.is_dead() {
                debug!(host = %host.name, "Dropping dead connection, reconnecting");
                *slot = None;
            } else if let Ok(client) = connection.clone().as_any_arc().downcast::<SshClient>() {
                return Ok(client);
            }
        }

        let block = self.config.for_host(&host.name);
        let address = self.dial_address(host, &block);
        debug!(
            host = %host.name,
            address = %address,
            user = %block.user,
            "Connecting"
        );

        // Dial grace: half a second beyond the configured connect timeout.
        let deadline = *self.connect_timeout.read() + Duration::from_millis(500);
        let dial = self.dial(host, &block, &address);
        let session = tokio::select! {
            _ = token.cancelled() => {
                return Err(RunError::Timeout(
                    "Timed out while connecting to server".into(),
                ))
            }
            outcome = tokio::time::timeout(deadline, dial) => match outcome {
                Err(_) => {
                    return Err(RunError::Timeout(
                        "Timed out while connecting to server".into(),
                    ))
                }
                Ok(Err(err)) => return Err(err),
                Ok(Ok(session)) => session,
            },
        };

        let client = Arc::new(SshClient::new(session));
        *slot = Some(client.clone());
        Ok(client)
    }

    fn dial_address(&self, host: &Host, block: &ConfigBlock) -> String {
        let name = if !host.address.is_empty() {
            host.address.clone()
        } else {
            block.hostname.clone().unwrap_or_else(|| host.name.clone())
        };
        format!("{}:{}", name, block.port)
    }

    async fn dial(
        &self,
        host: &Arc<Host>,
        block: &ConfigBlock,
        address: &str,
    ) -> std::result::Result<Handle<HostKeyHandler>, RunError> {
        let socket = tokio::net::TcpStream::connect(address)
            .await
            .map_err(|e| RunError::Transport(format!("{}: {}", address, e)))?;
        let _ = socket.set_nodelay(true);

        let config = Arc::new(client::Config::default());
        let handler = HostKeyHandler {
            host: host.clone(),
            strict: block.strict_host_key_checking,
            verify_dns: block.verify_host_key_dns,
        };
        let mut session = client::connect_stream(config, socket, handler)
            .await
            .map_err(|e| RunError::Transport(format!("handshake failed: {}", e)))?;

        self.agent
            .authenticate(&mut session, &block.user, block.identity_file.as_deref())
            .await
            .map_err(|e| match e {
                Error::Timeout(message) => RunError::Timeout(message),
                other => RunError::Transport(other.to_string()),
            })?;
        Ok(session)
    }
}

#[async_trait]
impl Executor for SshExecutor {
    async fn run(
        &self,
        token: &CancellationToken,
        host: &Arc<Host>,
        command: &str,
        output: Option<mpsc::Sender<OutputLine>>,
    ) -> RunResult {
        let mut result = RunResult::started(&host.name);

        if token.is_cancelled() {
            result.err = Some(RunError::Timeout("Command cancelled before start".into()));
            result.finish();
            return result;
        }

        let client = match self.connect(token, host).await {
            Ok(client) => client,
            Err(err) => {
                result.err = Some(err);
                result.finish();
                return result;
            }
        };

        let mut channel = match client.handle().channel_open_session().await {
            Ok(channel) => channel,
            Err(err) => {
                client.mark_dead();
                result.err = Some(RunError::Transport(format!(
                    "unable to open session: {}",
                    err
                )));
                result.finish();
                return result;
            }
        };
        if let Err(err) = channel.exec(true, command).await {
            client.mark_dead();
            result.err = Some(RunError::Transport(format!("unable to execute: {}", err)));
            result.finish();
            return result;
        }

        let mut stdout = LineBuffer::new(&host.name, false, output.clone());
        let mut stderr = LineBuffer::new(&host.name, true, output);

        let outcome = {
            let session = drive_session(&mut channel, &mut stdout, &mut stderr);
            tokio::pin!(session);
            tokio::select! {
                _ = token.cancelled() => None,
                exit_status = &mut session => Some(exit_status),
            }
        };

        match outcome {
            None => {
                // Best-effort: servers older than OpenSSH 7.9 silently drop
                // the signal. Closing the channel forces a local return.
                let _ = channel.signal(Sig::KILL).await;
                let _ = channel.eof().await;
                result.err = Some(RunError::Timeout(
                    "Timed out while executing command".into(),
                ));
            }
            Some(Some(code)) => {
                result.exit_status = code;
                if code != 0 {
                    result.err = Some(RunError::Remote(code));
                }
            }
            Some(None) => {
                client.mark_dead();
                result.err = Some(RunError::Transport(
                    "session closed without exit status".into(),
                ));
            }
        }

        stdout.flush().await;
        stderr.flush().await;
        result.stdout = stdout.into_bytes();
        result.stderr = stderr.into_bytes();
        result.finish();
        result
    }

    fn set_connect_timeout(&self, timeout: Duration) {
        *self.connect_timeout.write() = timeout;
    }
}

// Pumps channel messages into the stream sinks until the channel closes,
// returning the exit status when the server reported one.
async fn drive_session(
    channel: &mut russh::Channel<client::Msg>,
    stdout: &mut LineBuffer,
    stderr: &mut LineBuffer,
) -> Option<i32> {
    let mut exit_status = None;
    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { ref data } => stdout.write(data).await,
            ChannelMsg::ExtendedData { ref data, ext } => {
                if ext == 1 {
                    stderr.write(data).await;
                }
            }
            ChannelMsg::ExitStatus { exit_status: code } => {
                exit_status = Some(code as i32);
            }
            ChannelMsg::Close => break,
            _ => {}
        }
    }
    exit_status
}
