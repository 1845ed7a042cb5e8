//! Subprocess plugin provider.
//!
//! A plugin is an external executable named `herd-provider-<name>` that
//! speaks a line-framed JSON protocol on its standard streams. On launch it
//! prints a handshake line (magic cookie and protocol version); afterwards
//! the parent sends `configure` and `load` requests and the child answers
//! with `hosts`, interleaving `log` and `progress` messages that are
//! forwarded to the parent's logger and progress callback. The subprocess
//! lives for the duration of the engine and is killed at teardown.

use std::any::Any;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};
use crate::host::Host;

use super::{HostProvider, LoadProgress};

/// Magic cookie every plugin must print before framing starts.
pub const HANDSHAKE_COOKIE: &str = "HERD-PLUGIN";
/// Protocol version spoken by this binary.
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Request {
    Configure { settings: serde_json::Value },
    Load,
    Shutdown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Response {
    Ok,
    Hosts {
        hosts: Vec<Host>,
    },
    Log {
        level: String,
        message: String,
    },
    Progress {
        done: bool,
        #[serde(default)]
        error: Option<String>,
    },
    Error {
        message: String,
    },
}

struct PluginConnection {
    child: Child,
    writer: FramedWrite<ChildStdin, LinesCodec>,
    reader: FramedRead<ChildStdout, LinesCodec>,
    configured: bool,
}

/// Provider delegating discovery to a subprocess plugin.
pub struct PluginProvider {
    name: String,
    prefix: String,
    command: PathBuf,
    settings: serde_json::Value,
    connection: Mutex<Option<PluginConnection>>,
}

impl PluginProvider {
    /// Creates a plugin provider, resolving `herd-provider-<name>` on PATH
    /// as the default command.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let command = which::which(format!("herd-provider-{}", name)).unwrap_or_default();
        Self {
            settings: serde_json::json!({ "name": name }),
            name,
            prefix: String::new(),
            command,
            connection: Mutex::new(None),
        }
    }

    async fn spawn(&self) -> Result<PluginConnection> {
        if self.command.as_os_str().is_empty() {
            return Err(Error::config(format!(
                "no command found for provider '{}'",
                self.name
            )));
        }
        debug!(provider = %self.name, command = %self.command.display(), "Starting plugin");
        let mut child = Command::new(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::provider(&self.name, format!("unable to start plugin: {}", e)))?;

        let stdin = child.stdin.take().expect("stdin was piped");
        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");

        // The child owns its stderr; multiplex it into our logger.
        let provider = self.name.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(plugin = %provider, "{}", line);
            }
        });

        let mut reader = FramedRead::new(stdout, LinesCodec::new());
        let handshake = reader
            .next()
            .await
            .transpose()
            .map_err(|e| Error::provider(&self.name, e.to_string()))?
            .ok_or_else(|| Error::provider(&self.name, "plugin exited before handshake"))?;
        let mut parts = handshake.split('|');
        let cookie = parts.next().unwrap_or_default();
        let version: u32 = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
        if cookie != HANDSHAKE_COOKIE || version != PROTOCOL_VERSION {
            return Err(Error::provider(
                &self.name,
                format!("unexpected plugin handshake: {}", handshake),
            ));
        }

        Ok(PluginConnection {
            child,
            writer: FramedWrite::new(stdin, LinesCodec::new()),
            reader,
            configured: false,
        })
    }

    async fn send(&self, conn: &mut PluginConnection, request: &Request) -> Result<()> {
        let frame = serde_json::to_string(request)?;
        trace!(provider = %self.name, frame = %frame, "plugin request");
        conn.writer
            .send(frame)
            .await
            .map_err(|e| Error::provider(&self.name, e.to_string()))
    }

    async fn receive(&self, conn: &mut PluginConnection) -> Result<Response> {
        let frame = conn
            .reader
            .next()
            .await
            .transpose()
            .map_err(|e| Error::provider(&self.name, e.to_string()))?
            .ok_or_else(|| Error::provider(&self.name, "plugin closed the connection"))?;
        trace!(provider = %self.name, frame = %frame, "plugin response");
        Ok(serde_json::from_str(&frame)?)
    }

    // Plugin log records keep their original level in our logger.
    fn forward_log(&self, level: &str, message: &str) {
        match level.to_ascii_uppercase().as_str() {
            "DEBUG" | "TRACE" => debug!(plugin = %self.name, "{}", message),
            "WARN" | "WARNING" => warn!(plugin = %self.name, "{}", message),
            "ERROR" => error!(plugin = %self.name, "{}", message),
            _ => info!(plugin = %self.name, "{}", message),
        }
    }

    async fn load_inner(&self, progress: LoadProgress) -> Result<Vec<Host>> {
        let mut guard = self.connection.lock().await;
        if guard.is_none() {
            *guard = Some(self.spawn().await?);
        }
        let conn = guard.as_mut().expect("connection was just created");

        if !conn.configured {
            self.send(
                conn,
                &Request::Configure {
                    settings: self.settings.clone(),
                },
            )
            .await?;
            match self.receive(conn).await? {
                Response::Ok => conn.configured = true,
                Response::Error { message } => return Err(Error::provider(&self.name, message)),
                other => {
                    return Err(Error::provider(
                        &self.name,
                        format!("unexpected configure response: {:?}", other),
                    ))
                }
            }
        }

        self.send(conn, &Request::Load).await?;
        loop {
            match self.receive(conn).await? {
                Response::Hosts { hosts } => return Ok(hosts),
                Response::Log { level, message } => self.forward_log(&level, &message),
                Response::Progress { done, error } => {
                    let err = error.map(|message| Error::provider(&self.name, message));
                    progress(&self.name, done, err.as_ref());
                }
                Response::Error { message } => return Err(Error::provider(&self.name, message)),
                Response::Ok => {}
            }
        }
    }
}

#[async_trait]
impl HostProvider for PluginProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn parse_config(&mut self, options: &toml::Table) -> Result<()> {
        if let Some(command) = options.get("command").and_then(|v| v.as_str()) {
            self.command = crate::config::expand_path(command);
        }
        if let Some(prefix) = options.get("prefix").and_then(|v| v.as_str()) {
            self.prefix = prefix.to_string();
        }
        let mut settings = serde_json::to_value(options)?;
        settings["name"] = serde_json::Value::String(self.name.clone());
        self.settings = settings;
        if self.command.as_os_str().is_empty() {
            return Err(Error::config(format!(
                "no command found for provider '{}'",
                self.name
            )));
        }
        Ok(())
    }

    fn equivalent(&self, other: &dyn HostProvider) -> bool {
        other
            .as_any()
            .downcast_ref::<Self>()
            .is_some_and(|o| o.command == self.command)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn load(&self, token: CancellationToken, progress: LoadProgress) -> Result<Vec<Host>> {
        tokio::select! {
            result = self.load_inner(progress) => result,
            _ = token.cancelled() => {
                self.shutdown().await;
                Err(Error::Timeout(format!(
                    "provider '{}' cancelled while loading",
                    self.name
                )))
            }
        }
    }

    async fn shutdown(&self) {
        let mut guard = self.connection.lock().await;
        if let Some(mut conn) = guard.take() {
            let _ = self.send(&mut conn, &Request::Shutdown).await;
            let _ = conn.child.kill().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::silent_progress;

    // A shell stand-in for a plugin: handshake, then answer configure and
    // load from a canned script.
    fn script_plugin(dir: &std::path::Path, body: &str) -> PathBuf {
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("herd-provider-test");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh").unwrap();
        writeln!(file, "echo 'HERD-PLUGIN|1'").unwrap();
        writeln!(file, "{}", body).unwrap();
        let mut perms = file.metadata().unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn provider_for(command: PathBuf) -> PluginProvider {
        PluginProvider {
            name: "test".into(),
            prefix: String::new(),
            command,
            settings: serde_json::json!({ "name": "test" }),
            connection: Mutex::new(None),
        }
    }

    #[tokio::test]
    async fn test_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let command = script_plugin(
            dir.path(),
            r#"
            read _configure
            echo '{"type":"ok"}'
            read _load
            echo '{"type":"log","level":"INFO","message":"scanning"}'
            echo '{"type":"progress","done":false}'
            echo '{"type":"hosts","hosts":[{"Name":"a.example.com","Attributes":{"n":32}}]}'
            "#,
        );
        let provider = provider_for(command);
        let hosts = provider
            .load(CancellationToken::new(), silent_progress())
            .await
            .unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].name, "a.example.com");
        assert_eq!(
            hosts[0].attributes.get("n"),
            Some(&crate::value::Value::Int(32))
        );
        provider.shutdown().await;
    }

    #[tokio::test]
    async fn test_bad_handshake_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;
        let path = dir.path().join("herd-provider-bad");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh\necho 'NOT-A-PLUGIN'").unwrap();
        let mut perms = file.metadata().unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        drop(file);

        let provider = provider_for(path);
        let err = provider
            .load(CancellationToken::new(), silent_progress())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("handshake"));
    }

    #[tokio::test]
    async fn test_plugin_error_response() {
        let dir = tempfile::tempdir().unwrap();
        let command = script_plugin(
            dir.path(),
            r#"
            read _configure
            echo '{"type":"error","message":"bad credentials"}'
            "#,
        );
        let provider = provider_for(command);
        let err = provider
            .load(CancellationToken::new(), silent_progress())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("bad credentials"));
    }
}
