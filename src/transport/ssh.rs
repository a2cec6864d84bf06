// ABOUTME: SSH transport using russh: authenticated remote command execution.
// ABOUTME: Connects per host action; PTY-backed exec so escalation prompts stream.

use async_trait::async_trait;
use russh::client::{self, Config, Handle};
use russh::keys::agent::client::AgentClient;
use russh::keys::known_hosts::{check_known_hosts, learn_known_hosts};
use russh::keys::{load_secret_key, ssh_key, PrivateKeyWithHashAlg};
use russh::{ChannelMsg, Disconnect};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixStream;

use super::checksum::{file_sha256, parse_sha256_output, remote_sha256_command};
use super::error::{Error, Result};
use super::{ConnectionTarget, OutputScanner, Transport, TransportResult};
use crate::action_log;
use crate::output::Output;

/// Exit status the remote shell reports when the command was not found.
const EXIT_COMMAND_NOT_FOUND: u32 = 127;

/// Map a channel's final exit status to a transport result, mirroring the
/// local transport: 127 is a distinct missing-command error.
fn result_from_exit(
    command: &str,
    host: &str,
    exit_status: Option<u32>,
    lines: Vec<String>,
) -> Result<TransportResult> {
    match exit_status {
        Some(0) => Ok(TransportResult::completed(lines)),
        Some(EXIT_COMMAND_NOT_FOUND) => Err(Error::CommandMissing(command.trim().to_string())),
        Some(status) => Err(Error::CommandFailed {
            host: host.to_string(),
            status,
        }),
        None => Err(Error::ChannelClosed),
    }
}

/// Executes commands over an authenticated SSH session.
///
/// A fresh session is established per operation; install steps are long and
/// sparse enough that connection reuse buys nothing and keeping no session
/// state makes one host's failure trivially isolated from the next.
pub struct SshTransport {
    output: Output,
    /// Optional private key path; otherwise agent, then default key locations.
    key_path: Option<PathBuf>,
    /// Accept and record unknown host keys (trust on first use).
    trust_on_first_use: bool,
}

impl SshTransport {
    pub fn new(output: Output) -> Self {
        Self {
            output,
            key_path: None,
            trust_on_first_use: true,
        }
    }

    pub fn key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_path = Some(path.into());
        self
    }

    pub fn trust_on_first_use(mut self, tofu: bool) -> Self {
        self.trust_on_first_use = tofu;
        self
    }
}

/// russh client handler: host key verification with optional TOFU.
struct HostKeyHandler {
    host: String,
    port: u16,
    trust_on_first_use: bool,
}

impl client::Handler for HostKeyHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        match check_known_hosts(&self.host, self.port, server_public_key) {
            Ok(true) => Ok(true),
            Ok(false) if self.trust_on_first_use => {
                tracing::warn!(
                    "trust-on-first-use: accepting unknown host key for {}:{}",
                    self.host,
                    self.port
                );
                if let Err(e) = learn_known_hosts(&self.host, self.port, server_public_key) {
                    tracing::warn!("failed to record host key in known_hosts: {}", e);
                }
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(russh::keys::Error::KeyChanged { .. }) => Ok(false),
            Err(_) => Ok(self.trust_on_first_use),
        }
    }
}

/// Authentication method resolved before connecting.
enum AuthMethod {
    Agent(AgentClient<UnixStream>),
    KeyFile(Arc<ssh_key::PrivateKey>),
}

impl SshTransport {
    async fn connect(&self, target: &ConnectionTarget) -> Result<Handle<HostKeyHandler>> {
        let auth_method = self.resolve_auth_method().await?;

        let config = Config {
            inactivity_timeout: None,
            ..Default::default()
        };
        let handler = HostKeyHandler {
            host: target.hostname.clone(),
            port: target.port,
            trust_on_first_use: self.trust_on_first_use,
        };

        let mut session = client::connect(
            Arc::new(config),
            (target.hostname.as_str(), target.port),
            handler,
        )
        .await
        .map_err(|e| Error::Connection(format!("{}:{}: {}", target.hostname, target.port, e)))?;

        if !Self::authenticate(&mut session, &target.username, auth_method).await? {
            return Err(Error::AuthenticationFailed);
        }
        Ok(session)
    }

    async fn resolve_auth_method(&self) -> Result<AuthMethod> {
        if let Some(key_path) = &self.key_path {
            let key = load_secret_key(key_path, None).map_err(|e| Error::KeyLoadFailed {
                path: key_path.clone(),
                reason: e.to_string(),
            })?;
            return Ok(AuthMethod::KeyFile(Arc::new(key)));
        }

        if let Ok(agent) = AgentClient::connect_env().await {
            return Ok(AuthMethod::Agent(agent));
        }

        let home = std::env::var("HOME").map_err(|_| {
            Error::AgentUnavailable("SSH agent not available and HOME not set".to_string())
        })?;
        for name in ["id_ed25519", "id_rsa", "id_ecdsa"] {
            let path = format!("{home}/.ssh/{name}");
            if let Ok(key) = load_secret_key(&path, None) {
                return Ok(AuthMethod::KeyFile(Arc::new(key)));
            }
        }

        Err(Error::AgentUnavailable(
            "SSH agent not available and no default keys found".to_string(),
        ))
    }

    async fn authenticate(
        session: &mut Handle<HostKeyHandler>,
        username: &str,
        auth_method: AuthMethod,
    ) -> Result<bool> {
        match auth_method {
            AuthMethod::Agent(mut agent) => {
                let keys = agent.request_identities().await.map_err(|e| {
                    Error::AgentUnavailable(format!("failed to list agent keys: {e}"))
                })?;
                if keys.is_empty() {
                    return Err(Error::AgentUnavailable("no keys in SSH agent".to_string()));
                }
                for key in &keys {
                    match session
                        .authenticate_publickey_with(username, key.clone(), None, &mut agent)
                        .await
                    {
                        Ok(result) if result.success() => return Ok(true),
                        _ => continue,
                    }
                }
                Ok(false)
            }
            AuthMethod::KeyFile(key) => {
                let hash_alg = session
                    .best_supported_rsa_hash()
                    .await
                    .map_err(Error::Protocol)?
                    .flatten();
                let result = session
                    .authenticate_publickey(username, PrivateKeyWithHashAlg::new(key, hash_alg))
                    .await
                    .map_err(Error::Protocol)?;
                Ok(result.success())
            }
        }
    }

    /// Run a command over an established session, streaming output through
    /// the prompt scanner. `quiet` suppresses the user-visible transcript
    /// for internal bookkeeping commands like checksum probes.
    async fn exec_on(
        &self,
        session: &Handle<HostKeyHandler>,
        target: &ConnectionTarget,
        command: &str,
        quiet: bool,
    ) -> Result<TransportResult> {
        let mut channel = session.channel_open_session().await.map_err(Error::Protocol)?;

        // A PTY makes sudo/su write their prompts into the data stream
        // instead of demanding a local terminal.
        channel
            .request_pty(false, "xterm", 80, 24, 0, 0, &[])
            .await
            .map_err(Error::Protocol)?;
        channel.exec(true, command).await.map_err(Error::Protocol)?;

        let mut scanner = OutputScanner::new(target, &self.output, quiet);
        let mut exit_status = None;
        let mut eof = false;

        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => {
                    for reply in scanner.feed(&data)? {
                        channel
                            .data(format!("{reply}\n").as_bytes())
                            .await
                            .map_err(Error::Protocol)?;
                    }
                }
                Some(ChannelMsg::ExtendedData { data, ext }) if ext == 1 => {
                    for reply in scanner.feed(&data)? {
                        channel
                            .data(format!("{reply}\n").as_bytes())
                            .await
                            .map_err(Error::Protocol)?;
                    }
                }
                Some(ChannelMsg::ExitStatus {
                    exit_status: status,
                }) => {
                    exit_status = Some(status);
                    if eof {
                        break;
                    }
                }
                Some(ChannelMsg::Eof) => {
                    eof = true;
                    if exit_status.is_some() {
                        break;
                    }
                }
                Some(ChannelMsg::Close) | None => break,
                Some(_) => {}
            }
        }

        result_from_exit(command, &target.hostname, exit_status, scanner.finish())
    }

    async fn disconnect(&self, session: Handle<HostKeyHandler>) {
        let _ = session
            .disconnect(Disconnect::ByApplication, "", "en")
            .await;
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn execute(&self, target: &ConnectionTarget, command: &str) -> Result<TransportResult> {
        action_log::record(command);
        let session = self.connect(target).await?;
        let result = self.exec_on(&session, target, command, false).await;
        self.disconnect(session).await;
        result
    }

    async fn transfer_file(
        &self,
        target: &ConnectionTarget,
        local: &Path,
        remote: &str,
        label: &str,
    ) -> Result<TransportResult> {
        let local_digest = file_sha256(local)?.ok_or_else(|| Error::Transfer {
            local: local.to_path_buf(),
            remote: remote.to_string(),
            reason: "local file not found".to_string(),
        })?;

        let session = self.connect(target).await?;

        // Probe the remote digest quietly; an absent file yields no digest
        // and therefore a mismatch, never an error.
        let probe = self
            .exec_on(&session, target, &remote_sha256_command(remote), true)
            .await;
        let remote_digest = match probe {
            Ok(result) => parse_sha256_output(&result.stdout()),
            Err(_) => None,
        };

        let file_name = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| local.display().to_string());

        if remote_digest.as_deref() == Some(local_digest.as_str()) {
            self.disconnect(session).await;
            let line = format!("{local_digest}  {file_name} already up to date");
            self.output.progress(&line);
            return Ok(TransportResult::skipped_upload(line));
        }

        action_log::record(&format!(
            "scp {} {}@{}:{}",
            local.display(),
            target.username,
            target.hostname,
            remote
        ));
        let upload = self.upload(&session, local, remote).await;
        self.disconnect(session).await;
        upload.map_err(|e| Error::Transfer {
            local: local.to_path_buf(),
            remote: remote.to_string(),
            reason: e.to_string(),
        })?;

        let line = format!("{label}: uploaded {file_name} to {}:{remote}", target.hostname);
        self.output.progress(&line);
        Ok(TransportResult::completed(vec![line]))
    }
}

impl SshTransport {
    /// Stream the file into `cat > remote` on the target.
    async fn upload(
        &self,
        session: &Handle<HostKeyHandler>,
        local: &Path,
        remote: &str,
    ) -> Result<()> {
        let mut channel = session.channel_open_session().await.map_err(Error::Protocol)?;
        channel
            .exec(true, format!("cat > '{remote}'"))
            .await
            .map_err(Error::Protocol)?;

        let file = tokio::fs::File::open(local).await?;
        channel.data(file).await.map_err(Error::Protocol)?;
        channel.eof().await.map_err(Error::Protocol)?;

        let mut exit_status = None;
        loop {
            match channel.wait().await {
                Some(ChannelMsg::ExitStatus {
                    exit_status: status,
                }) => exit_status = Some(status),
                Some(ChannelMsg::Close) | None => break,
                Some(_) => {}
            }
        }

        match exit_status {
            Some(0) => Ok(()),
            Some(status) => Err(Error::CommandFailed {
                host: remote.to_string(),
                status,
            }),
            None => Err(Error::ChannelClosed),
        }
    }
}
