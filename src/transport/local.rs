// ABOUTME: Local shell transport: runs commands against the controlling host.
// ABOUTME: Simulates a remote target for single-node installs and dry runs.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use super::checksum::file_sha256;
use super::error::{Error, Result};
use super::{ConnectionTarget, OutputScanner, Transport, TransportResult};
use crate::action_log;
use crate::output::Output;

/// Exit status bash reports when the inner command was not found.
const EXIT_COMMAND_NOT_FOUND: i32 = 127;

/// Executes commands in a nested local shell.
pub struct LocalTransport {
    output: Output,
}

impl LocalTransport {
    pub fn new(output: Output) -> Self {
        Self { output }
    }
}

/// Escape double quotes and dollars so the command survives the outer
/// `bash -c "..."` wrapper unexpanded. Double quotes must be the outer
/// quoting layer: bash does not honor \' inside single quotes.
pub(crate) fn quote_for_shell(command: &str) -> String {
    command.trim().replace('"', "\\\"").replace('$', "\\$")
}

/// Wrap the quoted command for execution. Library-path variables inherited
/// from this process are unset so the target command resolves its own
/// environment, and stderr is folded into the line stream.
pub(crate) fn wrap_command(command: &str) -> String {
    format!(
        "unset LD_LIBRARY_PATH LD_PRELOAD; bash -c \"{}\" 2>&1",
        quote_for_shell(command)
    )
}

#[async_trait]
impl Transport for LocalTransport {
    async fn execute(&self, target: &ConnectionTarget, command: &str) -> Result<TransportResult> {
        let wrapped = wrap_command(command);
        action_log::record(&wrapped);

        let mut child = Command::new("bash")
            .arg("-c")
            .arg(&wrapped)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::CommandMissing(wrapped.clone())
                } else {
                    Error::Io(e)
                }
            })?;

        let mut stdout = child.stdout.take().expect("stdout is piped");
        let mut stdin = child.stdin.take().expect("stdin is piped");

        let mut scanner = OutputScanner::new(target, &self.output, false);
        let mut buf = [0u8; 4096];
        loop {
            let n = stdout.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            let replies = match scanner.feed(&buf[..n]) {
                Ok(replies) => replies,
                Err(e) => {
                    let _ = child.kill().await;
                    return Err(e);
                }
            };
            for reply in replies {
                stdin.write_all(reply.as_bytes()).await?;
                stdin.write_all(b"\n").await?;
                stdin.flush().await?;
            }
        }

        let status = child.wait().await?;
        let lines = scanner.finish();

        match status.code() {
            Some(0) => Ok(TransportResult::completed(lines)),
            Some(EXIT_COMMAND_NOT_FOUND) => Err(Error::CommandMissing(command.trim().to_string())),
            Some(code) => Err(Error::CommandFailed {
                host: target.hostname.clone(),
                status: code as u32,
            }),
            // Killed by a signal.
            None => Err(Error::CommandFailed {
                host: target.hostname.clone(),
                status: u32::MAX,
            }),
        }
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
        let remote_digest = file_sha256(Path::new(remote))?;

        let file_name = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| local.display().to_string());

        if remote_digest.as_deref() == Some(local_digest.as_str()) {
            let line = format!("{local_digest}  {file_name} already up to date");
            self.output.progress(&line);
            return Ok(TransportResult::skipped_upload(line));
        }

        action_log::record(&format!("cp {} {}", local.display(), remote));
        tokio::fs::copy(local, remote)
            .await
            .map_err(|e| Error::Transfer {
                local: local.to_path_buf(),
                remote: remote.to_string(),
                reason: e.to_string(),
            })?;

        let line = format!(
            "{}: copied {} to {} on {}",
            label,
            local.display(),
            remote,
            target.hostname
        );
        self.output.progress(&line);
        Ok(TransportResult::completed(vec![line]))
    }
}
