// ABOUTME: Command transport capability: run commands and transfer files to a target.
// ABOUTME: Two implementations share one contract: SSH and local shell.

mod checksum;
mod error;
mod local;
mod prompt;
mod ssh;

pub use checksum::file_sha256;
pub use error::{Error, Result};
pub use local::LocalTransport;
pub use prompt::{default_matchers, PromptMatcher};
pub use ssh::SshTransport;

use async_trait::async_trait;
use std::path::Path;

use crate::auth::{Credentials, Escalation};
use crate::output::Output;

/// Addressing and privilege context for one host action.
///
/// Created once per host action and owned by it; never persisted.
#[derive(Debug, Clone)]
pub struct ConnectionTarget {
    pub hostname: String,
    pub username: String,
    pub port: u16,
    pub escalation: Escalation,
    pub credentials: Credentials,
}

impl ConnectionTarget {
    pub fn new(
        hostname: impl Into<String>,
        username: impl Into<String>,
        escalation: Escalation,
        credentials: Credentials,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            username: username.into(),
            port: 22,
            escalation,
            credentials,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

/// Outcome of a single command execution or file transfer. Ephemeral.
#[derive(Debug, Clone)]
pub struct TransportResult {
    /// Process exit status; zero for transfers and skipped uploads.
    pub exit_status: u32,
    /// Output lines as streamed, trailing newlines trimmed.
    pub lines: Vec<String>,
    /// True when a transfer was skipped because checksums matched.
    pub skipped: bool,
}

impl TransportResult {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }

    pub fn stdout(&self) -> String {
        self.lines.join("\n")
    }

    pub(crate) fn completed(lines: Vec<String>) -> Self {
        Self {
            exit_status: 0,
            lines,
            skipped: false,
        }
    }

    pub(crate) fn skipped_upload(digest_line: String) -> Self {
        Self {
            exit_status: 0,
            lines: vec![digest_line],
            skipped: true,
        }
    }
}

/// Executes commands against a target and streams output as it arrives.
///
/// The orchestrator is written against this trait alone; whether commands
/// travel over SSH or a nested local shell is decided once at startup.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run `command` on `target`, streaming output line-by-line so
    /// interactive escalation prompts can be answered mid-stream.
    async fn execute(&self, target: &ConnectionTarget, command: &str) -> Result<TransportResult>;

    /// Copy a local artifact to the target, skipping the copy (with a
    /// visible "already up to date" line) when content checksums match.
    async fn transfer_file(
        &self,
        target: &ConnectionTarget,
        local: &Path,
        remote: &str,
        label: &str,
    ) -> Result<TransportResult>;
}

/// Incremental scanner over a process output stream.
///
/// Feeds bytes in, emits completed lines to the output sink, and produces
/// replies for matched escalation prompts. Prompts rarely end in a newline,
/// so the unterminated tail is tested against the matchers as well.
pub(crate) struct OutputScanner<'a> {
    target: &'a ConnectionTarget,
    matchers: Vec<PromptMatcher>,
    output: &'a Output,
    quiet: bool,
    pending: String,
    lines: Vec<String>,
}

impl<'a> OutputScanner<'a> {
    pub(crate) fn new(target: &'a ConnectionTarget, output: &'a Output, quiet: bool) -> Self {
        Self {
            target,
            matchers: default_matchers(),
            output,
            quiet,
            pending: String::new(),
            lines: Vec::new(),
        }
    }

    /// Feed a chunk of raw output. Returns any replies that must be written
    /// to the process input, newline-terminated by the caller.
    pub(crate) fn feed(&mut self, chunk: &[u8]) -> Result<Vec<String>> {
        self.pending.push_str(&String::from_utf8_lossy(chunk));

        let mut replies = Vec::new();
        while let Some(idx) = self.pending.find('\n') {
            let raw: String = self.pending.drain(..=idx).collect();
            let line = raw.trim_end_matches(['\n', '\r']).to_string();
            if let Some(reply) = self.take_line(&line)? {
                replies.push(reply);
            }
        }

        if self.is_prompt(&self.pending) {
            let line = std::mem::take(&mut self.pending);
            if let Some(reply) = self.take_line(&line)? {
                replies.push(reply);
            }
        }

        Ok(replies)
    }

    /// Flush any unterminated tail and return all recorded lines.
    pub(crate) fn finish(mut self) -> Vec<String> {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            if !self.quiet {
                self.output.progress(&line);
            }
            self.lines.push(line);
        }
        self.lines
    }

    fn is_prompt(&self, line: &str) -> bool {
        self.matchers
            .iter()
            .any(|m| m.matches(line, &self.target.username))
    }

    fn take_line(&mut self, line: &str) -> Result<Option<String>> {
        let reply = if self.is_prompt(line) {
            Some(prompt::prompt_reply(self.target)?)
        } else {
            None
        };
        if !self.quiet {
            self.output.progress(line);
        }
        self.lines.push(line.to_string());
        Ok(reply)
    }
}
