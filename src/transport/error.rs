// ABOUTME: Transport-specific error types.
// ABOUTME: Covers command execution, file transfer, and SSH session failures.

use std::path::PathBuf;
use thiserror::Error;

use crate::auth::CredentialError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("command failed with exit status {status} on {host}")]
    CommandFailed { host: String, status: u32 },

    #[error("command missing or file not found: {0}")]
    CommandMissing(String),

    #[error("{0} is requesting a password but no escalation strategy is configured")]
    UnexpectedPrompt(String),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("file transfer failed: {local} -> {remote}: {reason}")]
    Transfer {
        local: PathBuf,
        remote: String,
        reason: String,
    },

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("authentication failed: no valid credentials for SSH login")]
    AuthenticationFailed,

    #[error("SSH agent not available: {0}")]
    AgentUnavailable(String),

    #[error("failed to load key from {path}: {reason}")]
    KeyLoadFailed { path: PathBuf, reason: String },

    #[error("channel closed unexpectedly without exit status")]
    ChannelClosed,

    #[error("SSH protocol error: {0}")]
    Protocol(#[from] russh::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
