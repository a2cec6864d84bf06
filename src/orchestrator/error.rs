// ABOUTME: Per-host error type with SNAFU pattern.
// ABOUTME: Unifies configuration, credential, and transport failures for the host loop.

use snafu::Snafu;
use std::path::PathBuf;
use std::time::Duration;

use crate::auth::CredentialError;
use crate::transport;

/// A failure while processing one host. Caught at the host-loop boundary:
/// logged with the hostname, never allowed to abort the rest of the run.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum HostError {
    #[snafu(display(
        "must specify a puppetmaster address for {hostname}; set pm=... in the inventory or pass --puppetmaster"
    ))]
    MissingPuppetmaster { hostname: String },

    #[snafu(display(
        "compile master {hostname} needs a controller; set mom=PUPPETMASTER_FQDN in the inventory"
    ))]
    MissingController { hostname: String },

    #[snafu(display("control repository private key not found at {}", path.display()))]
    PrivateKeyMissing { path: PathBuf },

    #[snafu(display(
        "no installer media found; download the product tarball into {}", dir.display()
    ))]
    MediaMissing { dir: PathBuf },

    #[snafu(display(
        "timed out after {timeout:?} waiting for the certificate request from {hostname} to arrive on {controller}"
    ))]
    CsrTimeout {
        hostname: String,
        controller: String,
        timeout: Duration,
    },

    #[snafu(display("{source}"))]
    Transport { source: transport::Error },

    #[snafu(display("template rendering failed: {source}"))]
    Template { source: minijinja::Error },

    #[snafu(display("I/O error: {source}"))]
    Io { source: std::io::Error },
}

/// Error kind for programmatic handling and log classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostErrorKind {
    /// The host's configuration is wrong; no amount of retrying helps.
    Configuration,
    /// An escalation prompt appeared but the required secret is missing.
    Credential,
    /// A command or transfer failed on the wire.
    Transport,
}

impl HostError {
    pub fn kind(&self) -> HostErrorKind {
        match self {
            HostError::MissingPuppetmaster { .. }
            | HostError::MissingController { .. }
            | HostError::PrivateKeyMissing { .. }
            | HostError::MediaMissing { .. }
            | HostError::Template { .. } => HostErrorKind::Configuration,
            HostError::Transport {
                source: transport::Error::Credential(_),
            } => HostErrorKind::Credential,
            HostError::CsrTimeout { .. }
            | HostError::Transport { .. }
            | HostError::Io { .. } => HostErrorKind::Transport,
        }
    }
}

impl From<transport::Error> for HostError {
    fn from(source: transport::Error) -> Self {
        HostError::Transport { source }
    }
}

impl From<CredentialError> for HostError {
    fn from(source: CredentialError) -> Self {
        HostError::Transport {
            source: transport::Error::Credential(source),
        }
    }
}

impl From<minijinja::Error> for HostError {
    fn from(source: minijinja::Error) -> Self {
        HostError::Template { source }
    }
}

impl From<std::io::Error> for HostError {
    fn from(source: std::io::Error) -> Self {
        HostError::Io { source }
    }
}

pub type HostResult<T> = std::result::Result<T, HostError>;
