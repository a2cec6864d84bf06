// ABOUTME: Application-wide error types for marionette.
// ABOUTME: Covers run-aborting failures raised before any host loop starts.

use std::path::PathBuf;
use thiserror::Error;

use crate::auth::CredentialError;

/// Errors that abort the whole run. Per-host failures use
/// `orchestrator::HostError` and are caught at the host-loop boundary.
#[derive(Debug, Error)]
pub enum Error {
    #[error("inventory file not found at {0}")]
    InventoryNotFound(PathBuf),

    #[error("invalid inventory: {0}")]
    InvalidInventory(String),

    #[error(
        "must specify a puppetmaster address for {0}; set pm=... in the inventory or pass --puppetmaster"
    )]
    MissingPuppetmaster(String),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
