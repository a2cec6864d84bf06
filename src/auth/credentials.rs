// ABOUTME: Escalation secret resolution from a password file or environment.
// ABOUTME: Absence of a secret is deferred until a prompt actually needs it.

use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable consulted for the sudo (login user) password.
pub const USER_PASSWORD_ENV: &str = "MARIONETTE_USER_PASSWORD";

/// Environment variable consulted for the su (root) password.
pub const ROOT_PASSWORD_ENV: &str = "MARIONETTE_ROOT_PASSWORD";

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("a sudo password is required; set user_password in the password file or export {}", USER_PASSWORD_ENV)]
    MissingUserPassword,

    #[error("an su password is required; set root_password in the password file or export {}", ROOT_PASSWORD_ENV)]
    MissingRootPassword,

    #[error("failed to read password file {path}: {reason}")]
    PasswordFile { path: PathBuf, reason: String },
}

/// Optional YAML password file with per-kind secrets.
#[derive(Debug, Default, Deserialize)]
struct PasswordFile {
    #[serde(default)]
    user_password: Option<String>,
    #[serde(default)]
    root_password: Option<String>,
}

/// Resolved escalation secrets for a run.
///
/// Resolution order per secret kind: password file first, then the
/// well-known environment variable. A missing secret is not an error
/// here; it only surfaces when an escalation prompt demands it.
#[derive(Clone, Default)]
pub struct Credentials {
    user_password: Option<String>,
    root_password: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user_password", &self.user_password.as_ref().map(|_| "<redacted>"))
            .field("root_password", &self.root_password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Credentials {
    pub fn load(password_file: Option<&Path>) -> Result<Self, CredentialError> {
        let file = match password_file {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    CredentialError::PasswordFile {
                        path: path.to_path_buf(),
                        reason: e.to_string(),
                    }
                })?;
                serde_yaml::from_str::<PasswordFile>(&text).map_err(|e| {
                    CredentialError::PasswordFile {
                        path: path.to_path_buf(),
                        reason: e.to_string(),
                    }
                })?
            }
            None => PasswordFile::default(),
        };

        Ok(Self {
            user_password: file.user_password.or_else(|| env::var(USER_PASSWORD_ENV).ok()),
            root_password: file.root_password.or_else(|| env::var(ROOT_PASSWORD_ENV).ok()),
        })
    }

    /// Build credentials from literal secrets. Used by tests and local mode.
    pub fn from_secrets(user_password: Option<String>, root_password: Option<String>) -> Self {
        Self {
            user_password,
            root_password,
        }
    }

    pub fn user_password(&self) -> Option<&str> {
        self.user_password.as_deref()
    }

    pub fn root_password(&self) -> Option<&str> {
        self.root_password.as_deref()
    }

    pub fn require_user_password(&self) -> Result<&str, CredentialError> {
        self.user_password
            .as_deref()
            .ok_or(CredentialError::MissingUserPassword)
    }

    pub fn require_root_password(&self) -> Result<&str, CredentialError> {
        self.root_password
            .as_deref()
            .ok_or(CredentialError::MissingRootPassword)
    }
}
