// ABOUTME: Authentication concerns: escalation secrets and privilege strategies.
// ABOUTME: SSH login credentials (keys/agent) live in the transport layer.

mod credentials;
mod escalation;

pub use credentials::{Credentials, CredentialError, ROOT_PASSWORD_ENV, USER_PASSWORD_ENV};
pub use escalation::Escalation;
