// ABOUTME: Elevation prompt detection on streamed process output.
// ABOUTME: Matchers are a pluggable list so new prompt shapes can be added.

use super::error::{Error, Result};
use super::ConnectionTarget;
use crate::auth::Escalation;

/// Known elevation prompt shapes, checked against each output line.
///
/// Line-pattern matching on arbitrary process output is inherently fragile;
/// keeping the patterns as data means the transport loop never changes when
/// a new shape turns up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptMatcher {
    /// `[sudo] password for <user>:`
    Sudo,
    /// Bare `Password:` as printed by su and some sudo configurations.
    GenericPassword,
}

impl PromptMatcher {
    pub fn matches(&self, line: &str, username: &str) -> bool {
        match self {
            PromptMatcher::Sudo => line
                .trim_start()
                .starts_with(&format!("[sudo] password for {username}:")),
            PromptMatcher::GenericPassword => line.contains("Password:"),
        }
    }
}

/// The matcher set both transports consult, in match order.
pub fn default_matchers() -> Vec<PromptMatcher> {
    vec![PromptMatcher::Sudo, PromptMatcher::GenericPassword]
}

/// Decide the reply for a matched prompt, per the target's strategy.
///
/// su answers with the root secret, sudo with the user secret. A missing
/// secret is a `CredentialError` naming what to export; a prompt with no
/// strategy configured is an unexpected authentication request.
pub(crate) fn prompt_reply(target: &ConnectionTarget) -> Result<String> {
    match target.escalation {
        Escalation::Su => Ok(target.credentials.require_root_password()?.to_string()),
        Escalation::Sudo => Ok(target.credentials.require_user_password()?.to_string()),
        Escalation::None => Err(Error::UnexpectedPrompt(target.hostname.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sudo_prompt_matches_only_the_right_user() {
        let m = PromptMatcher::Sudo;
        assert!(m.matches("[sudo] password for alice:", "alice"));
        assert!(!m.matches("[sudo] password for bob:", "alice"));
        assert!(!m.matches("installing package", "alice"));
    }

    #[test]
    fn generic_prompt_matches_anywhere_in_line() {
        let m = PromptMatcher::GenericPassword;
        assert!(m.matches("Password:", "alice"));
        assert!(m.matches("root's Password:", "alice"));
        assert!(!m.matches("passwords must be rotated", "alice"));
    }
}
