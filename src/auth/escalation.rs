// ABOUTME: Privilege escalation strategies: none, sudo, or su to root.
// ABOUTME: Each strategy yields a prefix/suffix pair that wraps privileged commands.

/// How a command gains elevated rights on its target.
///
/// Script templates receive the prefix/suffix pair as `user_start` /
/// `user_end`, so the same script body works unmodified across strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Escalation {
    /// Commands run as the login identity, unwrapped.
    None,
    /// Escalate with the login user's own password.
    #[default]
    Sudo,
    /// Switch to root with a separately configured password.
    Su,
}

impl Escalation {
    /// Pick a strategy for a login user when none was set explicitly.
    /// Root needs no wrapping; everyone else sudos.
    pub fn for_user(username: &str) -> Self {
        if username == "root" {
            Escalation::None
        } else {
            Escalation::Sudo
        }
    }

    /// The command-wrapping pair for this strategy.
    pub fn wrap(&self) -> (&'static str, &'static str) {
        match self {
            Escalation::None => ("", ""),
            Escalation::Sudo => ("sudo", ""),
            // su only accepts the command as a single -c argument, so the
            // suffix closes the quote opened by the prefix.
            Escalation::Su => ("su root -c '", "'"),
        }
    }

    pub fn prefix(&self) -> &'static str {
        self.wrap().0
    }

    pub fn suffix(&self) -> &'static str {
        self.wrap().1
    }
}
