// ABOUTME: Command-line interface definition using clap.
// ABOUTME: Global connection/gating flags plus one subcommand per action.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::auth::Escalation;

#[derive(Parser)]
#[command(
    name = "marionette",
    version,
    about = "Installs and wires up Puppet Enterprise across an inventory of hosts"
)]
pub struct Cli {
    /// Account to connect as; escalation defaults off for root
    #[arg(long, global = true, default_value = "root")]
    pub ssh_username: String,

    /// SSH private key to authenticate with (default: agent, then ~/.ssh)
    #[arg(long, global = true)]
    pub ssh_key: Option<PathBuf>,

    /// YAML file holding escalation passwords (falls back to environment)
    #[arg(long, global = true)]
    pub password_file: Option<PathBuf>,

    /// Comma-separated hosts to process; others are skipped, and named
    /// hosts missing from inventory are still attempted
    #[arg(long, global = true)]
    pub only_hosts: Option<String>,

    /// Process hosts even when already recorded as installed
    #[arg(long, global = true)]
    pub reinstall: bool,

    /// Run against this machine through a local shell instead of SSH
    #[arg(long, global = true)]
    pub local: bool,

    /// Privilege escalation to wrap commands with (default: sudo for
    /// non-root connection accounts, none for root)
    #[arg(long, global = true, value_enum)]
    pub swap_user: Option<SwapUser>,

    /// Suppress streamed remote output; print only results and errors
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Emit results as JSON lines
    #[arg(long, global = true, conflicts_with = "quiet")]
    pub json: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Install agents on every host in the [agents] inventory section
    Agents {
        /// Master address agents should report to (overrides pm=... in inventory)
        #[arg(long)]
        puppetmaster: Option<String>,

        /// pp_role certificate extension to request for every host
        #[arg(long)]
        pp_role: Option<String>,

        /// Challenge password to embed in certificate requests
        #[arg(long)]
        challenge_password: Option<String>,
    },

    /// Install masters on every host in the [puppetmasters] inventory section
    Masters {
        /// Control repository URL; implies code deployment via Code Manager
        #[arg(long)]
        control_repo: Option<String>,

        /// Initial console admin password
        #[arg(long, default_value = "admin")]
        console_admin_password: String,

        /// pp_role certificate extension to request for every host
        #[arg(long)]
        pp_role: Option<String>,

        /// Challenge password to embed in certificate requests
        #[arg(long)]
        challenge_password: Option<String>,
    },

    /// Report agent status for every inventory host, including hosts
    /// already recorded as installed
    Status,

    /// Stage downloaded agent installer packages onto the masters
    UploadAgents,

    /// Push the offline gem cache onto the masters
    UploadGems,
}

/// How to reach root on the target hosts.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SwapUser {
    /// Run commands directly as the connection account
    None,
    /// Wrap commands with sudo
    Sudo,
    /// Wrap commands with su
    Su,
}

impl From<SwapUser> for Escalation {
    fn from(value: SwapUser) -> Self {
        match value {
            SwapUser::None => Escalation::None,
            SwapUser::Sudo => Escalation::Sudo,
            SwapUser::Su => Escalation::Su,
        }
    }
}
