// ABOUTME: Binary entry point: wires CLI flags into an orchestrator run.
// ABOUTME: Picks the transport (SSH or local shell) and dispatches the action.

use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use marionette::auth::{Credentials, Escalation};
use marionette::cli::{Cli, Command};
use marionette::inventory::{Inventory, INVENTORY_FILE};
use marionette::orchestrator::{Orchestrator, RequestedHostSet, RunOptions};
use marionette::output::{Output, OutputMode};
use marionette::state::{InstallState, STATE_DIR};
use marionette::transport::{LocalTransport, SshTransport, Transport};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mode = if cli.json {
        OutputMode::Json
    } else if cli.quiet {
        OutputMode::Quiet
    } else {
        OutputMode::Normal
    };
    let output = Output::new(mode);

    if let Err(e) = run(cli, output.clone()).await {
        output.error(&e.to_string());
        std::process::exit(1);
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "marionette=info",
        1 => "marionette=debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli, output: Output) -> marionette::error::Result<()> {
    let credentials = Credentials::load(cli.password_file.as_deref())?;
    let escalation = match cli.swap_user {
        Some(swap) => swap.into(),
        None => Escalation::for_user(&cli.ssh_username),
    };

    let inventory = if cli.local {
        Inventory::local()
    } else {
        Inventory::load(Path::new(INVENTORY_FILE))?
    };

    let transport: Arc<dyn Transport> = if cli.local {
        Arc::new(LocalTransport::new(output.clone()))
    } else {
        let mut ssh = SshTransport::new(output.clone());
        if let Some(key) = &cli.ssh_key {
            ssh = ssh.key_path(key);
        }
        Arc::new(ssh)
    };

    let state = InstallState::open(Path::new(STATE_DIR))?;
    let mut requested = RequestedHostSet::from_option(cli.only_hosts.as_deref());

    let mut options = RunOptions {
        ssh_username: cli.ssh_username.clone(),
        escalation,
        reinstall: cli.reinstall,
        workdir: PathBuf::from("."),
        ..RunOptions::default()
    };

    match cli.command {
        Command::Agents {
            puppetmaster,
            pp_role,
            challenge_password,
        } => {
            options.puppetmaster = puppetmaster;
            options.pp_role = pp_role;
            options.challenge_password = challenge_password;
            let mut orchestrator =
                Orchestrator::new(transport, options, credentials, state, output);
            orchestrator.install_agents(&inventory, &mut requested).await
        }
        Command::Masters {
            control_repo,
            console_admin_password,
            pp_role,
            challenge_password,
        } => {
            options.control_repo = control_repo;
            options.console_admin_password = console_admin_password;
            options.pp_role = pp_role;
            options.challenge_password = challenge_password;
            let mut orchestrator =
                Orchestrator::new(transport, options, credentials, state, output);
            orchestrator.install_masters(&inventory, &mut requested).await
        }
        Command::Status => {
            let mut orchestrator =
                Orchestrator::new(transport, options, credentials, state, output);
            orchestrator.status(&inventory, &mut requested).await
        }
        Command::UploadAgents => {
            let mut orchestrator =
                Orchestrator::new(transport, options, credentials, state, output);
            orchestrator.upload_agents(&inventory, &mut requested).await
        }
        Command::UploadGems => {
            let mut orchestrator =
                Orchestrator::new(transport, options, credentials, state, output);
            orchestrator.upload_gems(&inventory, &mut requested).await
        }
    }
}
