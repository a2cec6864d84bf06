// ABOUTME: Host orchestration: role loops, per-host gating, failure isolation.
// ABOUTME: The per-host install state machine lives in install.rs.

mod error;
mod install;

pub use error::{HostError, HostErrorKind, HostResult};

use std::path::PathBuf;
use std::sync::Arc;

use crate::auth::{Credentials, Escalation};
use crate::inventory::{Inventory, InventoryEntry, AGENTS_SECTION, MASTERS_SECTION};
use crate::output::Output;
use crate::state::InstallState;
use crate::templates::ScriptRenderer;
use crate::transport::{ConnectionTarget, Transport};

/// Pre-parsed options the orchestrator needs; assembled from the CLI.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub ssh_username: String,
    pub escalation: Escalation,
    pub reinstall: bool,
    pub puppetmaster: Option<String>,
    pub pp_role: Option<String>,
    pub control_repo: Option<String>,
    pub console_admin_password: String,
    pub challenge_password: Option<String>,
    /// Where staged artifacts (installer media, agent packages, gems) live.
    pub workdir: PathBuf,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            ssh_username: "root".to_string(),
            escalation: Escalation::None,
            reinstall: false,
            puppetmaster: None,
            pp_role: None,
            control_repo: None,
            console_admin_password: "admin".to_string(),
            challenge_password: None,
            workdir: PathBuf::from("."),
        }
    }
}

/// Hosts the operator explicitly named with --only-hosts.
///
/// Doubles as a filter during the inventory pass and a work list afterwards:
/// hosts are removed as they are matched, so whatever remains at the end is
/// "requested but not present in inventory" and gets the fallback pass.
/// Matching is case-insensitive throughout.
#[derive(Debug, Clone, Default)]
pub struct RequestedHostSet {
    hosts: Option<Vec<String>>,
}

impl RequestedHostSet {
    /// Parse a comma-separated list; `None` or empty means unrestricted.
    pub fn from_option(list: Option<&str>) -> Self {
        let hosts = list
            .map(|s| {
                s.split(',')
                    .map(|h| h.trim().to_lowercase())
                    .filter(|h| !h.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|v| !v.is_empty());
        Self { hosts }
    }

    pub fn unrestricted() -> Self {
        Self { hosts: None }
    }

    pub fn is_restricted(&self) -> bool {
        self.hosts.is_some()
    }

    /// Whether this host may be processed: always true when unrestricted.
    pub fn allows(&self, hostname: &str) -> bool {
        match &self.hosts {
            None => true,
            Some(hosts) => hosts.iter().any(|h| h == &hostname.to_lowercase()),
        }
    }

    /// Mark a host as satisfied so the fallback pass skips it.
    pub fn remove(&mut self, hostname: &str) {
        if let Some(hosts) = &mut self.hosts {
            let hostname = hostname.to_lowercase();
            hosts.retain(|h| h != &hostname);
        }
    }

    /// Drain the hosts that were requested but never matched in inventory.
    pub fn take_remaining(&mut self) -> Vec<String> {
        self.hosts.take().unwrap_or_default()
    }

    pub fn remaining(&self) -> &[String] {
        self.hosts.as_deref().unwrap_or(&[])
    }
}

/// Drives the per-role host loops and owns everything a run needs.
/// Hosts are processed strictly sequentially; one host's entire state
/// machine completes (or fails) before the next host begins.
pub struct Orchestrator {
    transport: Arc<dyn Transport>,
    options: RunOptions,
    credentials: Credentials,
    state: InstallState,
    renderer: ScriptRenderer,
    output: Output,
}

impl Orchestrator {
    pub fn new(
        transport: Arc<dyn Transport>,
        options: RunOptions,
        credentials: Credentials,
        state: InstallState,
        output: Output,
    ) -> Self {
        Self {
            transport,
            options,
            credentials,
            state,
            renderer: ScriptRenderer::new(),
            output,
        }
    }

    pub fn install_state(&self) -> &InstallState {
        &self.state
    }

    fn target_for(&self, hostname: &str) -> ConnectionTarget {
        ConnectionTarget::new(
            hostname,
            self.options.ssh_username.clone(),
            self.options.escalation,
            self.credentials.clone(),
        )
    }

    /// Per-host gating: filtered out by --only-hosts, or already installed
    /// (unless --reinstall). Skipping an installed host also satisfies its
    /// entry in the requested set.
    fn should_process(&self, hostname: &str, requested: &mut RequestedHostSet) -> bool {
        let hostname = hostname.to_lowercase();
        if !requested.allows(&hostname) {
            return false;
        }

        if self.state.installed(&hostname) {
            if self.options.reinstall {
                self.output.progress(&format!(
                    "{hostname} already installed, reinstalling as you requested"
                ));
            } else {
                self.output
                    .progress(&format!("{hostname} already installed, skipping"));
                requested.remove(&hostname);
                return false;
            }
        }
        true
    }

    fn report_host_error(&self, hostname: &str, error: &HostError) {
        tracing::error!(host = hostname, kind = ?error.kind(), "{error}");
        self.output.error(&format!("{hostname}: {error}"));
    }

    /// Install agents on every host in the [agents] section, then on any
    /// explicitly requested hosts that had no inventory entry.
    ///
    /// A host with no resolvable puppetmaster address is an operator
    /// mistake, not a host failure: it aborts the whole run instead of
    /// being swallowed at the loop boundary.
    pub async fn install_agents(
        &mut self,
        inventory: &Inventory,
        requested: &mut RequestedHostSet,
    ) -> crate::error::Result<()> {
        for entry in inventory.section(AGENTS_SECTION) {
            if !self.should_process(&entry.hostname, requested) {
                continue;
            }
            match self.install_agent(entry).await {
                Ok(()) => requested.remove(&entry.hostname),
                Err(HostError::MissingPuppetmaster { hostname }) => {
                    return Err(crate::error::Error::MissingPuppetmaster(hostname));
                }
                Err(e) => self.report_host_error(&entry.hostname, &e),
            }
        }

        for hostname in requested.take_remaining() {
            self.output.progress(&format!(
                "{hostname} has no entry in inventory but installing as you have requested..."
            ));
            let entry = InventoryEntry::bare(&hostname);
            match self.install_agent(&entry).await {
                Ok(()) => {}
                Err(HostError::MissingPuppetmaster { hostname: host }) => {
                    return Err(crate::error::Error::MissingPuppetmaster(host));
                }
                Err(e) => self.report_host_error(&hostname, &e),
            }
        }
        Ok(())
    }

    /// Install masters (full or compile-master) from [puppetmasters], then
    /// any explicitly requested hosts absent from inventory.
    pub async fn install_masters(
        &mut self,
        inventory: &Inventory,
        requested: &mut RequestedHostSet,
    ) -> crate::error::Result<()> {
        for entry in inventory.section(MASTERS_SECTION) {
            if !self.should_process(&entry.hostname, requested) {
                continue;
            }
            match self.install_master(entry).await {
                Ok(()) => requested.remove(&entry.hostname),
                Err(e) => self.report_host_error(&entry.hostname, &e),
            }
        }

        for hostname in requested.take_remaining() {
            self.output.progress(&format!(
                "{hostname} has no entry in inventory but installing as you have requested..."
            ));
            let entry = InventoryEntry::bare(&hostname);
            if let Err(e) = self.install_master(&entry).await {
                self.report_host_error(&hostname, &e);
            }
        }
        Ok(())
    }

    /// Query status across every inventory section plus requested extras.
    pub async fn status(
        &mut self,
        inventory: &Inventory,
        requested: &mut RequestedHostSet,
    ) -> crate::error::Result<()> {
        let hosts: Vec<String> = inventory
            .sections()
            .flat_map(|(_, entries)| entries.iter().map(|e| e.hostname.clone()))
            .collect();

        for hostname in hosts {
            if !requested.allows(&hostname) {
                continue;
            }
            self.print_status(&hostname).await;
            requested.remove(&hostname);
        }

        for hostname in requested.take_remaining() {
            self.print_status(&hostname).await;
        }
        Ok(())
    }

    /// Stage agent installer packages onto every master.
    pub async fn upload_agents(
        &mut self,
        inventory: &Inventory,
        requested: &mut RequestedHostSet,
    ) -> crate::error::Result<()> {
        for entry in inventory.section(MASTERS_SECTION) {
            if !self.should_process(&entry.hostname, requested) {
                continue;
            }
            let target = self.target_for(&entry.hostname);
            match self.upload_agent_installers(&target).await {
                Ok(()) => requested.remove(&entry.hostname),
                Err(e) => self.report_host_error(&entry.hostname, &e),
            }
        }

        for hostname in requested.take_remaining() {
            self.output.progress(&format!(
                "{hostname} has no entry in inventory but uploading agent installers as requested..."
            ));
            let target = self.target_for(&hostname);
            if let Err(e) = self.upload_agent_installers(&target).await {
                self.report_host_error(&hostname, &e);
            }
        }
        Ok(())
    }

    /// Push the offline gem cache onto every master.
    pub async fn upload_gems(
        &mut self,
        inventory: &Inventory,
        requested: &mut RequestedHostSet,
    ) -> crate::error::Result<()> {
        for entry in inventory.section(MASTERS_SECTION) {
            if !self.should_process(&entry.hostname, requested) {
                continue;
            }
            let target = self.target_for(&entry.hostname);
            match self.upload_offline_gems(&target).await {
                Ok(()) => requested.remove(&entry.hostname),
                Err(e) => self.report_host_error(&entry.hostname, &e),
            }
        }

        for hostname in requested.take_remaining() {
            self.output.progress(&format!(
                "{hostname} has no entry in inventory but uploading gems as requested..."
            ));
            let target = self.target_for(&hostname);
            if let Err(e) = self.upload_offline_gems(&target).await {
                self.report_host_error(&hostname, &e);
            }
        }
        Ok(())
    }
}
