// ABOUTME: Per-host install state machines: agent, full master, compile master.
// ABOUTME: Every step runs through the transport; MARK_INSTALLED only on full success.

use minijinja::context;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;

use super::error::{HostError, HostResult};
use super::Orchestrator;
use crate::action_log;
use crate::inventory::InventoryEntry;
use crate::templates::{CLASSIFY_SCRIPT, CLASSIFY_SCRIPT_REMOTE};
use crate::transport::{ConnectionTarget, Error as TransportError};

const PUPPET_AGENT_BIN: &str = "/opt/puppetlabs/bin/puppet";
const PUPPET_CONFDIR: &str = "/etc/puppetlabs/puppet";
const R10K_SSH_DIR: &str = "/etc/puppetlabs/puppetserver/ssh";
const R10K_KEY_PATH: &str = "/etc/puppetlabs/puppetserver/ssh/id-control_repo.rsa";

/// Local staging directories, relative to the working directory.
const AGENT_LOCAL_DIR: &str = "agent_installers";
const GEM_LOCAL_DIR: &str = "gems/cache";

/// Remote destinations for staged agent installers.
const AGENT_UPLOAD_DIR: &str = "/opt/puppetlabs/server/data/staging/pe_repo-puppet-agent/";
const AGENT_UPLOAD_DIR_WINDOWS_X86: &str =
    "/opt/puppetlabs/server/data/packages/public/windows-i386/";
const AGENT_UPLOAD_DIR_WINDOWS_X64: &str =
    "/opt/puppetlabs/server/data/packages/public/windows-x86_64/";

/// Installer media naming, as shipped.
const MEDIA_PREFIX: &str = "puppet-enterprise-20";
const MEDIA_SUFFIX: &str = ".tar.gz";

/// Certificate request polling: bounded backoff instead of a blind sleep,
/// so slow CSR propagation is waited out and a dead controller times out.
const CSR_POLL_BASE: Duration = Duration::from_secs(1);
const CSR_POLL_CAP: Duration = Duration::from_secs(16);
const CSR_POLL_BUDGET: Duration = Duration::from_secs(60);

/// Resolved install branch for one master, with its preconditions in hand.
enum MasterPlan {
    Compile { mom: String },
    Full { media: PathBuf, key: Option<PathBuf> },
}

impl Orchestrator {
    /// Agent-only install: the full machine truncated after the install run.
    pub(super) async fn install_agent(&mut self, entry: &InventoryEntry) -> HostResult<()> {
        let hostname = entry.hostname.clone();
        self.output
            .progress(&format!("Installing agent on {hostname}"));
        action_log::note(&format!("install agent on {hostname}"));

        let puppetmaster = self
            .options
            .puppetmaster
            .clone()
            .or_else(|| entry.attr("pm").map(str::to_string))
            .ok_or_else(|| HostError::MissingPuppetmaster {
                hostname: hostname.clone(),
            })?;
        let pp_role = self
            .options
            .pp_role
            .clone()
            .or_else(|| entry.attr("pp_role").map(str::to_string));

        let target = self.target_for(&hostname);
        self.setup_csr_attributes(&target, entry).await?;

        let (user_start, user_end) = self.options.escalation.wrap();
        let script = self.renderer.render(
            "install_agent.sh",
            context! {
                puppetmaster,
                certname => hostname,
                pp_role,
                user_start,
                user_end,
            },
        )?;
        self.transport.execute(&target, &script).await?;

        self.state.mark_installed(&hostname)?;
        self.output
            .success(&format!("agent installation for {hostname} completed"));
        Ok(())
    }

    /// Full master install, or the compile-master branch when the inventory
    /// says so. Preconditions are checked up front so a misconfigured host
    /// issues zero commands.
    pub(super) async fn install_master(&mut self, entry: &InventoryEntry) -> HostResult<()> {
        let hostname = entry.hostname.clone();
        self.output
            .progress(&format!("Installing master on {hostname}"));
        action_log::note(&format!("install master on {hostname}"));

        let compile_master = entry.flag("compile_master");

        // Resolve every precondition before issuing a single command, so a
        // misconfigured host leaves no half-done state behind.
        let plan = if compile_master {
            let mom = entry
                .attr("mom")
                .ok_or_else(|| HostError::MissingController {
                    hostname: hostname.clone(),
                })?
                .to_string();
            MasterPlan::Compile { mom }
        } else {
            let key = match entry.attr("r10k_private_key") {
                Some(rel) => {
                    let path = self.options.workdir.join(rel);
                    if !path.exists() {
                        return Err(HostError::PrivateKeyMissing { path });
                    }
                    Some(path)
                }
                None => None,
            };
            MasterPlan::Full {
                media: self.find_installer_media()?,
                key,
            }
        };

        // Control repo from inventory wins over the command-line default;
        // a configured repo anywhere implies code deployment.
        let control_repo = entry
            .attr("control_repo")
            .map(str::to_string)
            .or_else(|| self.options.control_repo.clone());
        let deploy_code = entry.flag("deploy_code") || control_repo.is_some();

        let dns_alt_names = entry.attr("dns_alt_names").map(|names| {
            names
                .split(',')
                .map(|n| format!("\"{}\"", n.trim()))
                .collect::<Vec<_>>()
                .join(",")
        });

        let target = self.target_for(&hostname);
        self.setup_csr_attributes(&target, entry).await?;

        match &plan {
            MasterPlan::Compile { mom } => {
                self.install_compile_master(entry, &target, mom, dns_alt_names.as_deref())
                    .await?;
            }
            MasterPlan::Full { media, key } => {
                self.run_full_install(
                    &target,
                    media,
                    key.as_deref(),
                    dns_alt_names.as_deref(),
                    deploy_code,
                    control_repo.as_deref(),
                )
                .await?;
            }
        }

        self.upload_dependency_artifacts(&target).await?;
        self.run_postinstall(&target).await?;
        self.run_final_configuration(&target, &hostname).await?;

        if !compile_master && deploy_code {
            if let Some(repo) = &control_repo {
                self.setup_code_manager(&target, repo).await?;
            }
        }

        self.state.mark_installed(&hostname)?;
        self.output
            .success(&format!("master installation for {hostname} completed"));
        Ok(())
    }

    /// Compile-master branch: install an agent reporting to the controller,
    /// get its certificate signed there, then classify and converge both.
    async fn install_compile_master(
        &self,
        entry: &InventoryEntry,
        target: &ConnectionTarget,
        mom: &str,
        dns_alt_names: Option<&str>,
    ) -> HostResult<()> {
        let hostname = &target.hostname;
        let mom_target = self.target_for(mom);
        let (user_start, user_end) = self.options.escalation.wrap();

        let lb_host = entry.attr("lb");
        if let Some(lb) = lb_host {
            let script = self.renderer.render(
                "lb_external_fact.sh",
                context! { lb_host => lb, user_start, user_end },
            )?;
            self.transport.execute(target, &script).await?;
        }

        let script = self.renderer.render(
            "install_compile_master.sh",
            context! {
                mom,
                certname => hostname,
                dns_alt_names,
                user_start,
                user_end,
            },
        )?;
        self.transport.execute(target, &script).await?;

        self.wait_for_csr(&mom_target, hostname).await?;

        let script = self.renderer.render(
            "sign_cert.sh",
            context! { certname => hostname, user_start, user_end },
        )?;
        action_log::note(&format!("sign certificate for {hostname} on {mom}"));
        self.transport.execute(&mom_target, &script).await?;

        self.output
            .progress(&format!("Classifying {hostname} as compile master"));
        self.upload_classify_script(&mom_target).await?;
        self.transport
            .execute(&mom_target, &format!("chmod +x {CLASSIFY_SCRIPT_REMOTE}"))
            .await?;

        // The fact expression is dollar-escaped so the shell on the
        // controller passes it through literally; with multiple regional
        // load balancers each compile master resolves its own.
        let lb_fact = if lb_host.is_some() {
            "\\$puppet_load_balancer"
        } else {
            ""
        };
        self.transport
            .execute(
                &mom_target,
                &format!("{user_start} {CLASSIFY_SCRIPT_REMOTE} {hostname} {lb_fact} {user_end}"),
            )
            .await?;

        self.run_final_configuration(target, hostname).await?;
        self.run_final_configuration(&mom_target, mom).await?;
        Ok(())
    }

    /// Full install branch: media upload, optional key staging, installer run.
    async fn run_full_install(
        &self,
        target: &ConnectionTarget,
        media: &Path,
        r10k_private_key: Option<&Path>,
        dns_alt_names: Option<&str>,
        deploy_code: bool,
        control_repo: Option<&str>,
    ) -> HostResult<()> {
        let (user_start, user_end) = self.options.escalation.wrap();
        let media_archive = media
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let media_dir = media_archive
            .strip_suffix(MEDIA_SUFFIX)
            .unwrap_or(&media_archive)
            .to_string();

        self.transport
            .transfer_file(
                target,
                media,
                &format!("/tmp/{media_archive}"),
                "installer media",
            )
            .await?;

        if let Some(key) = r10k_private_key {
            let temp_key = "/tmp/id-control_repo.rsa";
            self.transport
                .transfer_file(target, key, temp_key, "control repo key")
                .await?;
            self.transport
                .execute(
                    target,
                    &format!("{user_start} mkdir -p {R10K_SSH_DIR} {user_end}"),
                )
                .await?;
            self.transport
                .execute(
                    target,
                    &format!("{user_start} mv {temp_key} {R10K_KEY_PATH} {user_end}"),
                )
                .await?;
        }

        let script = self.renderer.render(
            "install_master.sh",
            context! {
                media_archive,
                media_dir,
                console_admin_password => self.options.console_admin_password,
                certname => target.hostname,
                dns_alt_names,
                deploy_code,
                control_repo,
                r10k_key_path => R10K_KEY_PATH,
                user_start,
                user_end,
            },
        )?;
        self.transport.execute(target, &script).await?;

        if r10k_private_key.is_some() {
            self.transport
                .execute(
                    target,
                    &format!("{user_start} chown pe-puppet:pe-puppet {R10K_KEY_PATH} {user_end}"),
                )
                .await?;
            self.transport
                .execute(
                    target,
                    &format!("{user_start} chmod 600 {R10K_KEY_PATH} {user_end}"),
                )
                .await?;
        }
        Ok(())
    }

    /// Render and upload the CSR attributes payload when the host (or the
    /// command line) asked for it, then move it into the agent confdir.
    pub(super) async fn setup_csr_attributes(
        &self,
        target: &ConnectionTarget,
        entry: &InventoryEntry,
    ) -> HostResult<()> {
        let challenge_password = self.options.challenge_password.as_deref();
        let mut extensions = entry.extension_attributes();
        if let Some(role) = &self.options.pp_role {
            extensions.insert("pp_role".to_string(), role.clone());
        }

        if challenge_password.is_none() && !entry.wants_csr_attributes() && extensions.is_empty() {
            return Ok(());
        }

        self.output.progress(&format!(
            "Setting up CSR attributes on {}",
            target.hostname
        ));
        let yaml = self.renderer.render(
            "csr_attributes.yaml",
            context! { challenge_password, extensions },
        )?;

        let staged = std::env::temp_dir().join(format!("csr_attributes-{}.yaml", target.hostname));
        std::fs::write(&staged, yaml)?;

        let result = self
            .push_csr_attributes(target, &staged)
            .await;
        let _ = std::fs::remove_file(&staged);
        result
    }

    async fn push_csr_attributes(
        &self,
        target: &ConnectionTarget,
        staged: &Path,
    ) -> HostResult<()> {
        let (user_start, user_end) = self.options.escalation.wrap();
        self.transport
            .transfer_file(target, staged, "/tmp/csr_attributes.yaml", "CSR attributes")
            .await?;
        let script = self.renderer.render(
            "move_csr_attributes.sh",
            context! { confdir => PUPPET_CONFDIR, user_start, user_end },
        )?;
        self.transport.execute(target, &script).await?;
        Ok(())
    }

    /// Bounded poll for the compile master's certificate request on the
    /// controller: exponential backoff with an explicit timeout instead of
    /// hoping a fixed sleep is long enough.
    async fn wait_for_csr(
        &self,
        mom_target: &ConnectionTarget,
        certname: &str,
    ) -> HostResult<()> {
        let (user_start, user_end) = self.options.escalation.wrap();
        let script = self.renderer.render(
            "check_csr.sh",
            context! { certname, user_start, user_end },
        )?;

        let started = Instant::now();
        let mut delay = CSR_POLL_BASE;
        loop {
            match self.transport.execute(mom_target, &script).await {
                Ok(_) => return Ok(()),
                Err(TransportError::CommandFailed { .. }) => {
                    if started.elapsed() + delay > CSR_POLL_BUDGET {
                        return Err(HostError::CsrTimeout {
                            hostname: certname.to_string(),
                            controller: mom_target.hostname.clone(),
                            timeout: CSR_POLL_BUDGET,
                        });
                    }
                    self.output.progress(&format!(
                        "certificate request from {certname} not on {} yet, retrying in {:?}",
                        mom_target.hostname, delay
                    ));
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(CSR_POLL_CAP);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn upload_classify_script(&self, mom_target: &ConnectionTarget) -> HostResult<()> {
        let staged = std::env::temp_dir().join("classify_compile_master.sh");
        std::fs::write(&staged, CLASSIFY_SCRIPT)?;
        let result = self
            .transport
            .transfer_file(
                mom_target,
                &staged,
                CLASSIFY_SCRIPT_REMOTE,
                "classification script",
            )
            .await;
        let _ = std::fs::remove_file(&staged);
        result?;
        Ok(())
    }

    /// Best-effort dependency staging: agent installers and offline gems.
    /// Both are no-ops when nothing is staged locally.
    async fn upload_dependency_artifacts(&self, target: &ConnectionTarget) -> HostResult<()> {
        self.upload_agent_installers(target).await?;
        self.upload_offline_gems(target).await?;
        Ok(())
    }

    pub(super) async fn upload_agent_installers(
        &self,
        target: &ConnectionTarget,
    ) -> HostResult<()> {
        let local_dir = self.options.workdir.join(AGENT_LOCAL_DIR);
        if !local_dir.is_dir() {
            return Ok(());
        }

        let (user_start, user_end) = self.options.escalation.wrap();
        self.transport
            .execute(
                target,
                &format!(
                    "{user_start} mkdir -p {AGENT_UPLOAD_DIR} {AGENT_UPLOAD_DIR_WINDOWS_X86} {AGENT_UPLOAD_DIR_WINDOWS_X64} {user_end}"
                ),
            )
            .await?;

        for file in sorted_files(&local_dir)? {
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            self.transport
                .transfer_file(target, &file, &format!("/tmp/{name}"), &format!("agent installer {name}"))
                .await?;

            let destination = if name.ends_with(".msi") {
                if name.contains("x86") {
                    AGENT_UPLOAD_DIR_WINDOWS_X86
                } else {
                    AGENT_UPLOAD_DIR_WINDOWS_X64
                }
            } else {
                AGENT_UPLOAD_DIR
            };
            self.transport
                .execute(
                    target,
                    &format!("{user_start} cp /tmp/{name} {destination} {user_end}"),
                )
                .await?;
        }
        Ok(())
    }

    pub(super) async fn upload_offline_gems(&self, target: &ConnectionTarget) -> HostResult<()> {
        let cache_dir = self.options.workdir.join(GEM_LOCAL_DIR);
        if !cache_dir.is_dir() {
            return Ok(());
        }

        self.transport.execute(target, "mkdir -p /tmp/gems").await?;

        let mut uploaded_any = false;
        for file in sorted_files(&cache_dir)? {
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            self.transport
                .transfer_file(target, &file, &format!("/tmp/gems/{name}"), &format!("gem {name}"))
                .await?;
            uploaded_any = true;
        }

        if uploaded_any {
            let (user_start, user_end) = self.options.escalation.wrap();
            let script = self
                .renderer
                .render("offline_gems.sh", context! { user_start, user_end })?;
            self.transport.execute(target, &script).await?;
        }
        Ok(())
    }

    async fn run_postinstall(&self, target: &ConnectionTarget) -> HostResult<()> {
        let (user_start, user_end) = self.options.escalation.wrap();
        let script = self
            .renderer
            .render("postinstall.sh", context! { user_start, user_end })?;
        self.transport.execute(target, &script).await?;
        Ok(())
    }

    /// Run the agent once to finalize configuration on a host.
    async fn run_final_configuration(
        &self,
        target: &ConnectionTarget,
        label: &str,
    ) -> HostResult<()> {
        let (user_start, user_end) = self.options.escalation.wrap();
        self.output.progress(&format!("Running agent on {label}..."));
        action_log::note(&format!("begin agent run on {label}"));
        self.transport
            .execute(
                target,
                &format!("{user_start} {PUPPET_AGENT_BIN} agent -t {user_end}"),
            )
            .await?;
        action_log::note(&format!("end agent run on {label}"));
        self.output.progress("...done!");
        Ok(())
    }

    async fn setup_code_manager(
        &self,
        target: &ConnectionTarget,
        control_repo: &str,
    ) -> HostResult<()> {
        self.output.progress(&format!(
            "Setting up code manager on {}",
            target.hostname
        ));
        let (user_start, user_end) = self.options.escalation.wrap();
        let script = self.renderer.render(
            "setup_code_manager.sh",
            context! { control_repo, user_start, user_end },
        )?;
        self.transport.execute(target, &script).await?;
        Ok(())
    }

    pub(super) async fn print_status(&self, hostname: &str) {
        self.output.progress(&format!("host {hostname} status:"));
        let target = self.target_for(hostname);
        let (user_start, user_end) = self.options.escalation.wrap();
        let result: HostResult<()> = async {
            let script = self
                .renderer
                .render("status.sh", context! { user_start, user_end })?;
            self.transport.execute(&target, &script).await?;
            Ok(())
        }
        .await;
        if let Err(e) = result {
            self.report_host_error(hostname, &e);
        }
    }

    /// Newest staged installer tarball in the working directory.
    fn find_installer_media(&self) -> HostResult<PathBuf> {
        let dir = &self.options.workdir;
        let mut media: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(MEDIA_PREFIX) && n.ends_with(MEDIA_SUFFIX))
            })
            .collect();
        media.sort();
        media.pop().ok_or_else(|| HostError::MediaMissing {
            dir: dir.clone(),
        })
    }
}

fn sorted_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    Ok(files)
}
