// ABOUTME: Integration tests for the host loops and per-host install machines.
// ABOUTME: Uses a recording mock transport; asserts command order and gating.

mod support;

use std::sync::Arc;

use marionette::auth::Credentials;
use marionette::inventory::Inventory;
use marionette::orchestrator::{Orchestrator, RequestedHostSet, RunOptions};
use marionette::output::{Output, OutputMode};
use marionette::state::InstallState;
use support::{Call, MockTransport};
use tempfile::TempDir;

fn build(
    state_dir: &TempDir,
    workdir: &TempDir,
    mut options: RunOptions,
) -> (Arc<MockTransport>, Orchestrator) {
    support::init_tracing();
    options.workdir = workdir.path().to_path_buf();
    let transport = Arc::new(MockTransport::new());
    let state = InstallState::open(state_dir.path()).unwrap();
    let orchestrator = Orchestrator::new(
        transport.clone(),
        options,
        Credentials::from_secrets(Some("pw".into()), Some("root-pw".into())),
        state,
        Output::new(OutputMode::Quiet),
    );
    (transport, orchestrator)
}

mod agents {
    use super::*;

    #[tokio::test]
    async fn installs_from_inventory_and_records_state() {
        let state_dir = TempDir::new().unwrap();
        let workdir = TempDir::new().unwrap();
        let (transport, mut orchestrator) = build(&state_dir, &workdir, RunOptions::default());
        let inventory = Inventory::parse(
            "[agents]\n\
             alpha.example.com pm=master1.example.com\n\
             beta.example.com pm=master1.example.com\n",
        )
        .unwrap();
        let mut requested = RequestedHostSet::unrestricted();

        orchestrator
            .install_agents(&inventory, &mut requested)
            .await
            .unwrap();

        let alpha = transport.commands_for("alpha.example.com");
        assert_eq!(alpha.len(), 1);
        assert!(alpha[0].contains("agent:certname=alpha.example.com"));
        assert!(alpha[0].contains("main:server=master1.example.com"));
        assert!(orchestrator.install_state().installed("alpha.example.com"));
        assert!(orchestrator.install_state().installed("beta.example.com"));
    }

    #[tokio::test]
    async fn one_failed_host_does_not_stop_the_rest() {
        let state_dir = TempDir::new().unwrap();
        let workdir = TempDir::new().unwrap();
        let (transport, mut orchestrator) = build(&state_dir, &workdir, RunOptions::default());
        transport.fail_commands_containing("certname=alpha");
        let inventory = Inventory::parse(
            "[agents]\n\
             alpha.example.com pm=m1\n\
             beta.example.com pm=m1\n",
        )
        .unwrap();
        let mut requested = RequestedHostSet::unrestricted();

        orchestrator
            .install_agents(&inventory, &mut requested)
            .await
            .unwrap();

        assert!(!orchestrator.install_state().installed("alpha.example.com"));
        assert!(orchestrator.install_state().installed("beta.example.com"));
        assert!(!transport.commands_for("beta.example.com").is_empty());
    }

    #[tokio::test]
    async fn missing_puppetmaster_aborts_the_whole_run() {
        let state_dir = TempDir::new().unwrap();
        let workdir = TempDir::new().unwrap();
        let (transport, mut orchestrator) = build(&state_dir, &workdir, RunOptions::default());
        let inventory = Inventory::parse(
            "[agents]\n\
             alpha.example.com\n\
             beta.example.com pm=m1\n",
        )
        .unwrap();
        let mut requested = RequestedHostSet::unrestricted();

        let err = orchestrator
            .install_agents(&inventory, &mut requested)
            .await
            .unwrap_err();

        // An unresolvable master address is an operator mistake: the run
        // stops before any command, and later hosts are not attempted.
        assert!(matches!(
            err,
            marionette::error::Error::MissingPuppetmaster(ref host) if host == "alpha.example.com"
        ));
        assert!(transport.calls().is_empty());
        assert!(!orchestrator.install_state().installed("beta.example.com"));
    }

    #[tokio::test]
    async fn missing_puppetmaster_on_a_requested_extra_also_aborts() {
        let state_dir = TempDir::new().unwrap();
        let workdir = TempDir::new().unwrap();
        let (transport, mut orchestrator) = build(&state_dir, &workdir, RunOptions::default());
        let inventory = Inventory::parse("[agents]\n").unwrap();
        let mut requested = RequestedHostSet::from_option(Some("extra1.example.com"));

        let err = orchestrator
            .install_agents(&inventory, &mut requested)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            marionette::error::Error::MissingPuppetmaster(_)
        ));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn only_hosts_filters_inventory_and_attempts_extras() {
        let state_dir = TempDir::new().unwrap();
        let workdir = TempDir::new().unwrap();
        let options = RunOptions {
            puppetmaster: Some("m1.example.com".into()),
            ..RunOptions::default()
        };
        let (transport, mut orchestrator) = build(&state_dir, &workdir, options);
        let inventory = Inventory::parse(
            "[agents]\n\
             alpha.example.com pm=m1.example.com\n\
             beta.example.com pm=m1.example.com\n",
        )
        .unwrap();
        // Mixed case on purpose: matching is case-insensitive.
        let mut requested =
            RequestedHostSet::from_option(Some("ALPHA.example.com,extra1.example.com"));

        orchestrator
            .install_agents(&inventory, &mut requested)
            .await
            .unwrap();

        assert!(transport.commands_for("beta.example.com").is_empty());
        assert!(orchestrator.install_state().installed("alpha.example.com"));
        // The host absent from inventory is attempted exactly once.
        assert_eq!(transport.commands_for("extra1.example.com").len(), 1);
        assert!(requested.remaining().is_empty());
    }

    #[tokio::test]
    async fn installed_hosts_are_skipped_unless_reinstall() {
        let state_dir = TempDir::new().unwrap();
        let workdir = TempDir::new().unwrap();
        {
            let mut state = InstallState::open(state_dir.path()).unwrap();
            state.mark_installed("alpha.example.com").unwrap();
        }
        let inventory =
            Inventory::parse("[agents]\nalpha.example.com pm=m1\n").unwrap();

        let (transport, mut orchestrator) = build(&state_dir, &workdir, RunOptions::default());
        let mut requested = RequestedHostSet::unrestricted();
        orchestrator
            .install_agents(&inventory, &mut requested)
            .await
            .unwrap();
        assert!(transport.commands_for("alpha.example.com").is_empty());

        let options = RunOptions {
            reinstall: true,
            ..RunOptions::default()
        };
        let (transport, mut orchestrator) = build(&state_dir, &workdir, options);
        let mut requested = RequestedHostSet::unrestricted();
        orchestrator
            .install_agents(&inventory, &mut requested)
            .await
            .unwrap();
        assert!(!transport.commands_for("alpha.example.com").is_empty());
    }

    #[tokio::test]
    async fn skipping_an_installed_host_satisfies_its_request() {
        let state_dir = TempDir::new().unwrap();
        let workdir = TempDir::new().unwrap();
        {
            let mut state = InstallState::open(state_dir.path()).unwrap();
            state.mark_installed("alpha.example.com").unwrap();
        }
        let (transport, mut orchestrator) = build(&state_dir, &workdir, RunOptions::default());
        let inventory =
            Inventory::parse("[agents]\nalpha.example.com pm=m1\n").unwrap();
        let mut requested = RequestedHostSet::from_option(Some("alpha.example.com"));

        orchestrator
            .install_agents(&inventory, &mut requested)
            .await
            .unwrap();

        // Not re-attempted by the fallback pass either.
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn csr_attributes_are_staged_before_the_install() {
        let state_dir = TempDir::new().unwrap();
        let workdir = TempDir::new().unwrap();
        let (transport, mut orchestrator) = build(&state_dir, &workdir, RunOptions::default());
        let inventory = Inventory::parse(
            "[agents]\nalpha.example.com pm=m1 pp_role=frontend\n",
        )
        .unwrap();
        let mut requested = RequestedHostSet::unrestricted();

        orchestrator
            .install_agents(&inventory, &mut requested)
            .await
            .unwrap();

        let calls = transport.calls();
        assert_eq!(
            calls[0],
            Call::Transfer {
                hostname: "alpha.example.com".into(),
                remote: "/tmp/csr_attributes.yaml".into(),
            }
        );
        match &calls[1] {
            Call::Execute { command, .. } => {
                assert!(command.contains("mv /tmp/csr_attributes.yaml"));
            }
            other => panic!("expected csr move command, got {other:?}"),
        }
        match &calls[2] {
            Call::Execute { command, .. } => {
                assert!(command.contains("extension_requests:pp_role=frontend"));
            }
            other => panic!("expected install command, got {other:?}"),
        }
    }
}

mod masters {
    use super::*;

    const MEDIA: &str = "puppet-enterprise-2019.8.12-el-7-x86_64.tar.gz";

    fn stage_media(workdir: &TempDir) {
        std::fs::write(workdir.path().join(MEDIA), b"tarball").unwrap();
    }

    #[tokio::test]
    async fn full_install_uploads_media_then_runs_installer() {
        let state_dir = TempDir::new().unwrap();
        let workdir = TempDir::new().unwrap();
        stage_media(&workdir);
        let (transport, mut orchestrator) = build(&state_dir, &workdir, RunOptions::default());
        let inventory =
            Inventory::parse("[puppetmasters]\nmaster1.example.com\n").unwrap();
        let mut requested = RequestedHostSet::unrestricted();

        orchestrator
            .install_masters(&inventory, &mut requested)
            .await
            .unwrap();

        let calls = transport.calls();
        assert_eq!(
            calls[0],
            Call::Transfer {
                hostname: "master1.example.com".into(),
                remote: format!("/tmp/{MEDIA}"),
            }
        );
        let commands = transport.commands_for("master1.example.com");
        let installer_pos = commands
            .iter()
            .position(|c| c.contains("puppet-enterprise-installer"))
            .expect("installer must run");
        let agent_pos = commands
            .iter()
            .position(|c| c.contains("puppet agent -t"))
            .expect("final agent run must happen");
        assert!(installer_pos < agent_pos);
        assert!(orchestrator.install_state().installed("master1.example.com"));
    }

    #[tokio::test]
    async fn newest_media_archive_wins() {
        let state_dir = TempDir::new().unwrap();
        let workdir = TempDir::new().unwrap();
        std::fs::write(
            workdir.path().join("puppet-enterprise-2018.1.0-el-7-x86_64.tar.gz"),
            b"old",
        )
        .unwrap();
        stage_media(&workdir);
        let (transport, mut orchestrator) = build(&state_dir, &workdir, RunOptions::default());
        let inventory =
            Inventory::parse("[puppetmasters]\nmaster1.example.com\n").unwrap();
        let mut requested = RequestedHostSet::unrestricted();

        orchestrator
            .install_masters(&inventory, &mut requested)
            .await
            .unwrap();

        assert_eq!(
            transport.calls()[0],
            Call::Transfer {
                hostname: "master1.example.com".into(),
                remote: format!("/tmp/{MEDIA}"),
            }
        );
    }

    #[tokio::test]
    async fn missing_media_issues_no_commands() {
        let state_dir = TempDir::new().unwrap();
        let workdir = TempDir::new().unwrap();
        let (transport, mut orchestrator) = build(&state_dir, &workdir, RunOptions::default());
        let inventory =
            Inventory::parse("[puppetmasters]\nmaster1.example.com\n").unwrap();
        let mut requested = RequestedHostSet::unrestricted();

        orchestrator
            .install_masters(&inventory, &mut requested)
            .await
            .unwrap();

        assert!(transport.calls().is_empty());
        assert!(!orchestrator.install_state().installed("master1.example.com"));
    }

    #[tokio::test]
    async fn compile_master_without_controller_issues_no_commands() {
        let state_dir = TempDir::new().unwrap();
        let workdir = TempDir::new().unwrap();
        let (transport, mut orchestrator) = build(&state_dir, &workdir, RunOptions::default());
        let inventory = Inventory::parse(
            "[puppetmasters]\ncm1.example.com compile_master=true\n",
        )
        .unwrap();
        let mut requested = RequestedHostSet::unrestricted();

        orchestrator
            .install_masters(&inventory, &mut requested)
            .await
            .unwrap();

        assert!(transport.calls().is_empty());
        assert!(!orchestrator.install_state().installed("cm1.example.com"));
    }

    #[tokio::test]
    async fn compile_master_signs_and_classifies_on_the_controller() {
        let state_dir = TempDir::new().unwrap();
        let workdir = TempDir::new().unwrap();
        let (transport, mut orchestrator) = build(&state_dir, &workdir, RunOptions::default());
        let inventory = Inventory::parse(
            "[puppetmasters]\ncm1.example.com compile_master=true mom=master1.example.com\n",
        )
        .unwrap();
        let mut requested = RequestedHostSet::unrestricted();

        orchestrator
            .install_masters(&inventory, &mut requested)
            .await
            .unwrap();

        let cm = transport.commands_for("cm1.example.com");
        assert!(cm.iter().any(|c| c.contains("main:server=master1.example.com")));

        let controller = transport.commands_for("master1.example.com");
        assert!(controller
            .iter()
            .any(|c| c.contains("puppetserver ca list --certname cm1.example.com")));
        assert!(controller
            .iter()
            .any(|c| c.contains("puppetserver ca sign --certname cm1.example.com")));
        assert!(transport.calls().contains(&Call::Transfer {
            hostname: "master1.example.com".into(),
            remote: "/tmp/classify_compile_master.sh".into(),
        }));
        // Both the compile master and its controller converge at the end.
        assert!(cm.iter().any(|c| c.contains("puppet agent -t")));
        assert!(controller.iter().any(|c| c.contains("puppet agent -t")));
        assert!(orchestrator.install_state().installed("cm1.example.com"));
    }

    #[tokio::test(start_paused = true)]
    async fn csr_poll_retries_until_the_request_arrives() {
        let state_dir = TempDir::new().unwrap();
        let workdir = TempDir::new().unwrap();
        let (transport, mut orchestrator) = build(&state_dir, &workdir, RunOptions::default());
        // The first two probes find no pending request on the controller.
        transport.fail_commands_containing_times("puppetserver ca list", 2);
        let inventory = Inventory::parse(
            "[puppetmasters]\ncm1.example.com compile_master=true mom=master1.example.com\n",
        )
        .unwrap();
        let mut requested = RequestedHostSet::unrestricted();

        orchestrator
            .install_masters(&inventory, &mut requested)
            .await
            .unwrap();

        let controller = transport.commands_for("master1.example.com");
        let probes = controller
            .iter()
            .filter(|c| c.contains("puppetserver ca list"))
            .count();
        assert_eq!(probes, 3);
        assert!(controller
            .iter()
            .any(|c| c.contains("puppetserver ca sign --certname cm1.example.com")));
        assert!(orchestrator.install_state().installed("cm1.example.com"));
    }

    #[tokio::test(start_paused = true)]
    async fn csr_poll_gives_up_when_the_request_never_arrives() {
        let state_dir = TempDir::new().unwrap();
        let workdir = TempDir::new().unwrap();
        let (transport, mut orchestrator) = build(&state_dir, &workdir, RunOptions::default());
        transport.fail_commands_containing("puppetserver ca list");
        let inventory = Inventory::parse(
            "[puppetmasters]\ncm1.example.com compile_master=true mom=master1.example.com\n",
        )
        .unwrap();
        let mut requested = RequestedHostSet::unrestricted();

        orchestrator
            .install_masters(&inventory, &mut requested)
            .await
            .unwrap();

        let controller = transport.commands_for("master1.example.com");
        let probes = controller
            .iter()
            .filter(|c| c.contains("puppetserver ca list"))
            .count();
        // Backoff doubles from one second and the budget is one minute,
        // so the poll retries several times before giving up.
        assert!(probes > 2, "expected multiple probes, saw {probes}");
        assert!(!controller
            .iter()
            .any(|c| c.contains("puppetserver ca sign")));
        assert!(!orchestrator.install_state().installed("cm1.example.com"));
    }

    #[tokio::test]
    async fn control_repo_configures_code_manager() {
        let state_dir = TempDir::new().unwrap();
        let workdir = TempDir::new().unwrap();
        stage_media(&workdir);
        let options = RunOptions {
            control_repo: Some("git@git.example.com:puppet/control.git".into()),
            ..RunOptions::default()
        };
        let (transport, mut orchestrator) = build(&state_dir, &workdir, options);
        let inventory =
            Inventory::parse("[puppetmasters]\nmaster1.example.com\n").unwrap();
        let mut requested = RequestedHostSet::unrestricted();

        orchestrator
            .install_masters(&inventory, &mut requested)
            .await
            .unwrap();

        let commands = transport.commands_for("master1.example.com");
        assert!(commands
            .iter()
            .any(|c| c.contains("puppet-code deploy --all --wait")));
        assert!(commands
            .iter()
            .any(|c| c.contains("git@git.example.com:puppet/control.git")));
    }

    #[tokio::test]
    async fn missing_r10k_key_issues_no_commands() {
        let state_dir = TempDir::new().unwrap();
        let workdir = TempDir::new().unwrap();
        stage_media(&workdir);
        let (transport, mut orchestrator) = build(&state_dir, &workdir, RunOptions::default());
        let inventory = Inventory::parse(
            "[puppetmasters]\nmaster1.example.com r10k_private_key=keys/control.rsa\n",
        )
        .unwrap();
        let mut requested = RequestedHostSet::unrestricted();

        orchestrator
            .install_masters(&inventory, &mut requested)
            .await
            .unwrap();

        assert!(transport.calls().is_empty());
    }
}

mod uploads {
    use super::*;

    #[tokio::test]
    async fn upload_agents_is_a_noop_without_a_staging_directory() {
        let state_dir = TempDir::new().unwrap();
        let workdir = TempDir::new().unwrap();
        let (transport, mut orchestrator) = build(&state_dir, &workdir, RunOptions::default());
        let inventory =
            Inventory::parse("[puppetmasters]\nmaster1.example.com\n").unwrap();
        let mut requested = RequestedHostSet::unrestricted();

        orchestrator
            .upload_agents(&inventory, &mut requested)
            .await
            .unwrap();

        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn upload_agents_routes_windows_packages_by_arch() {
        let state_dir = TempDir::new().unwrap();
        let workdir = TempDir::new().unwrap();
        let staging = workdir.path().join("agent_installers");
        std::fs::create_dir_all(&staging).unwrap();
        std::fs::write(staging.join("puppet-agent-x64.msi"), b"msi64").unwrap();
        std::fs::write(staging.join("puppet-agent-x86.msi"), b"msi32").unwrap();
        std::fs::write(staging.join("puppet-agent-el-7.rpm"), b"rpm").unwrap();

        let (transport, mut orchestrator) = build(&state_dir, &workdir, RunOptions::default());
        let inventory =
            Inventory::parse("[puppetmasters]\nmaster1.example.com\n").unwrap();
        let mut requested = RequestedHostSet::unrestricted();

        orchestrator
            .upload_agents(&inventory, &mut requested)
            .await
            .unwrap();

        let commands = transport.commands_for("master1.example.com");
        assert!(commands
            .iter()
            .any(|c| c.contains("puppet-agent-x86.msi") && c.contains("windows-i386")));
        assert!(commands
            .iter()
            .any(|c| c.contains("puppet-agent-x64.msi") && c.contains("windows-x86_64")));
        assert!(commands
            .iter()
            .any(|c| c.contains("puppet-agent-el-7.rpm") && c.contains("pe_repo-puppet-agent")));
    }

    #[tokio::test]
    async fn upload_gems_pushes_cache_then_installs() {
        let state_dir = TempDir::new().unwrap();
        let workdir = TempDir::new().unwrap();
        let cache = workdir.path().join("gems/cache");
        std::fs::create_dir_all(&cache).unwrap();
        std::fs::write(cache.join("r10k-3.9.0.gem"), b"gem").unwrap();

        let (transport, mut orchestrator) = build(&state_dir, &workdir, RunOptions::default());
        let inventory =
            Inventory::parse("[puppetmasters]\nmaster1.example.com\n").unwrap();
        let mut requested = RequestedHostSet::unrestricted();

        orchestrator
            .upload_gems(&inventory, &mut requested)
            .await
            .unwrap();

        assert!(transport.calls().contains(&Call::Transfer {
            hostname: "master1.example.com".into(),
            remote: "/tmp/gems/r10k-3.9.0.gem".into(),
        }));
        let commands = transport.commands_for("master1.example.com");
        assert!(commands.iter().any(|c| c.contains("gem install")));
    }
}

mod status {
    use super::*;

    #[tokio::test]
    async fn status_covers_every_section_and_requested_extras() {
        let state_dir = TempDir::new().unwrap();
        let workdir = TempDir::new().unwrap();
        let (transport, mut orchestrator) = build(&state_dir, &workdir, RunOptions::default());
        let inventory = Inventory::parse(
            "[agents]\nalpha.example.com pm=m1\n\
             [puppetmasters]\nmaster1.example.com\n",
        )
        .unwrap();
        let mut requested = RequestedHostSet::from_option(Some(
            "alpha.example.com,master1.example.com,extra9.example.com",
        ));

        orchestrator
            .status(&inventory, &mut requested)
            .await
            .unwrap();

        for host in [
            "alpha.example.com",
            "master1.example.com",
            "extra9.example.com",
        ] {
            let commands = transport.commands_for(host);
            assert_eq!(commands.len(), 1, "one status probe for {host}");
            assert!(commands[0].contains("config print server certname"));
        }
    }
}
