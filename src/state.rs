// ABOUTME: Persisted install state: the set of hosts that completed their procedure.
// ABOUTME: One lower-cased hostname per line, appended only on full success.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Directory holding run state, relative to the working directory.
pub const STATE_DIR: &str = ".marionette";

const STATE_FILE: &str = "installed_hosts";

/// The only entity whose lifetime spans runs: hosts known to have finished
/// installation. Queried before each host action, appended on completion.
#[derive(Debug)]
pub struct InstallState {
    path: PathBuf,
    hosts: HashSet<String>,
}

impl InstallState {
    /// Open (or lazily create) the state file under `state_dir`.
    pub fn open(state_dir: &Path) -> io::Result<Self> {
        let path = state_dir.join(STATE_FILE);
        let hosts = match std::fs::read_to_string(&path) {
            Ok(text) => text
                .lines()
                .map(|l| l.trim().to_lowercase())
                .filter(|l| !l.is_empty())
                .collect(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => HashSet::new(),
            Err(e) => return Err(e),
        };
        Ok(Self { path, hosts })
    }

    pub fn installed(&self, hostname: &str) -> bool {
        self.hosts.contains(&hostname.to_lowercase())
    }

    /// Record a host as fully installed. Idempotent.
    pub fn mark_installed(&mut self, hostname: &str) -> io::Result<()> {
        let hostname = hostname.to_lowercase();
        if self.hosts.contains(&hostname) {
            return Ok(());
        }
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{hostname}")?;
        self.hosts.insert(hostname);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}
