// ABOUTME: Shared test support: tracing init and a scripted in-memory transport.
// ABOUTME: The mock records every call so tests can assert command order.

use async_trait::async_trait;
use std::path::Path;
use std::sync::{Mutex, Once};

use marionette::transport::{ConnectionTarget, Error, Result, Transport, TransportResult};

static INIT: Once = Once::new();

#[allow(dead_code)]
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_test_writer()
            .try_init();
    });
}

/// One recorded transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Execute { hostname: String, command: String },
    Transfer { hostname: String, remote: String },
}

impl Call {
    #[allow(dead_code)]
    pub fn hostname(&self) -> &str {
        match self {
            Call::Execute { hostname, .. } | Call::Transfer { hostname, .. } => hostname,
        }
    }
}

/// Transport double: records calls, succeeds unless a scripted substring
/// matches the command.
#[derive(Default)]
pub struct MockTransport {
    calls: Mutex<Vec<Call>>,
    fail_containing: Mutex<Vec<String>>,
    fail_limited: Mutex<Vec<(String, usize)>>,
}

#[allow(dead_code)]
impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail any executed command containing this substring.
    pub fn fail_commands_containing(&self, needle: &str) {
        self.fail_containing.lock().unwrap().push(needle.to_string());
    }

    /// Fail the first `times` commands containing this substring, then
    /// let later matches succeed.
    pub fn fail_commands_containing_times(&self, needle: &str, times: usize) {
        self.fail_limited
            .lock()
            .unwrap()
            .push((needle.to_string(), times));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn commands_for(&self, hostname: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Execute {
                    hostname: h,
                    command,
                } if h == hostname => Some(command),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(&self, target: &ConnectionTarget, command: &str) -> Result<TransportResult> {
        self.calls.lock().unwrap().push(Call::Execute {
            hostname: target.hostname.clone(),
            command: command.to_string(),
        });
        for needle in self.fail_containing.lock().unwrap().iter() {
            if command.contains(needle.as_str()) {
                return Err(Error::CommandFailed {
                    host: target.hostname.clone(),
                    status: 1,
                });
            }
        }
        for (needle, remaining) in self.fail_limited.lock().unwrap().iter_mut() {
            if *remaining > 0 && command.contains(needle.as_str()) {
                *remaining -= 1;
                return Err(Error::CommandFailed {
                    host: target.hostname.clone(),
                    status: 1,
                });
            }
        }
        Ok(TransportResult {
            exit_status: 0,
            lines: Vec::new(),
            skipped: false,
        })
    }

    async fn transfer_file(
        &self,
        target: &ConnectionTarget,
        _local: &Path,
        remote: &str,
        _label: &str,
    ) -> Result<TransportResult> {
        self.calls.lock().unwrap().push(Call::Transfer {
            hostname: target.hostname.clone(),
            remote: remote.to_string(),
        });
        Ok(TransportResult {
            exit_status: 0,
            lines: Vec::new(),
            skipped: false,
        })
    }
}
