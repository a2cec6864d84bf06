// ABOUTME: Append-only transcript of every command and file copy performed.
// ABOUTME: Replayable as a shell script; comments carry timestamps.

use std::fs::OpenOptions;
use std::io::Write;

pub const ACTION_LOG_FILE: &str = "marionette-actions.log";

/// Record a command exactly as it was handed to the transport.
pub fn record(command: &str) {
    append(&format!("{command}\n"));
}

/// Record a human-readable marker as a shell comment with a timestamp.
pub fn note(message: &str) {
    let stamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    append(&format!("# [{stamp}] {message}\n"));
}

fn append(line: &str) {
    let result = OpenOptions::new()
        .create(true)
        .append(true)
        .open(ACTION_LOG_FILE)
        .and_then(|mut f| f.write_all(line.as_bytes()));

    // The action log is an audit convenience; never fail a run over it.
    if let Err(e) = result {
        tracing::warn!("could not append to {}: {}", ACTION_LOG_FILE, e);
    }
}
