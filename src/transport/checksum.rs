// ABOUTME: Content checksums backing upload idempotency decisions.
// ABOUTME: Local digests via sha2; remote digests via a sha256sum command.

use sha2::{Digest, Sha256};
use std::io;
use std::path::Path;

/// SHA-256 of a local file as lowercase hex, or `None` when it is absent.
/// Absence is a checksum mismatch for idempotency purposes, never an error.
pub fn file_sha256(path: &Path) -> io::Result<Option<String>> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(Some(format!("{:x}", hasher.finalize())))
}

/// Command that prints the remote file's digest and never fails, so an
/// absent file reads as "no digest" rather than a command error.
pub(crate) fn remote_sha256_command(remote_path: &str) -> String {
    format!("sha256sum '{remote_path}' 2>/dev/null || true")
}

/// Pull the digest out of `sha256sum` output: first whitespace-separated
/// token of the first line, when it looks like a SHA-256.
pub(crate) fn parse_sha256_output(output: &str) -> Option<String> {
    let token = output.lines().next()?.split_whitespace().next()?;
    if token.len() == 64 && token.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(token.to_ascii_lowercase())
    } else {
        None
    }
}
