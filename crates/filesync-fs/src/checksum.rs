//! Content fingerprints
//!
//! Files are fingerprinted as `sha256:<hex>` over their bytes with every
//! carriage return removed, so CRLF and LF checkouts of the same content
//! compare equal. Directories carry a fixed sentinel instead of a digest.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;

/// Prefix for all file fingerprints produced by this module
const PREFIX: &str = "sha256:";

/// Fingerprint shared by every directory entry.
pub const DIRECTORY_FINGERPRINT: &str = "directory";

/// Normalized path to fingerprint.
///
/// Directory keys end in `/`, file keys never do.
pub type HashSnapshot = BTreeMap<String, String>;

/// Compute the fingerprint of raw file content.
pub fn compute_content_checksum(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    for chunk in content.split(|b| *b == b'\r') {
        hasher.update(chunk);
    }
    format!("{}{:x}", PREFIX, hasher.finalize())
}

/// Compute the fingerprint of a file's contents.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn compute_file_checksum(path: &Path) -> std::io::Result<String> {
    let content = std::fs::read(path)?;
    Ok(compute_content_checksum(&content))
}

/// Whether a snapshot key names a directory.
pub fn is_directory_key(path: &str) -> bool {
    path.ends_with('/')
}
