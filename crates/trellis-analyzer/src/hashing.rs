//! Content hashing for change detection
//!
//! Hashes are taken over normalized bytes so that line-ending and trailing
//! whitespace churn (editor settings, git autocrlf) never invalidates a file.

use std::fs::Metadata;
use std::path::Path;
use std::time::UNIX_EPOCH;
use trellis_core::ContentHash;

/// Unify line endings, strip trailing ASCII whitespace from each line, trim the whole.
///
/// Works on raw bytes so that edits to non-UTF-8 content still change the hash.
pub fn normalize_content(content: &[u8]) -> Vec<u8> {
    let mut lines: Vec<&[u8]> = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < content.len() {
        match content[i] {
            b'\n' => {
                lines.push(&content[start..i]);
                i += 1;
                start = i;
            }
            b'\r' => {
                lines.push(&content[start..i]);
                i += if content.get(i + 1) == Some(&b'\n') { 2 } else { 1 };
                start = i;
            }
            _ => i += 1,
        }
    }
    lines.push(&content[start..]);

    let mut out = Vec::with_capacity(content.len());
    for (k, line) in lines.iter().enumerate() {
        if k > 0 {
            out.push(b'\n');
        }
        out.extend_from_slice(line.trim_ascii_end());
    }
    out.trim_ascii().to_vec()
}

/// blake3 digest of the normalized content.
pub fn hash_content(content: impl AsRef<[u8]>) -> ContentHash {
    let normalized = normalize_content(content.as_ref());
    ContentHash::from_hex(blake3::hash(&normalized).to_hex().to_string())
}

/// Identity cached for a file that could not be read. Derived from the path
/// alone so repeated failures agree with each other but never with real content.
pub fn fallback_identity(path: &Path) -> ContentHash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"unreadable:");
    hasher.update(path.to_string_lossy().as_bytes());
    ContentHash::from_hex(hasher.finalize().to_hex().to_string())
}

/// Modification time in milliseconds since the epoch; 0 when unavailable.
pub fn modified_millis(metadata: &Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
