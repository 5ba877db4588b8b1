//! Remote path normalization.
//!
//! Every path stored in the ledger goes through [`normalize_path`], so the
//! same remote file always maps to the same `files.path` key regardless of
//! how the server spelled it.

use crate::remote::RemoteEntry;

/// Normalizes a remote path.
///
/// Backslashes become `/`, repeated slashes collapse, the result always
/// starts with `/` and never ends with one (except the root itself).
#[must_use]
pub fn normalize_path(raw: &str) -> String {
    let replaced = raw.replace('\\', "/");
    let segments: Vec<&str> = replaced.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

/// Joins a directory and a child name, then normalizes.
#[must_use]
pub fn join_path(directory: &str, name: &str) -> String {
    normalize_path(&format!("{directory}/{name}"))
}

/// Splits a normalized path into parent directory and final segment.
///
/// `"/a/f1.txt"` → `("/a", "f1.txt")`; `"/f1.txt"` → `("/", "f1.txt")`.
#[must_use]
pub fn split_parent(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("/", path),
    }
}

/// Resolves the full normalized path and display name of a listing entry.
///
/// Entries without a `path` are placed under `directory`.
///
/// # Errors
///
/// Returns a reason string when the entry has no usable name.
pub fn resolve_entry(directory: &str, entry: &RemoteEntry) -> Result<(String, String), String> {
    if entry.name.trim().is_empty() {
        return Err("entry has an empty name".to_string());
    }

    let path = match entry.path.as_deref().filter(|p| !p.trim().is_empty()) {
        Some(raw) => normalize_path(raw),
        None => join_path(directory, &entry.name),
    };

    let (_, name) = split_parent(&path);
    if name.is_empty() {
        return Err(format!("entry '{}' resolves to the root", entry.name));
    }
    let name = name.to_string();
    Ok((path, name))
}
