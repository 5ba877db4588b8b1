//! Mapping from remote paths to local final and staging files.
//!
//! A record's final path is reserved in the ledger before anything is
//! written, so two records never share one. The staging file sits next to
//! it and is tagged with a digest of the record's signature: bytes fetched
//! for one version of a file are never resumed against another.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use super::error::DownloadError;
use crate::crawl::normalize_path;

/// Infix marking an in-progress staging file: `<stem>.downloading-<tag><.ext>`.
pub const STAGING_INFIX: &str = "downloading";

/// Hex characters of the signature digest kept in staging names.
const SIGNATURE_TAG_LEN: usize = 8;

/// Highest numeric suffix tried for a colliding file name.
pub const MAX_NAME_SUFFIX: usize = 1000;

/// Where one record lands on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTarget {
    /// Finished file.
    pub final_path: PathBuf,
    /// In-progress file in the same directory, renamed to `final_path` when complete.
    pub staging_path: PathBuf,
}

impl LocalTarget {
    /// Pairs `final_path` with the staging file for `signature`.
    #[must_use]
    pub fn new(final_path: PathBuf, signature: &str) -> Self {
        let file_name = final_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let staging_path = final_path.with_file_name(staging_name(&file_name, signature));
        Self {
            final_path,
            staging_path,
        }
    }
}

/// Rules for laying remote files out under the output directory.
#[derive(Debug, Clone)]
pub struct TargetLayout {
    output_dir: PathBuf,
    remote_root: String,
    preserve_structure: bool,
}

impl TargetLayout {
    /// Creates a layout rooted at `output_dir`.
    ///
    /// `remote_root` is stripped from remote paths before mapping. With
    /// `preserve_structure` off, every file lands directly in `output_dir`.
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>, remote_root: &str, preserve_structure: bool) -> Self {
        Self {
            output_dir: output_dir.into(),
            remote_root: normalize_path(remote_root),
            preserve_structure,
        }
    }

    /// Returns the output directory.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Maps a remote path to the local file it lands in when nothing else
    /// holds that name.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidTarget`] when no usable file name remains
    /// after sanitizing.
    pub fn resolve(&self, remote_path: &str) -> Result<PathBuf, DownloadError> {
        let normalized = normalize_path(remote_path);
        let relative = self.strip_root(&normalized);

        let segments: Vec<String> = relative
            .split('/')
            .filter(|s| !s.is_empty() && *s != "." && *s != "..")
            .map(sanitize_segment)
            .filter(|s| !s.is_empty())
            .collect();

        let Some((file_name, parents)) = segments.split_last() else {
            return Err(DownloadError::invalid_target(
                remote_path,
                "no file name after sanitizing",
            ));
        };

        let mut directory = self.output_dir.clone();
        if self.preserve_structure {
            directory.extend(parents);
        }

        Ok(directory.join(file_name))
    }

    fn strip_root<'a>(&self, normalized: &'a str) -> &'a str {
        if self.remote_root == "/" {
            return normalized;
        }
        match normalized.strip_prefix(self.remote_root.as_str()) {
            Some(rest) if rest.starts_with('/') => rest,
            _ => normalized,
        }
    }
}

/// Returns the `n`th candidate for `preferred`: the path itself for `0`,
/// then `<stem>_<n><.ext>` in the same directory.
#[must_use]
pub fn numbered_path(preferred: &Path, n: usize) -> PathBuf {
    if n == 0 {
        return preferred.to_path_buf();
    }
    let file_name = preferred
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let numbered = match file_name.rfind('.') {
        Some(pos) if pos > 0 => format!("{}_{n}{}", &file_name[..pos], &file_name[pos..]),
        _ => format!("{file_name}_{n}"),
    };
    preferred.with_file_name(numbered)
}

/// Builds the staging file name for `file_name` downloaded at `signature`.
///
/// `f1.txt` → `f1.downloading-<tag>.txt`; `README` → `README.downloading-<tag>`.
#[must_use]
pub fn staging_name(file_name: &str, signature: &str) -> String {
    let tag = signature_tag(signature);
    let path = Path::new(file_name);
    match (
        path.file_stem().and_then(|s| s.to_str()),
        path.extension().and_then(|s| s.to_str()),
    ) {
        (Some(stem), Some(ext)) => format!("{stem}.{STAGING_INFIX}-{tag}.{ext}"),
        _ => format!("{file_name}.{STAGING_INFIX}-{tag}"),
    }
}

/// Short hex digest of a remote signature.
fn signature_tag(signature: &str) -> String {
    let digest = Sha256::digest(signature.as_bytes());
    let mut hex: String = digest.iter().map(|byte| format!("{byte:02x}")).collect();
    hex.truncate(SIGNATURE_TAG_LEN);
    hex
}

/// Replaces characters that are invalid on common filesystems:
/// / \ : * ? " < > | and control characters.
#[must_use]
pub fn sanitize_segment(segment: &str) -> String {
    let sanitized: String = segment
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    sanitized.trim().to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_staging_name_keeps_extension() {
        let tag = signature_tag("s1");
        assert_eq!(tag.len(), 8);
        assert_eq!(staging_name("f1.txt", "s1"), format!("f1.downloading-{tag}.txt"));
        assert_eq!(
            staging_name("a.tar.gz", "s1"),
            format!("a.tar.downloading-{tag}.gz")
        );
        assert_eq!(staging_name("README", "s1"), format!("README.downloading-{tag}"));
    }

    #[test]
    fn test_staging_name_changes_with_signature() {
        assert_ne!(staging_name("f.bin", "v1"), staging_name("f.bin", "v2"));
        assert_eq!(staging_name("f.bin", "v1"), staging_name("f.bin", "v1"));
    }

    #[test]
    fn test_staging_name_never_matches_a_plain_downloading_name() {
        assert_ne!(staging_name("x.txt", "s"), "x.downloading.txt");
    }

    #[test]
    fn test_numbered_path() {
        let preferred = Path::new("/out/x.txt");
        assert_eq!(numbered_path(preferred, 0), PathBuf::from("/out/x.txt"));
        assert_eq!(numbered_path(preferred, 1), PathBuf::from("/out/x_1.txt"));
        assert_eq!(
            numbered_path(Path::new("/out/README"), 2),
            PathBuf::from("/out/README_2")
        );
        assert_eq!(
            numbered_path(Path::new("/out/.env"), 1),
            PathBuf::from("/out/.env_1")
        );
    }

    #[test]
    fn test_local_target_pairs_staging_in_same_directory() {
        let target = LocalTarget::new(PathBuf::from("/out/a/f2.txt"), "s2");
        assert_eq!(
            target.staging_path,
            PathBuf::from("/out/a").join(staging_name("f2.txt", "s2"))
        );
    }

    #[test]
    fn test_sanitize_segment_replaces_invalid_chars() {
        assert_eq!(sanitize_segment("a:b*c?.txt"), "a_b_c_.txt");
        assert_eq!(sanitize_segment("  spaced  "), "spaced");
        assert_eq!(sanitize_segment("日本語.pdf"), "日本語.pdf");
    }

    #[test]
    fn test_resolve_preserves_structure_under_root() {
        let layout = TargetLayout::new("/out", "/share", true);
        let target = layout.resolve("/share/a/b/f2.txt").unwrap();
        assert_eq!(target, PathBuf::from("/out/a/b/f2.txt"));
    }

    #[test]
    fn test_resolve_root_slash_keeps_full_path() {
        let layout = TargetLayout::new("/out", "/", true);
        let target = layout.resolve("/a/f1.txt").unwrap();
        assert_eq!(target, PathBuf::from("/out/a/f1.txt"));
    }

    #[test]
    fn test_resolve_does_not_strip_partial_segment_prefix() {
        let layout = TargetLayout::new("/out", "/share", true);
        let target = layout.resolve("/shared/x.txt").unwrap();
        assert_eq!(target, PathBuf::from("/out/shared/x.txt"));
    }

    #[test]
    fn test_resolve_flattened() {
        let layout = TargetLayout::new("/out", "/", false);
        let target = layout.resolve("/a/b/f2.txt").unwrap();
        assert_eq!(target, PathBuf::from("/out/f2.txt"));
    }

    #[test]
    fn test_resolve_drops_traversal_segments() {
        let layout = TargetLayout::new("/out", "/", true);
        let target = layout.resolve("/a/../../etc/passwd").unwrap();
        assert_eq!(target, PathBuf::from("/out/a/etc/passwd"));
    }

    #[test]
    fn test_resolve_rejects_empty_name() {
        let layout = TargetLayout::new("/out", "/", true);
        assert!(matches!(
            layout.resolve("/./.."),
            Err(DownloadError::InvalidTarget { .. })
        ));
    }
}
