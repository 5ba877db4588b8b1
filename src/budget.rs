//! Disk-space admission control for the download volume.
//!
//! A download is admitted only when the filesystem holding the output
//! directory keeps at least `floor` bytes free after the transfer:
//! `available >= floor + required`.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

/// Source of free-space readings.
pub trait SpaceProbe: Send + Sync {
    /// Returns the bytes available to this process on the filesystem holding `path`.
    ///
    /// # Errors
    ///
    /// Returns the underlying IO error when the filesystem cannot be queried.
    fn available_bytes(&self, path: &Path) -> io::Result<u64>;
}

/// Reads free space from the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsSpaceProbe;

impl SpaceProbe for FsSpaceProbe {
    fn available_bytes(&self, path: &Path) -> io::Result<u64> {
        fs2::available_space(existing_ancestor(path))
    }
}

/// The nearest existing ancestor of `path` (the output tree may not exist yet).
fn existing_ancestor(path: &Path) -> &Path {
    path.ancestors()
        .find(|candidate| candidate.exists())
        .unwrap_or(path)
}

/// Free-space query failure.
#[derive(Debug, Error)]
#[error("failed to read free space for {path}: {source}")]
pub struct BudgetError {
    /// The path that was probed.
    pub path: PathBuf,
    /// The underlying IO error.
    #[source]
    pub source: io::Error,
}

/// Admits or defers downloads based on free space.
pub struct DiskBudgetGuard {
    probe: Box<dyn SpaceProbe>,
    path: PathBuf,
    floor: u64,
}

impl std::fmt::Debug for DiskBudgetGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskBudgetGuard")
            .field("path", &self.path)
            .field("floor", &self.floor)
            .finish_non_exhaustive()
    }
}

impl DiskBudgetGuard {
    /// Creates a guard for the filesystem holding `path` using OS readings.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, floor: u64) -> Self {
        Self::with_probe(path, floor, Box::new(FsSpaceProbe))
    }

    /// Creates a guard with a custom probe.
    #[must_use]
    pub fn with_probe(path: impl Into<PathBuf>, floor: u64, probe: Box<dyn SpaceProbe>) -> Self {
        Self {
            probe,
            path: path.into(),
            floor,
        }
    }

    /// Returns the configured free-space floor.
    #[must_use]
    pub fn floor(&self) -> u64 {
        self.floor
    }

    /// Checks whether `required_bytes` more can be written while keeping the floor.
    ///
    /// # Errors
    ///
    /// Returns [`BudgetError`] when the free-space reading fails.
    pub fn has_budget(&self, required_bytes: u64) -> Result<bool, BudgetError> {
        let available = self
            .probe
            .available_bytes(&self.path)
            .map_err(|source| BudgetError {
                path: self.path.clone(),
                source,
            })?;
        let needed = self.floor.saturating_add(required_bytes);
        let admitted = available >= needed;
        debug!(available, needed, admitted, "disk budget check");
        Ok(admitted)
    }

    /// Like [`has_budget`](Self::has_budget), but a failed reading counts as "no budget".
    #[must_use]
    pub fn admits(&self, required_bytes: u64) -> bool {
        match self.has_budget(required_bytes) {
            Ok(admitted) => admitted,
            Err(e) => {
                warn!(error = %e, "free space unknown, deferring");
                false
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct Fixed(u64);

    impl SpaceProbe for Fixed {
        fn available_bytes(&self, _path: &Path) -> io::Result<u64> {
            Ok(self.0)
        }
    }

    struct Broken;

    impl SpaceProbe for Broken {
        fn available_bytes(&self, _path: &Path) -> io::Result<u64> {
            Err(io::Error::other("statvfs failed"))
        }
    }

    #[test]
    fn test_budget_admits_at_exact_boundary() {
        let guard = DiskBudgetGuard::with_probe("/data", 1000, Box::new(Fixed(1100)));
        assert!(guard.has_budget(100).unwrap());
        assert!(!guard.has_budget(101).unwrap());
    }

    #[test]
    fn test_budget_floor_only_check() {
        let guard = DiskBudgetGuard::with_probe("/data", 1000, Box::new(Fixed(999)));
        assert!(!guard.admits(0));
    }

    #[test]
    fn test_budget_probe_failure_defers() {
        let guard = DiskBudgetGuard::with_probe("/data", 0, Box::new(Broken));
        assert!(guard.has_budget(0).is_err());
        assert!(!guard.admits(0));
    }

    #[test]
    fn test_budget_saturates_on_huge_request() {
        let guard = DiskBudgetGuard::with_probe("/data", 10, Box::new(Fixed(u64::MAX - 1)));
        assert!(!guard.admits(u64::MAX));
    }

    #[test]
    fn test_fs_probe_reads_missing_subdirectory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("not/yet/created");
        let available = FsSpaceProbe.available_bytes(&missing).unwrap();
        assert!(available > 0);
    }
}
