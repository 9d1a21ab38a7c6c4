//! Enforcement of the configured number of retained backup versions.

use std::fs;

use super::{ArtifactOutcome, StoreError, StoreManager, Version, VersionMetadata};

/// When old versions are removed relative to the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionTiming {
    /// Prior to any dump work. Incompatible with unchanged-database reuse.
    Before,
    /// Once the current version has been finalized.
    After,
}

impl StoreManager {
    /// Remove the oldest version directories beyond the keep count.
    ///
    /// Removal is strictly oldest first, ordered by the timestamp encoded in
    /// the directory name. With [RetentionTiming::Before] one slot is left
    /// open because the run about to start will complete the count.
    ///
    /// `current` is the just-finalized version and its metadata; versions
    /// holding the only copy of an artifact the current run reused are kept
    /// (with an error) instead of being removed.
    ///
    /// Returns the removed versions.
    pub fn enforce_retention(
        &self,
        keep: usize,
        timing: RetentionTiming,
        current: Option<(&Version, &VersionMetadata)>,
    ) -> Result<Vec<Version>, StoreError> {
        let keep = match timing {
            RetentionTiming::Before => keep.saturating_sub(1),
            RetentionTiming::After => keep,
        };

        let versions = self.versions()?;
        let excess = versions.len().saturating_sub(keep);
        let mut removed = Vec::new();

        for version in versions.into_iter().take(excess) {
            if let Some((current_version, metadata)) = current {
                if version.path == current_version.path {
                    continue;
                }
                if let Some(missing) = orphaned_reuse(&version, current_version, metadata) {
                    log::error!(
                        target: "store::retention",
                        "Keeping {}: reused artifact '{missing}' is missing from the current version",
                        version.path.display()
                    );
                    continue;
                }
            }

            log::debug!(target: "store::retention", "Removing old backup directory: {}", version.path.display());
            fs::remove_dir_all(&version.path)?;
            removed.push(version);
        }

        Ok(removed)
    }
}

/// Name of a database whose artifact the current run reused but whose copy
/// only exists in `victim`, i.e. deleting `victim` would lose the backup.
///
/// With hard-link reuse the current artifact shares the inode and survives
/// deletion of the old path; the dangerous case is a reuse recorded in the
/// metadata whose link was never materialized.
fn orphaned_reuse(
    victim: &Version,
    current: &Version,
    metadata: &VersionMetadata,
) -> Option<String> {
    metadata
        .databases
        .iter()
        .filter(|(_, record)| record.outcome == ArtifactOutcome::Reused)
        .find(|(name, _)| victim.artifact(name).exists() && !current.artifact(name).exists())
        .map(|(name, _)| name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DatabaseRecord, RunVerdict};
    use chrono::Local;
    use std::collections::BTreeMap;
    use std::fs::File;
    use std::io::Write;
    use std::path::Path;

    fn make_version(root: &Path, name: &str) -> Version {
        let path = root.join(name);
        fs::create_dir(&path).unwrap();
        Version::parse(path).unwrap()
    }

    fn metadata_with(reused: &[&str]) -> VersionMetadata {
        let mut databases = BTreeMap::new();
        for name in reused {
            databases.insert(
                name.to_string(),
                DatabaseRecord {
                    fingerprint: Some(1),
                    raw_bytes: 100,
                    compressed_bytes: 50,
                    outcome: ArtifactOutcome::Reused,
                },
            );
        }
        VersionMetadata {
            created: Local::now(),
            finished: Local::now(),
            verdict: RunVerdict::Success,
            raw_bytes: 0,
            compressed_bytes: 0,
            databases,
        }
    }

    #[test]
    fn oldest_versions_are_removed_first() {
        let root = tempfile::tempdir().unwrap();
        let store = StoreManager::new(root.path());
        for name in [
            "oma_2024-01-01T00-00-00",
            "oma_2024-01-02T00-00-00",
            "oma_2024-01-03T00-00-00",
            "oma_2024-01-04T00-00-00",
        ] {
            make_version(root.path(), name);
        }

        let removed = store
            .enforce_retention(2, RetentionTiming::After, None)
            .unwrap();

        assert_eq!(removed.len(), 2);
        assert!(removed[0].path.ends_with("oma_2024-01-01T00-00-00"));
        assert!(removed[1].path.ends_with("oma_2024-01-02T00-00-00"));

        let left = store.versions().unwrap();
        assert_eq!(left.len(), 2);
        assert!(left[0].path.ends_with("oma_2024-01-03T00-00-00"));
    }

    #[test]
    fn before_timing_leaves_a_slot_for_the_new_version() {
        let root = tempfile::tempdir().unwrap();
        let store = StoreManager::new(root.path());
        for name in [
            "oma_2024-01-01T00-00-00",
            "oma_2024-01-02T00-00-00",
            "oma_2024-01-03T00-00-00",
        ] {
            make_version(root.path(), name);
        }

        store
            .enforce_retention(3, RetentionTiming::Before, None)
            .unwrap();

        // keep 3 with one slot reserved: two old versions stay
        assert_eq!(store.versions().unwrap().len(), 2);
    }

    #[test]
    fn nothing_is_removed_below_the_keep_count() {
        let root = tempfile::tempdir().unwrap();
        let store = StoreManager::new(root.path());
        make_version(root.path(), "oma_2024-01-01T00-00-00");

        let removed = store
            .enforce_retention(3, RetentionTiming::After, None)
            .unwrap();
        assert!(removed.is_empty());
        assert_eq!(store.versions().unwrap().len(), 1);
    }

    #[test]
    fn version_with_orphaned_reused_artifact_is_kept() {
        let root = tempfile::tempdir().unwrap();
        let store = StoreManager::new(root.path());

        let old = make_version(root.path(), "oma_2024-01-01T00-00-00");
        File::create(old.artifact("demo1"))
            .unwrap()
            .write_all(b"gz")
            .unwrap();
        let current = make_version(root.path(), "oma_2024-01-02T00-00-00");
        // metadata claims "demo1" was reused, but the link is missing
        let metadata = metadata_with(&["demo1"]);

        let removed = store
            .enforce_retention(1, RetentionTiming::After, Some((&current, &metadata)))
            .unwrap();

        assert!(removed.is_empty());
        assert!(old.artifact("demo1").exists());
    }

    #[test]
    fn version_is_removed_once_the_reused_artifact_is_linked() {
        let root = tempfile::tempdir().unwrap();
        let store = StoreManager::new(root.path());

        let old = make_version(root.path(), "oma_2024-01-01T00-00-00");
        File::create(old.artifact("demo1"))
            .unwrap()
            .write_all(b"gz")
            .unwrap();
        let current = make_version(root.path(), "oma_2024-01-02T00-00-00");
        fs::hard_link(old.artifact("demo1"), current.artifact("demo1")).unwrap();
        let metadata = metadata_with(&["demo1"]);

        let removed = store
            .enforce_retention(1, RetentionTiming::After, Some((&current, &metadata)))
            .unwrap();

        assert_eq!(removed.len(), 1);
        // the reused artifact survives deletion of the old version
        assert!(current.artifact("demo1").exists());
        assert_eq!(fs::read(current.artifact("demo1")).unwrap(), b"gz");
    }

    #[test]
    fn current_version_is_never_removed() {
        let root = tempfile::tempdir().unwrap();
        let store = StoreManager::new(root.path());
        let current = make_version(root.path(), "oma_2024-01-01T00-00-00");
        let metadata = metadata_with(&[]);

        store
            .enforce_retention(0, RetentionTiming::After, Some((&current, &metadata)))
            .unwrap();
        assert!(current.path.is_dir());
    }
}
