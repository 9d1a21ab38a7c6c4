//! Management of the backup root: version directories, metadata records,
//! retention and the `last` convenience link.

pub mod metadata;
pub mod retention;

pub use metadata::{
    ArtifactOutcome, DatabaseRecord, RunVerdict, VersionMetadata, METADATA_FILE,
};
pub use retention::RetentionTiming;

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDateTime};
use derive_more::{Display, Error, From};

/// Prefix of every version directory under the backup root.
pub const VERSION_PREFIX: &str = "oma_";
/// Timestamp format embedded in version directory names.
pub const VERSION_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S";
const LAST_LINK: &str = "last";

#[derive(Debug, Display, Error, From)]
pub enum StoreError {
    #[display("Backup store error: {_0}")]
    #[from]
    Io(std::io::Error),
}

/// One backup version directory, ordered by the timestamp in its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub path: PathBuf,
    pub created: NaiveDateTime,
}

impl Version {
    /// Parse a version out of a directory path. `None` when the name does
    /// not carry the prefix or a valid timestamp.
    fn parse(path: PathBuf) -> Option<Version> {
        let name = path.file_name()?.to_str()?;
        let timestamp = name.strip_prefix(VERSION_PREFIX)?;
        let created = NaiveDateTime::parse_from_str(timestamp, VERSION_TIMESTAMP_FORMAT).ok()?;
        Some(Version { path, created })
    }

    /// Path of a database's dump artifact inside this version.
    pub fn artifact(&self, database: &str) -> PathBuf {
        self.path.join(format!("{database}.sql.gz"))
    }

    /// The metadata record, if present and readable.
    pub fn metadata(&self) -> Option<VersionMetadata> {
        VersionMetadata::load(&self.path).ok()
    }
}

/// Handles all backup directories below the configured backup root.
#[derive(Debug, Clone)]
pub struct StoreManager {
    backup_root: PathBuf,
}

impl StoreManager {
    pub fn new(backup_root: impl Into<PathBuf>) -> StoreManager {
        StoreManager {
            backup_root: backup_root.into(),
        }
    }

    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    /// All version directories, oldest first.
    ///
    /// Ordering is strictly by the timestamp parsed from the directory name.
    /// Directories carrying the prefix but no parseable timestamp are
    /// skipped with a warning, never ordered lexically.
    pub fn versions(&self) -> Result<Vec<Version>, StoreError> {
        let mut versions = Vec::new();

        for entry in fs::read_dir(&self.backup_root)? {
            let path = entry?.path();
            // `last` is a symlink to the newest version, not a version itself
            if !path.is_dir() || path.is_symlink() {
                continue;
            }

            let looks_like_version = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(VERSION_PREFIX));
            match Version::parse(path.clone()) {
                Some(version) => versions.push(version),
                None if looks_like_version => {
                    log::warn!(target: "store", "Ignoring version directory with unparsable timestamp: {}", path.display());
                }
                None => {}
            }
        }

        versions.sort_by_key(|version| version.created);
        Ok(versions)
    }

    /// The most recent version whose recorded run succeeded, with its
    /// metadata. This is the reuse source for unchanged databases.
    pub fn previous_successful(
        &self,
    ) -> Result<Option<(Version, VersionMetadata)>, StoreError> {
        Ok(self.versions()?.into_iter().rev().find_map(|version| {
            version
                .metadata()
                .filter(|metadata| metadata.verdict == RunVerdict::Success)
                .map(|metadata| (version, metadata))
        }))
    }

    /// Compression ratio observed by the most recent successful run.
    ///
    /// 1.0 when no history exists: assume no compression benefit.
    pub fn previous_ratio(&self) -> f64 {
        let Ok(versions) = self.versions() else {
            return 1.0;
        };

        versions
            .iter()
            .rev()
            .filter_map(Version::metadata)
            .filter(|metadata| metadata.verdict == RunVerdict::Success)
            .find_map(|metadata| metadata.compression_ratio())
            .unwrap_or(1.0)
    }

    /// Create the directory for a new backup version.
    pub fn create_version(&self, created: DateTime<Local>) -> Result<Version, StoreError> {
        let name = format!("{VERSION_PREFIX}{}", created.format(VERSION_TIMESTAMP_FORMAT));
        let path = self.backup_root.join(name);
        fs::create_dir(&path)?;
        log::debug!(target: "store", "Created backup directory: {}", path.display());

        Ok(Version {
            path,
            created: created.naive_local(),
        })
    }

    /// Write the metadata record and point the `last` link at the version.
    pub fn finalize_version(
        &self,
        version: &Version,
        metadata: &VersionMetadata,
    ) -> Result<(), StoreError> {
        metadata.store(&version.path)?;
        self.link_last(version)?;
        Ok(())
    }

    fn link_last(&self, version: &Version) -> Result<(), StoreError> {
        let link = self.backup_root.join(LAST_LINK);
        if link.symlink_metadata().is_ok() {
            fs::remove_file(&link)?;
        }
        std::os::unix::fs::symlink(&version.path, &link)?;
        Ok(())
    }
}
