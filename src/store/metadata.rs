//! The per-version metadata record, `backup_info.json`.
//!
//! The record is what the next run's change detection and space estimation
//! read: per-database fingerprints, observed sizes and the run verdict.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Local};

/// File name of the metadata record inside a version directory.
pub const METADATA_FILE: &str = "backup_info.json";

/// Overall verdict of one backup run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunVerdict {
    Success,
    Skipped,
    Failure,
}

/// Terminal classification of one database within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactOutcome {
    /// A fresh dump was taken.
    Fresh,
    /// The previous version's artifact was reused unchanged.
    Reused,
    /// The dump failed; no artifact exists for this database.
    Failed,
}

/// What one run recorded about one database.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DatabaseRecord {
    /// Change fingerprint at dump time (latest schema-file mtime).
    pub fingerprint: Option<i64>,
    pub raw_bytes: u64,
    pub compressed_bytes: u64,
    pub outcome: ArtifactOutcome,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct VersionMetadata {
    pub created: DateTime<Local>,
    pub finished: DateTime<Local>,
    pub verdict: RunVerdict,
    pub raw_bytes: u64,
    pub compressed_bytes: u64,
    pub databases: BTreeMap<String, DatabaseRecord>,
}

impl VersionMetadata {
    /// Raw bytes over compressed bytes of this run's fresh dumps.
    ///
    /// `None` when the run produced no fresh dump to measure.
    pub fn compression_ratio(&self) -> Option<f64> {
        let (raw, compressed) = self
            .databases
            .values()
            .filter(|record| record.outcome == ArtifactOutcome::Fresh)
            .fold((0u64, 0u64), |(raw, compressed), record| {
                (raw + record.raw_bytes, compressed + record.compressed_bytes)
            });

        (compressed > 0).then(|| raw as f64 / compressed as f64)
    }

    pub fn load(version_dir: &Path) -> io::Result<VersionMetadata> {
        let file = File::open(version_dir.join(METADATA_FILE))?;
        serde_json::from_reader(BufReader::new(file)).map_err(io::Error::other)
    }

    pub fn store(&self, version_dir: &Path) -> io::Result<()> {
        let file = File::create(version_dir.join(METADATA_FILE))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self).map_err(io::Error::other)?;
        writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(outcome: ArtifactOutcome, raw: u64, compressed: u64) -> DatabaseRecord {
        DatabaseRecord {
            fingerprint: Some(1_700_000_000),
            raw_bytes: raw,
            compressed_bytes: compressed,
            outcome,
        }
    }

    fn metadata(databases: BTreeMap<String, DatabaseRecord>) -> VersionMetadata {
        VersionMetadata {
            created: Local::now(),
            finished: Local::now(),
            verdict: RunVerdict::Success,
            raw_bytes: databases.values().map(|r| r.raw_bytes).sum(),
            compressed_bytes: databases.values().map(|r| r.compressed_bytes).sum(),
            databases,
        }
    }

    #[test]
    fn ratio_uses_only_fresh_dumps() {
        let mut databases = BTreeMap::new();
        databases.insert("a".into(), record(ArtifactOutcome::Fresh, 1000, 250));
        databases.insert("b".into(), record(ArtifactOutcome::Reused, 9000, 10));
        databases.insert("c".into(), record(ArtifactOutcome::Fresh, 1000, 250));

        let ratio = metadata(databases).compression_ratio().unwrap();
        assert!((ratio - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn ratio_is_none_without_fresh_dumps() {
        let mut databases = BTreeMap::new();
        databases.insert("a".into(), record(ArtifactOutcome::Reused, 1000, 250));
        assert_eq!(metadata(databases).compression_ratio(), None);
    }

    #[test]
    fn record_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let mut databases = BTreeMap::new();
        databases.insert("demo1".into(), record(ArtifactOutcome::Fresh, 4096, 1024));
        databases.insert("d-e-m-o-2".into(), record(ArtifactOutcome::Failed, 0, 0));
        let original = metadata(databases);

        original.store(dir.path()).unwrap();
        let loaded = VersionMetadata::load(dir.path()).unwrap();

        assert_eq!(loaded.verdict, RunVerdict::Success);
        assert_eq!(loaded.databases.len(), 2);
        assert_eq!(
            loaded.databases["demo1"].fingerprint,
            Some(1_700_000_000)
        );
        assert_eq!(loaded.databases["d-e-m-o-2"].outcome, ArtifactOutcome::Failed);
    }

    #[test]
    fn load_fails_without_record() {
        let dir = tempfile::tempdir().unwrap();
        assert!(VersionMetadata::load(dir.path()).is_err());
    }
}
