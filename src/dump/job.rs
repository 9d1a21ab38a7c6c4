//! Per-database dump jobs and their success classification.

use std::path::PathBuf;
use std::sync::OnceLock;

use chrono::{DateTime, Local};
use derive_more::{Display, Error};
use regex::Regex;

use crate::store::ArtifactOutcome;

/// Result of one database's backup within a run.
#[derive(Debug, Clone)]
pub struct DumpJob {
    pub database: String,
    pub target: PathBuf,
    /// Fingerprint of the database at dump time, recorded for the next
    /// run's change detection.
    pub fingerprint: Option<i64>,
    pub started: DateTime<Local>,
    pub finished: DateTime<Local>,
    pub raw_bytes: u64,
    pub compressed_bytes: u64,
    pub outcome: ArtifactOutcome,
    /// Failure reason, set iff `outcome` is [ArtifactOutcome::Failed].
    pub error: Option<String>,
}

/// Why a finished dump is not usable as a backup.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum DumpFailure {
    #[display("mysqldump failed with return code {_0}: {_1}")]
    ExitCode(#[error(ignore)] i32, #[error(ignore)] String),
    #[display("mysqldump produced an empty dump file")]
    EmptyOutput,
    #[display("Completion message not found. Last line: {_0}")]
    MissingCompletionMarker(#[error(ignore)] String),
    #[display("I/O error during dump: {_0}")]
    Io(#[error(ignore)] String),
    #[display("cancelled by termination signal")]
    Cancelled,
}

/// Decide whether a finished dump subprocess produced a usable backup.
///
/// A zero exit code alone is not sufficient: the dump stream can be
/// truncated by a broken pipe while the tool still exits zero. The output
/// must also be non-empty and end with the dump tool's completion marker.
pub fn classify(
    exit_code: i32,
    stderr: &str,
    raw_bytes: u64,
    compressed_bytes: u64,
    last_line: &str,
) -> Result<(), DumpFailure> {
    if exit_code != 0 {
        return Err(DumpFailure::ExitCode(exit_code, stderr.trim().to_string()));
    }
    if raw_bytes == 0 || compressed_bytes == 0 {
        return Err(DumpFailure::EmptyOutput);
    }
    if !completion_marker().is_match(last_line) {
        return Err(DumpFailure::MissingCompletionMarker(last_line.to_string()));
    }
    Ok(())
}

/// The timestamp line mysqldump appends to a complete dump.
fn completion_marker() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| {
        Regex::new(r"^-- Dump completed on \d{4}-\d{2}-\d{2}\s+\d+:\d{2}:\d{2}").unwrap()
    })
}
