//! Worst-case disk space estimation for a backup run.

use crate::mysql::Database;

/// Verdict of the space check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceVerdict {
    Proceed,
    Abort,
}

/// Space required for the run versus space available at the destination.
#[derive(Debug, Clone, Copy)]
pub struct SpaceBudget {
    pub required_bytes: u64,
    pub available_bytes: u64,
    pub verdict: SpaceVerdict,
}

/// Estimate the worst-case space needed to dump `databases`.
///
/// Every database counts as a full fresh dump, including the ones eligible
/// for unchanged-reuse: reuse is a best-effort optimization, not a
/// guarantee. `previous_ratio` is raw over compressed size observed by the
/// most recent successful run; 1.0 when no history exists.
pub fn estimate(databases: &[Database], available_bytes: u64, previous_ratio: f64) -> SpaceBudget {
    let ratio = if previous_ratio > 0.0 {
        previous_ratio
    } else {
        1.0
    };

    let required_bytes = databases
        .iter()
        .map(|db| (db.size_bytes as f64 / ratio).ceil() as u64)
        .sum();

    let verdict = if required_bytes > available_bytes {
        SpaceVerdict::Abort
    } else {
        SpaceVerdict::Proceed
    };

    SpaceBudget {
        required_bytes,
        available_bytes,
        verdict,
    }
}
