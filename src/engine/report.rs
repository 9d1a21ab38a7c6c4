//! Aggregation of per-database outcomes into one run verdict.

use std::time::Duration;

use crate::conditions::PhaseOutcome;
use crate::dump::DumpJob;
use crate::store::{ArtifactOutcome, RunVerdict};

/// Final aggregate of one backup run, the one object reported externally.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub verdict: RunVerdict,
    pub fresh: usize,
    pub reused: usize,
    pub failed: usize,
    pub excluded: usize,
    pub total: usize,
    pub elapsed: Duration,
    /// One message per failed database or failed phase.
    pub failures: Vec<String>,
    /// Non-fatal findings, e.g. unreadable schema directories.
    pub warnings: Vec<String>,
}

impl RunResult {
    /// A run skipped deliberately by a skip condition.
    pub fn skipped(elapsed: Duration) -> RunResult {
        RunResult {
            verdict: RunVerdict::Skipped,
            fresh: 0,
            reused: 0,
            failed: 0,
            excluded: 0,
            total: 0,
            elapsed,
            failures: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// A run aborted before any dump job started.
    pub fn aborted(reason: String, elapsed: Duration) -> RunResult {
        RunResult {
            verdict: RunVerdict::Failure,
            fresh: 0,
            reused: 0,
            failed: 0,
            excluded: 0,
            total: 0,
            elapsed,
            failures: vec![reason],
            warnings: Vec::new(),
        }
    }

    /// Aggregate the settled dump jobs and the terminate-phase outcome.
    pub fn from_jobs(
        jobs: &[DumpJob],
        excluded: usize,
        warnings: Vec<String>,
        terminate: PhaseOutcome,
        cancelled: bool,
        elapsed: Duration,
    ) -> RunResult {
        let fresh = count(jobs, ArtifactOutcome::Fresh);
        let reused = count(jobs, ArtifactOutcome::Reused);
        let failed = count(jobs, ArtifactOutcome::Failed);

        let mut failures: Vec<String> = jobs
            .iter()
            .filter(|job| job.outcome == ArtifactOutcome::Failed)
            .map(|job| {
                format!(
                    "DB '{}': {}",
                    job.database,
                    job.error.as_deref().unwrap_or("unknown failure")
                )
            })
            .collect();

        let mut verdict = if failed == 0 {
            RunVerdict::Success
        } else {
            RunVerdict::Failure
        };
        if terminate == PhaseOutcome::Triggered {
            verdict = RunVerdict::Failure;
            failures.push("one or more terminate conditions failed".to_string());
        }
        if cancelled {
            verdict = RunVerdict::Failure;
            failures.push("run cancelled by termination signal".to_string());
        }

        RunResult {
            verdict,
            fresh,
            reused,
            failed,
            excluded,
            total: jobs.len() + excluded,
            elapsed,
            failures,
            warnings,
        }
    }

    /// One-line summary for external reporting.
    pub fn summary(&self) -> String {
        if self.verdict == RunVerdict::Skipped {
            return "Summary: Backup skipped due to skip conditions (but considered successful)."
                .to_string();
        }

        format!(
            "Summary: Successfully dumped {} of {} databases ({} reused). Skipped {}, Failed {}.",
            self.fresh + self.reused,
            self.total,
            self.reused,
            self.excluded,
            self.failed,
        )
    }

    /// Process exit code this result maps to.
    pub fn exit_code(&self) -> u8 {
        match self.verdict {
            RunVerdict::Success | RunVerdict::Skipped => 0,
            RunVerdict::Failure => 1,
        }
    }
}

fn count(jobs: &[DumpJob], outcome: ArtifactOutcome) -> usize {
    jobs.iter().filter(|job| job.outcome == outcome).count()
}
