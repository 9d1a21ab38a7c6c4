//! The backup orchestration engine.
//!
//! One [RunContext] per invocation drives the phases in order: skip
//! conditions, inventory, space estimate, run conditions, dump + reuse,
//! retention, terminate conditions, report. No filesystem mutation happens
//! before the space verdict is "proceed" and the run conditions have
//! passed.

pub mod report;
pub mod space;

pub use report::RunResult;
pub use space::{SpaceBudget, SpaceVerdict};

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Local};
use derive_more::{Display, Error, From};

use crate::conditions::{ConditionsManager, PhaseOutcome};
use crate::config::Config;
use crate::dump::{DumpJob, DumpScheduler};
use crate::mysql::{take_inventory, MySqlClient, MySqlError};
use crate::store::{
    ArtifactOutcome, DatabaseRecord, RetentionTiming, RunVerdict, StoreError, StoreManager,
    VersionMetadata,
};
use crate::util::{calc_parallelism, format_bytes, free_bytes};

#[derive(Debug, Display, Error, From)]
pub enum EngineError {
    /// The space estimate exceeded the free space at the destination.
    /// Guaranteed to be raised before any filesystem mutation.
    #[display(
        "Not enough free space in target directory. Required {required} bytes, available {available} bytes"
    )]
    NotEnoughDiskSpace { required: u64, available: u64 },

    #[from]
    MySql(MySqlError),

    #[from]
    Store(StoreError),
}

/// All collaborators of one backup run.
pub struct RunContext {
    config: Config,
    store: StoreManager,
    client: MySqlClient,
    conditions: ConditionsManager,
    cancel: Arc<AtomicBool>,
    started: Instant,
}

impl RunContext {
    pub fn new(config: Config, cancel: Arc<AtomicBool>) -> RunContext {
        let store = StoreManager::new(&config.main.backup_dir);
        let client = MySqlClient::new(&config.main.mysql_bin);
        let conditions = ConditionsManager::new(config.conditions.clone());

        RunContext {
            config,
            store,
            client,
            conditions,
            cancel,
            started: Instant::now(),
        }
    }

    /// Perform one full backup pass.
    pub fn execute(mut self) -> Result<RunResult, EngineError> {
        // Skip phase: a trigger is a deliberate, successful skip.
        if self.conditions.check_skip() == PhaseOutcome::Triggered {
            log::info!(target: "engine", "Backup skipped due to skip conditions (but considered successful)");
            return Ok(RunResult::skipped(self.started.elapsed()));
        }

        // Inventory: read-only, no mutation yet.
        match self.client.server_version() {
            Ok(version) => log::debug!(target: "engine", "MySQL server version: {version}"),
            Err(e) => log::debug!(target: "engine", "Server version probe failed: {e}"),
        }
        let data_dir = self.client.data_dir()?;
        log::debug!(target: "engine", "MySQL data directory: {}", data_dir.display());
        let names = self.client.databases()?;
        log::debug!(
            target: "engine",
            "Found {} databases: {}",
            names.len(),
            names.join(", ")
        );
        log::info!(
            target: "engine",
            "Skip unchanged databases: {}",
            self.config.main.skip_unchanged_dbs
        );
        let inventory = take_inventory(&data_dir, &names, &self.config.main.exclude_databases);
        if !inventory.excluded.is_empty() {
            log::info!(
                target: "engine",
                "Excluding databases {:?} from backup job.",
                inventory.excluded
            );
        }

        // Space estimate, still before any mutation.
        let available = free_bytes(self.store.backup_root()).map_err(StoreError::from)?;
        let budget = space::estimate(
            &inventory.databases,
            available,
            self.store.previous_ratio(),
        );
        log::info!(
            target: "engine",
            "Backup will require {}. Having {} free.",
            format_bytes(budget.required_bytes),
            format_bytes(budget.available_bytes)
        );
        if budget.verdict == SpaceVerdict::Abort {
            log::error!(target: "engine", "Not enough free space in target directory.");
            return Err(EngineError::NotEnoughDiskSpace {
                required: budget.required_bytes,
                available: budget.available_bytes,
            });
        }

        // Run phase: a trigger aborts the run as a failure, nothing started.
        if self.conditions.check_run() == PhaseOutcome::Triggered {
            log::error!(target: "engine", "Backup aborted due to failed run conditions");
            return Ok(RunResult::aborted(
                "one or more run conditions failed".to_string(),
                self.started.elapsed(),
            ));
        }

        let keep = self.config.main.versions;
        if self.config.main.delete_before {
            log::debug!(
                target: "engine",
                "Removing old backup directories before new backup. Will keep {keep} versions ..."
            );
            let removed = self
                .store
                .enforce_retention(keep, RetentionTiming::Before, None)?;
            log::info!(target: "engine", "Removed old backup directories: {}", removed.len());
        }

        // The reuse source must be resolved before the current directory
        // appears in the listing.
        let previous = self.store.previous_successful()?;

        let created = Local::now();
        let current = self.store.create_version(created)?;
        self.conditions.begin_execution();

        log::info!(target: "engine", "Performing the backup now ...");
        let parallelism = calc_parallelism(self.config.main.parallelism);
        log::info!(
            target: "engine",
            "Will start {parallelism} parallel mysqldump processes using options {:?}",
            self.config.main.mysqldump_options
        );

        let scheduler = DumpScheduler::new(
            self.config.main.mysqldump_bin.clone(),
            self.config.main.mysqldump_options.clone(),
            current.clone(),
            previous,
            self.config.main.skip_unchanged_dbs,
            Arc::clone(&self.cancel),
        );
        let jobs = scheduler.run(inventory.databases, parallelism);
        let cancelled = self.cancel.load(Ordering::SeqCst);

        let succeeded = jobs
            .iter()
            .filter(|job| job.outcome != ArtifactOutcome::Failed)
            .count();
        let failed = jobs.len() - succeeded;
        if failed == 0 {
            log::info!(
                target: "engine",
                "Successfully dumped {succeeded} of {}, failed {failed} databases",
                jobs.len()
            );
        } else {
            log::error!(
                target: "engine",
                "Backing up all databases: Expected {}, got {succeeded}",
                jobs.len()
            );
        }

        let metadata = build_metadata(created, &jobs, cancelled);
        self.store.finalize_version(&current, &metadata)?;

        if !self.config.main.delete_before {
            if cancelled {
                log::warn!(target: "engine", "Skipping retention cleanup after cancelled run");
            } else {
                log::debug!(
                    target: "engine",
                    "Removing old backup directories after current backup. Will keep {keep} versions ..."
                );
                let removed = self.store.enforce_retention(
                    keep,
                    RetentionTiming::After,
                    Some((&current, &metadata)),
                )?;
                log::info!(target: "engine", "Removed old backup directories: {}", removed.len());
            }
        }

        // Terminate phase runs even after partial failures so cleanup hooks
        // always fire.
        let terminate = self.conditions.check_terminate(&current.path);
        if terminate == PhaseOutcome::Triggered {
            log::error!(target: "engine", "One or more terminate conditions failed");
        }

        Ok(RunResult::from_jobs(
            &jobs,
            inventory.excluded.len(),
            inventory.warnings,
            terminate,
            cancelled,
            self.started.elapsed(),
        ))
    }
}

/// The record the next run's change detection and space estimation read.
fn build_metadata(created: DateTime<Local>, jobs: &[DumpJob], cancelled: bool) -> VersionMetadata {
    let mut databases = BTreeMap::new();
    let mut raw_bytes = 0u64;
    let mut compressed_bytes = 0u64;
    let mut any_failed = cancelled;

    for job in jobs {
        raw_bytes += job.raw_bytes;
        compressed_bytes += job.compressed_bytes;
        any_failed |= job.outcome == ArtifactOutcome::Failed;
        databases.insert(
            job.database.clone(),
            DatabaseRecord {
                fingerprint: job.fingerprint,
                raw_bytes: job.raw_bytes,
                compressed_bytes: job.compressed_bytes,
                outcome: job.outcome,
            },
        );
    }

    VersionMetadata {
        created,
        finished: Local::now(),
        verdict: if any_failed {
            RunVerdict::Failure
        } else {
            RunVerdict::Success
        },
        raw_bytes,
        compressed_bytes,
        databases,
    }
}
