//! Bounded-parallel execution of dump jobs.
//!
//! A fixed pool of worker threads pulls databases off a shared queue; each
//! worker drives at most one `mysqldump` subprocess at a time, streaming
//! its stdout through a gzip encoder into the current version directory.
//! Unchanged databases are reconciled against the previous version instead
//! of being dumped again.

mod command;
mod job;

pub use command::DumpCommand;
pub use job::{classify, DumpFailure, DumpJob};

use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use chrono::Local;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::mysql::Database;
use crate::store::{ArtifactOutcome, Version, VersionMetadata};

/// Read chunk size when streaming dump output.
const CHUNK_SIZE: usize = 64 * 1024;
/// Bytes of trailing output kept to check the completion marker.
const TAIL_WINDOW: usize = 512;

/// Everything a worker needs to process one database.
struct WorkerContext {
    dump_bin: PathBuf,
    options: Vec<String>,
    current: Version,
    /// Previous version and its metadata, present when reuse is possible.
    previous: Option<(Version, VersionMetadata)>,
    reuse_unchanged: bool,
    cancel: Arc<AtomicBool>,
}

/// Runs one dump job per database under bounded parallelism.
pub struct DumpScheduler {
    context: Arc<WorkerContext>,
}

impl DumpScheduler {
    pub fn new(
        dump_bin: PathBuf,
        options: Vec<String>,
        current: Version,
        previous: Option<(Version, VersionMetadata)>,
        reuse_unchanged: bool,
        cancel: Arc<AtomicBool>,
    ) -> DumpScheduler {
        DumpScheduler {
            context: Arc::new(WorkerContext {
                dump_bin,
                options,
                current,
                previous,
                reuse_unchanged,
                cancel,
            }),
        }
    }

    /// Process every database, `parallelism` workers at a time.
    ///
    /// A failed job never aborts its siblings; every database is attempted
    /// unless the run is cancelled. Returns one terminal job per database,
    /// sorted by database name.
    pub fn run(&self, databases: Vec<Database>, parallelism: usize) -> Vec<DumpJob> {
        let queue = Arc::new(Mutex::new(VecDeque::from(databases)));
        let (tx, rx) = mpsc::channel();

        let workers: Vec<_> = (0..parallelism)
            .map(|_| {
                let context = Arc::clone(&self.context);
                let queue = Arc::clone(&queue);
                let tx = tx.clone();
                thread::spawn(move || worker_loop(context, queue, tx))
            })
            .collect();
        drop(tx);

        let mut jobs: Vec<DumpJob> = rx.into_iter().collect();
        for worker in workers {
            let _ = worker.join();
        }

        jobs.sort_by(|a, b| a.database.cmp(&b.database));
        jobs
    }
}

fn worker_loop(
    context: Arc<WorkerContext>,
    queue: Arc<Mutex<VecDeque<Database>>>,
    tx: mpsc::Sender<DumpJob>,
) {
    loop {
        if context.cancel.load(Ordering::SeqCst) {
            return;
        }
        let Some(database) = queue.lock().expect("job queue poisoned").pop_front() else {
            return;
        };

        let job = process_database(&context, &database);
        match job.outcome {
            ArtifactOutcome::Fresh => {
                log::info!(target: "dump", "DB '{}': Backup successfully", job.database);
            }
            ArtifactOutcome::Reused => {}
            ArtifactOutcome::Failed => {
                let reason = job.error.as_deref().unwrap_or("unknown");
                log::error!(target: "dump", "DB '{}': Backup failed: {reason}", job.database);
            }
        }

        if tx.send(job).is_err() {
            return;
        }
    }
}

fn process_database(context: &WorkerContext, database: &Database) -> DumpJob {
    let started = Local::now();
    let target = context.current.artifact(&database.name);

    if context.reuse_unchanged {
        if let Some(job) = try_reuse(context, database, &target, started) {
            return job;
        }
    }

    match dump_database(context, database, &target) {
        Ok((raw_bytes, compressed_bytes)) => DumpJob {
            database: database.name.clone(),
            target,
            fingerprint: database.fingerprint,
            started,
            finished: Local::now(),
            raw_bytes,
            compressed_bytes,
            outcome: ArtifactOutcome::Fresh,
            error: None,
        },
        Err(failure) => {
            // a partial file must never survive where a later run could
            // mistake it for a valid backup
            if target.exists() {
                let _ = fs::remove_file(&target);
            }
            DumpJob {
                database: database.name.clone(),
                target,
                fingerprint: database.fingerprint,
                started,
                finished: Local::now(),
                raw_bytes: 0,
                compressed_bytes: 0,
                outcome: ArtifactOutcome::Failed,
                error: Some(failure.to_string()),
            }
        }
    }
}

/// Reconcile an unchanged database against the previous version.
///
/// Returns the reused job, or `None` when a fresh dump is needed after all.
fn try_reuse(
    context: &WorkerContext,
    database: &Database,
    target: &Path,
    started: chrono::DateTime<Local>,
) -> Option<DumpJob> {
    let (previous, metadata) = context.previous.as_ref()?;
    let record = metadata.databases.get(&database.name)?;
    if record.outcome == ArtifactOutcome::Failed {
        return None;
    }

    let fingerprint = database.fingerprint?;
    if record.fingerprint != Some(fingerprint) {
        log::debug!(
            target: "dump",
            "DB '{}': changed since the previous backup (fingerprint {fingerprint}, was {:?})",
            database.name,
            record.fingerprint
        );
        return None;
    }

    let source = previous.artifact(&database.name);
    if !source.is_file() {
        log::warn!(
            target: "dump",
            "DB '{}': previous artifact {} is missing, dumping fresh",
            database.name,
            source.display()
        );
        return None;
    }

    if let Err(e) = link_or_copy(&source, target) {
        log::warn!(
            target: "dump",
            "DB '{}': reusing the previous backup failed ({e}), dumping fresh",
            database.name
        );
        return None;
    }

    log::info!(
        target: "dump",
        "DB '{}': Backup is newer than last database change. Reusing previous backup",
        database.name
    );
    Some(DumpJob {
        database: database.name.clone(),
        target: target.to_path_buf(),
        fingerprint: Some(fingerprint),
        started,
        finished: Local::now(),
        raw_bytes: record.raw_bytes,
        compressed_bytes: record.compressed_bytes,
        outcome: ArtifactOutcome::Reused,
        error: None,
    })
}

/// Hard link so the artifact survives retention deletion of the old
/// version; fall back to a copy across filesystems.
fn link_or_copy(source: &Path, target: &Path) -> std::io::Result<()> {
    match fs::hard_link(source, target) {
        Ok(()) => Ok(()),
        Err(_) => fs::copy(source, target).map(|_| ()),
    }
}

fn dump_database(
    context: &WorkerContext,
    database: &Database,
    target: &Path,
) -> Result<(u64, u64), DumpFailure> {
    let command = DumpCommand::new(&context.dump_bin, &database.name, &context.options);
    log::debug!(target: "dump", "Executing command: {command}");

    let mut child = command.spawn().map_err(io_failure)?;
    let stdout = child.stdout.take().expect("stdout is piped");
    let stderr = child.stderr.take().expect("stderr is piped");
    let stderr_reader = thread::spawn(move || {
        let mut buf = String::new();
        let _ = BufReader::new(stderr).read_to_string(&mut buf);
        buf
    });

    let file = File::create(target).map_err(io_failure)?;
    let mut encoder = GzEncoder::new(file, Compression::default());
    let mut reader = BufReader::new(stdout);
    let mut chunk = [0u8; CHUNK_SIZE];
    let mut raw_bytes = 0u64;
    let mut tail: Vec<u8> = Vec::with_capacity(TAIL_WINDOW);

    loop {
        if context.cancel.load(Ordering::SeqCst) {
            let _ = child.kill();
            let _ = child.wait();
            return Err(DumpFailure::Cancelled);
        }

        let read = reader.read(&mut chunk).map_err(io_failure)?;
        if read == 0 {
            break;
        }
        raw_bytes += read as u64;
        encoder.write_all(&chunk[..read]).map_err(io_failure)?;
        keep_tail(&mut tail, &chunk[..read]);
    }

    let file = encoder.finish().map_err(io_failure)?;
    let status = child.wait().map_err(io_failure)?;
    let stderr_text = stderr_reader.join().unwrap_or_default();
    let compressed_bytes = file.metadata().map(|m| m.len()).unwrap_or(0);

    classify(
        status.code().unwrap_or(-1),
        &stderr_text,
        raw_bytes,
        compressed_bytes,
        &last_line(&tail),
    )?;
    Ok((raw_bytes, compressed_bytes))
}

fn io_failure(e: std::io::Error) -> DumpFailure {
    DumpFailure::Io(e.to_string())
}

fn keep_tail(tail: &mut Vec<u8>, chunk: &[u8]) {
    tail.extend_from_slice(chunk);
    if tail.len() > TAIL_WINDOW {
        tail.drain(..tail.len() - TAIL_WINDOW);
    }
}

/// Last non-empty line of the dump output.
fn last_line(tail: &[u8]) -> String {
    String::from_utf8_lossy(tail)
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or_default()
        .to_string()
}
