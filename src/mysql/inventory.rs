//! Enumeration of candidate databases with size and change fingerprint.

use std::fs;
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

use super::encode_database_name;

/// A candidate database, sized and fingerprinted from the server's data
/// directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Database {
    pub name: String,
    /// Sum of file sizes in the schema directory.
    pub size_bytes: u64,
    /// Latest modification time (seconds since epoch) across the schema
    /// files. `None` when the directory holds no regular files.
    pub fingerprint: Option<i64>,
}

/// Result of one inventory pass over the data directory.
#[derive(Debug, Default)]
pub struct Inventory {
    /// Eligible databases, in server enumeration order.
    pub databases: Vec<Database>,
    /// Databases excluded by configuration.
    pub excluded: Vec<String>,
    /// Eligible databases whose schema directory could not be read.
    pub warnings: Vec<String>,
}

/// Build the inventory for `names` from a read-only walk of `data_dir`.
///
/// An unreadable schema directory is a warning, not a run failure: the
/// database is skipped for this run and the problem is surfaced in the
/// final report.
pub fn take_inventory(data_dir: &Path, names: &[String], exclude: &[String]) -> Inventory {
    let mut inventory = Inventory::default();

    for name in names {
        if exclude.contains(name) {
            inventory.excluded.push(name.clone());
            continue;
        }

        let schema_dir = data_dir.join(encode_database_name(name));
        match scan_schema_dir(&schema_dir) {
            Ok((size_bytes, fingerprint)) => inventory.databases.push(Database {
                name: name.clone(),
                size_bytes,
                fingerprint,
            }),
            Err(e) => {
                log::warn!(target: "mysql::inventory", "Skipping '{name}': schema directory is not readable: {e}");
                inventory
                    .warnings
                    .push(format!("schema directory of '{name}' not readable: {e}"));
            }
        }
    }

    for excluded in exclude {
        if !names.contains(excluded) {
            log::warn!(target: "mysql::inventory", "Database to be excluded '{excluded}' does not exist.");
        }
    }

    inventory
}

fn scan_schema_dir(dir: &Path) -> io::Result<(u64, Option<i64>)> {
    let mut size = 0u64;
    let mut latest: Option<i64> = None;

    for entry in fs::read_dir(dir)? {
        let metadata = entry?.metadata()?;
        if !metadata.is_file() {
            continue;
        }

        size += metadata.len();
        let mtime = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        latest = Some(latest.map_or(mtime, |current| current.max(mtime)));
    }

    Ok((size, latest))
}
