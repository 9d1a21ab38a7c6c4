//! Small helpers shared across the crate.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::process::Command;

/// Render a byte count for humans.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Resolve the configured parallelism to an actual worker count.
///
/// A positive value is taken as-is. Zero or a negative value means "all
/// logical CPUs minus the absolute value", floored at one worker.
pub fn calc_parallelism(configured: i64) -> usize {
    if configured > 0 {
        return configured as usize;
    }

    let cpus = num_cpus::get() as i64;
    (cpus + configured).max(1) as usize
}

/// Free bytes on the filesystem holding `path`, read from `df -B1`.
pub fn free_bytes(path: &Path) -> io::Result<u64> {
    let output = Command::new("df").arg("-B1").arg(path).output()?;
    if !output.status.success() {
        return Err(io::Error::other(format!(
            "df failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .trim()
        .lines()
        .nth(1)
        .and_then(|line| line.split_whitespace().nth(3))
        .and_then(|avail| avail.parse().ok())
        .ok_or_else(|| io::Error::other("unexpected df output"))
}

/// Duplicates log output to stderr and the per-run log file.
pub struct TeeWriter {
    file: File,
}

impl TeeWriter {
    pub fn new(file: File) -> Self {
        Self { file }
    }
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write_all(buf)?;
        io::stderr().write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()?;
        io::stderr().flush()
    }
}
