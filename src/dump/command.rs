//! Typed construction of one `mysqldump` invocation.

use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

/// Argument builder for the dump tool.
///
/// Produces an explicit argv so the executed command can be logged and
/// tested as structured data instead of an interpolated shell string.
#[derive(Debug, Clone)]
pub struct DumpCommand {
    bin: PathBuf,
    database: String,
    options: Vec<String>,
}

impl DumpCommand {
    pub fn new(bin: &Path, database: &str, options: &[String]) -> DumpCommand {
        DumpCommand {
            bin: bin.to_path_buf(),
            database: database.to_string(),
            options: options.to_vec(),
        }
    }

    /// The full argument vector, binary included.
    pub fn argv(&self) -> Vec<OsString> {
        let mut argv = vec![OsString::from(&self.bin), OsString::from(&self.database)];
        argv.extend(self.options.iter().map(OsString::from));
        argv
    }

    /// Spawn the dump process with stdout and stderr piped.
    pub fn spawn(&self) -> io::Result<Child> {
        Command::new(&self.bin)
            .arg(&self.database)
            .args(&self.options)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
    }
}

impl fmt::Display for DumpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.bin.display(), self.database)?;
        for option in &self.options {
            write!(f, " {option}")?;
        }
        Ok(())
    }
}
