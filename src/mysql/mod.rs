//! Interaction with the MySQL server using the `mysql` client binary.

mod encode;
pub mod inventory;

pub use encode::encode_database_name;
pub use inventory::{take_inventory, Database, Inventory};

use std::path::PathBuf;
use std::process::Command;

use derive_more::{Display, Error, From};

/// System schemas that are never backed up.
pub const SYSTEM_DATABASES: [&str; 3] = ["information_schema", "sys", "performance_schema"];

/// Errors talking to the MySQL server through the client binary.
#[derive(Debug, Display, Error, From)]
pub enum MySqlError {
    /// The client binary could not be executed at all.
    #[display("Failed to execute the mysql client: {_0}")]
    #[from]
    Io(std::io::Error),
    /// The client ran but the server reported an error.
    #[display("mysql client failed: {stderr}")]
    Failed {
        #[error(ignore)]
        stderr: String,
    },
}

/// Read-only queries against the server, one client invocation each.
#[derive(Debug, Clone)]
pub struct MySqlClient {
    mysql_bin: PathBuf,
}

impl MySqlClient {
    pub fn new(mysql_bin: impl Into<PathBuf>) -> Self {
        Self {
            mysql_bin: mysql_bin.into(),
        }
    }

    fn query(&self, sql: &str) -> Result<String, MySqlError> {
        let output = Command::new(&self.mysql_bin)
            .arg("-N")
            .arg("-e")
            .arg(sql)
            .output()?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(MySqlError::Failed {
                stderr: stderr.trim().to_string(),
            });
        }
        if !stderr.is_empty() {
            log::warn!(target: "mysql", "{}", stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    }

    /// The server's data directory (`SELECT @@datadir`).
    pub fn data_dir(&self) -> Result<PathBuf, MySqlError> {
        Ok(PathBuf::from(self.query("SELECT @@datadir")?.trim()))
    }

    /// Server version string, doubles as a connectivity probe.
    pub fn server_version(&self) -> Result<String, MySqlError> {
        self.query("SELECT VERSION()")
    }

    /// All databases on the server except the system schemas.
    pub fn databases(&self) -> Result<Vec<String>, MySqlError> {
        let stdout = self.query("show databases")?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|db| !db.is_empty() && !SYSTEM_DATABASES.contains(db))
            .map(str::to_string)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The client is exercised against `sh` instead of a live server; only
    // the output handling is under test here.

    #[test]
    fn query_trims_and_returns_stdout() {
        let client = MySqlClient::new("echo");
        let out = client.query("hello").unwrap();
        assert_eq!(out, "-N -e hello");
    }

    #[test]
    fn failing_client_is_an_error() {
        let client = MySqlClient::new("false");
        assert!(matches!(client.query("x"), Err(MySqlError::Failed { .. })));
    }

    #[test]
    fn missing_binary_is_an_io_error() {
        let client = MySqlClient::new("/nonexistent/mysql-client");
        assert!(matches!(client.query("x"), Err(MySqlError::Io(_))));
    }
}
