//! TOML configuration loading and validation.
//!
//! The configuration is read once at startup and treated as immutable for
//! the duration of the run.

use std::path::{Path, PathBuf};

use derive_more::{Display, Error, From};
use log::LevelFilter;

use crate::conditions::ConditionsConfig;

#[derive(Debug, Display, Error, From)]
pub enum ConfigError {
    #[display("Reading the config file failed: {_0}")]
    #[from]
    Io(std::io::Error),
    #[display("Error parsing TOML file: {_0}")]
    #[from]
    Parse(toml::de::Error),
    #[display("Backup directory does not exist: {}", _0.display())]
    BackupDirMissing(#[error(ignore)] PathBuf),
    #[display("Retention count 'versions' must be at least 1")]
    NoVersionsRetained,
    #[display(
        "Mutually exclusive values: cannot specify 'skip_unchanged_dbs' with 'delete_before' option"
    )]
    ReuseDeleteBeforeConflict,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub main: MainConfig,
    #[serde(default)]
    pub zabbix: ZabbixConfig,
    #[serde(default)]
    pub conditions: ConditionsConfig,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct MainConfig {
    /// Root directory holding one subdirectory per backup version.
    pub backup_dir: PathBuf,

    /// Dump worker count. Zero or negative means all logical CPUs minus the
    /// absolute value, floored at one.
    #[serde(default)]
    pub parallelism: i64,

    /// Number of backup versions to retain.
    #[serde(default = "default_versions")]
    pub versions: usize,

    /// Remove old versions before the run instead of after it.
    #[serde(default)]
    pub delete_before: bool,

    #[serde(default = "default_mysqldump_bin")]
    pub mysqldump_bin: PathBuf,

    #[serde(default = "default_mysql_bin")]
    pub mysql_bin: PathBuf,

    /// Extra arguments appended to every mysqldump invocation.
    #[serde(default)]
    pub mysqldump_options: Vec<String>,

    #[serde(default)]
    pub exclude_databases: Vec<String>,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Reuse the previous dump of databases that haven't changed.
    #[serde(default)]
    pub skip_unchanged_dbs: bool,

    /// Local TCP port used as an exclusive execution lock.
    #[serde(default = "default_lock_port")]
    pub lock_port: u16,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ZabbixConfig {
    /// Zabbix item key the run report is sent under. Empty disables
    /// reporting.
    #[serde(default)]
    pub item_key: String,

    #[serde(default = "default_sender_bin")]
    pub sender_bin: PathBuf,

    #[serde(default = "default_agent_conf")]
    pub agent_conf: PathBuf,
}

impl Default for ZabbixConfig {
    fn default() -> Self {
        ZabbixConfig {
            item_key: String::new(),
            sender_bin: default_sender_bin(),
            agent_conf: default_agent_conf(),
        }
    }
}

fn default_versions() -> usize {
    1
}
fn default_mysqldump_bin() -> PathBuf {
    PathBuf::from("mysqldump")
}
fn default_mysql_bin() -> PathBuf {
    PathBuf::from("mysql")
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_lock_port() -> u16 {
    45678
}
fn default_sender_bin() -> PathBuf {
    PathBuf::from("zabbix_sender")
}
fn default_agent_conf() -> PathBuf {
    PathBuf::from("/etc/zabbix/zabbix_agentd.conf")
}

impl Config {
    /// Read and validate the configuration file.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.main.backup_dir.is_dir() {
            return Err(ConfigError::BackupDirMissing(self.main.backup_dir.clone()));
        }
        if self.main.versions == 0 {
            return Err(ConfigError::NoVersionsRetained);
        }
        // deleting old versions first would remove the artifact reuse links to
        if self.main.delete_before && self.main.skip_unchanged_dbs {
            return Err(ConfigError::ReuseDeleteBeforeConflict);
        }
        Ok(())
    }

    /// Log level from the config file; unknown values fall back to info.
    pub fn log_level(&self) -> LevelFilter {
        self.main
            .log_level
            .parse()
            .unwrap_or(LevelFilter::Info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_config(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("oma.conf");
        fs::write(&path, content).unwrap();
        path
    }

    fn minimal(backup_dir: &Path) -> String {
        format!("[main]\nbackup_dir = \"{}\"\n", backup_dir.display())
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), &minimal(dir.path()));

        let config = Config::load(&path).unwrap();

        assert_eq!(config.main.parallelism, 0);
        assert_eq!(config.main.versions, 1);
        assert!(!config.main.delete_before);
        assert!(!config.main.skip_unchanged_dbs);
        assert_eq!(config.main.mysqldump_bin, PathBuf::from("mysqldump"));
        assert_eq!(config.main.mysql_bin, PathBuf::from("mysql"));
        assert_eq!(config.main.lock_port, 45678);
        assert_eq!(config.log_level(), LevelFilter::Info);
        assert!(config.zabbix.item_key.is_empty());
        assert!(config.conditions.skip_conditions.is_empty());
    }

    #[test]
    fn full_config_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let content = format!(
            r#"
[main]
backup_dir = "{}"
parallelism = -2
versions = 3
delete_before = false
mysqldump_options = ["--single-transaction", "--quick"]
exclude_databases = ["skip1"]
log_level = "debug"
skip_unchanged_dbs = true

[zabbix]
item_key = "mysql.backup.log"

[conditions]
skip_conditions = ["test -f /tmp/skip-flag"]
run_conditions = [{{ cmd = "sleep 3", timeout = 1 }}]
terminate_conditions = ["ls -la $OMA_CURRENT_DIR"]
"#,
            dir.path().display()
        );
        let path = write_config(dir.path(), &content);

        let config = Config::load(&path).unwrap();

        assert_eq!(config.main.parallelism, -2);
        assert_eq!(config.main.versions, 3);
        assert!(config.main.skip_unchanged_dbs);
        assert_eq!(
            config.main.mysqldump_options,
            ["--single-transaction", "--quick"]
        );
        assert_eq!(config.log_level(), LevelFilter::Debug);
        assert_eq!(config.zabbix.item_key, "mysql.backup.log");
        assert_eq!(config.conditions.run_conditions.len(), 1);
        assert_eq!(
            config.conditions.run_conditions[0].timeout(),
            Some(std::time::Duration::from_secs(1))
        );
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(matches!(
            Config::load(Path::new("/nonexistent/oma.conf")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn missing_backup_dir_setting_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "[main]\nparallelism = 2\n");
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn nonexistent_backup_dir_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "[main]\nbackup_dir = \"/nonexistent/oma\"\n");
        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::BackupDirMissing(_))
        ));
    }

    #[test]
    fn reuse_with_delete_before_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let content = format!(
            "{}delete_before = true\nskip_unchanged_dbs = true\n",
            minimal(dir.path())
        );
        let path = write_config(dir.path(), &content);
        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::ReuseDeleteBeforeConflict)
        ));
    }

    #[test]
    fn zero_versions_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let content = format!("{}versions = 0\n", minimal(dir.path()));
        let path = write_config(dir.path(), &content);
        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::NoVersionsRetained)
        ));
    }

    #[test]
    fn unknown_log_level_falls_back_to_info() {
        let dir = tempfile::tempdir().unwrap();
        let content = format!("{}log_level = \"chatty\"\n", minimal(dir.path()));
        let path = write_config(dir.path(), &content);
        assert_eq!(Config::load(&path).unwrap().log_level(), LevelFilter::Info);
    }
}
