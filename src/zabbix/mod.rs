//! Forwarding of the run summary and log to a Zabbix server via the
//! `zabbix_sender` binary.

use std::fs;
use std::path::Path;
use std::process::Command;

use derive_more::{Display, Error, From};

use crate::config::ZabbixConfig;
use crate::engine::RunResult;

/// Maximum value size zabbix_sender can send to the zabbix server.
/// https://www.zabbix.com/documentation/current/en/manual/config/items/item#text-data-limits
const MAX_VALUE_BYTES: usize = 65536;

#[derive(Debug, Display, Error, From)]
pub enum ZabbixError {
    #[display("Failed to execute zabbix_sender: {_0}")]
    #[from]
    Io(std::io::Error),
    #[display("zabbix_sender failed: {_0}")]
    SenderFailed(#[error(ignore)] String),
}

pub struct ZabbixSender {
    config: ZabbixConfig,
}

impl ZabbixSender {
    pub fn new(config: ZabbixConfig) -> ZabbixSender {
        ZabbixSender { config }
    }

    /// Reporting is disabled when no item key is configured.
    pub fn enabled(&self) -> bool {
        !self.config.item_key.is_empty()
    }

    pub fn send_value(&self, value: &str) -> Result<(), ZabbixError> {
        let output = Command::new(&self.config.sender_bin)
            .arg("-c")
            .arg(&self.config.agent_conf)
            .arg("-k")
            .arg(&self.config.item_key)
            .arg("-o")
            .arg(value)
            .output()?;

        if !output.status.success() {
            return Err(ZabbixError::SenderFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }

    /// Send the run summary plus the run's log content, truncated to the
    /// Zabbix item value limit.
    pub fn send_log_file(&self, result: &RunResult, log_file: &Path) -> Result<(), ZabbixError> {
        if !self.enabled() {
            log::debug!(target: "zabbix", "Zabbix reporting disabled (no item_key configured)");
            return Ok(());
        }

        let log_content = fs::read_to_string(log_file).unwrap_or_default();
        let value = build_value(&result.summary(), &log_content, log_file);
        self.send_value(&value)
    }
}

/// Assemble the item value, truncating line-wise below the size limit.
fn build_value(summary: &str, log_content: &str, log_file: &Path) -> String {
    let content = format!("{summary}\n{log_content}");
    if content.len() < MAX_VALUE_BYTES {
        return content;
    }

    let notice = format!(
        "\n** Zabbix item value has been truncated because it exceeds {MAX_VALUE_BYTES} bytes.**\n\
         ** Refer to {} on the monitored host to get the full report.**\n",
        log_file.display()
    );
    let budget = MAX_VALUE_BYTES - notice.len();

    let mut truncated = String::new();
    for line in content.lines() {
        // +2 for the leading space and the newline
        if truncated.len() + line.len() + 2 > budget {
            break;
        }
        truncated.push(' ');
        truncated.push_str(line);
        truncated.push('\n');
    }
    truncated.push_str(&notice);
    truncated
}
