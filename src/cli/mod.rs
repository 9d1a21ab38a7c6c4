use std::path::PathBuf;

use clap::Parser;

/// Optimized MySQLDump Archiver - a smart wrapper around mysqldump.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, env = "OMA_CONFIG", default_value = "/etc/oma/oma.conf")]
    pub config: PathBuf,

    /// Set log level to debug, overriding the log level from the config
    /// file.
    #[arg(short, long)]
    pub debug: bool,
}
