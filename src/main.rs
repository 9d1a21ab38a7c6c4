use std::fs::File;
use std::net::TcpListener;
use std::path::Path;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use log::LevelFilter;

use oma_lib::cli::Cli;
use oma_lib::config::Config;
use oma_lib::engine::{EngineError, RunContext, RunResult};
use oma_lib::util::TeeWriter;
use oma_lib::zabbix::ZabbixSender;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let started = Instant::now();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            return ExitCode::from(1);
        }
    };

    // One run at a time. The listener is held until the process exits.
    let _lock = match TcpListener::bind(("127.0.0.1", config.main.lock_port)) {
        Ok(listener) => listener,
        Err(_) => {
            eprintln!(
                "Another instance of oma is already running (port {} is in use)",
                config.main.lock_port
            );
            return ExitCode::from(3);
        }
    };

    let level = if cli.debug {
        LevelFilter::Debug
    } else {
        config.log_level()
    };
    let log_file = config.main.backup_dir.join("oma.log");
    init_logger(level, &log_file);
    log::debug!("Using configuration file: {}", cli.config.display());
    if cli.debug {
        log::debug!("Debug mode enabled via command line argument");
    }

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        if let Err(e) = ctrlc::set_handler(move || {
            cancel.store(true, Ordering::SeqCst);
        }) {
            log::warn!("Installing the termination handler failed: {e}");
        }
    }

    let zabbix = ZabbixSender::new(config.zabbix.clone());
    let context = RunContext::new(config, cancel);

    let (result, exit_code) = match context.execute() {
        Ok(result) => {
            let exit_code = result.exit_code();
            (result, exit_code)
        }
        Err(e @ EngineError::NotEnoughDiskSpace { .. }) => {
            log::error!("{e}");
            (RunResult::aborted(e.to_string(), started.elapsed()), 2)
        }
        Err(e) => {
            log::error!("{e}");
            (RunResult::aborted(e.to_string(), started.elapsed()), 1)
        }
    };

    if let Err(e) = zabbix.send_log_file(&result, &log_file) {
        log::error!("Sending the run report to Zabbix failed: {e}");
    }

    ExitCode::from(exit_code)
}

/// Log to stderr and to the per-run log file, which is truncated at start
/// and forwarded to Zabbix at the end of the run.
fn init_logger(level: LevelFilter, log_file: &Path) {
    let mut builder = env_logger::builder();
    builder.filter_level(level);

    match File::create(log_file) {
        Ok(file) => {
            builder.target(env_logger::Target::Pipe(Box::new(TeeWriter::new(file))));
        }
        Err(e) => eprintln!(
            "Writing the log file {} failed: {e}",
            log_file.display()
        ),
    }

    builder.try_init().expect("env_logger should not fail");
}
