//! External command hooks gating and following the backup run.
//!
//! Three phases exist: skip conditions decide whether the run is skipped
//! deliberately, run conditions gate the actual backup, and terminate
//! conditions run once all dump and retention work has finished. The
//! manager is a small state machine so phases cannot run out of order.

use std::io::{self, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Poll interval while waiting on a command with a deadline.
const DEADLINE_POLL: Duration = Duration::from_millis(50);

/// A single configured condition command, executed via the host shell.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(untagged)]
pub enum ConditionCommand {
    /// Bare command string.
    Plain(String),
    /// Command with an execution deadline in seconds.
    WithTimeout { cmd: String, timeout: u64 },
}

impl ConditionCommand {
    pub fn command_line(&self) -> &str {
        match self {
            Self::Plain(cmd) => cmd,
            Self::WithTimeout { cmd, .. } => cmd,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        match self {
            Self::Plain(_) => None,
            Self::WithTimeout { timeout, .. } => Some(Duration::from_secs(*timeout)),
        }
    }
}

/// Lifecycle phase a condition list is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Skip,
    Run,
    Terminate,
}

impl Phase {
    fn label(self) -> &'static str {
        match self {
            Phase::Skip => "Skip",
            Phase::Run => "Run",
            Phase::Terminate => "Terminate",
        }
    }
}

/// Outcome of evaluating one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// Every command exited zero.
    Passed,
    /// At least one command exited non-zero.
    Triggered,
}

/// Progress of the condition state machine across one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    SkipChecked,
    RunChecked,
    Executing,
    Done,
}

/// The three condition command lists of one configuration.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ConditionsConfig {
    #[serde(default)]
    pub skip_conditions: Vec<ConditionCommand>,
    #[serde(default)]
    pub run_conditions: Vec<ConditionCommand>,
    #[serde(default)]
    pub terminate_conditions: Vec<ConditionCommand>,
}

/// Drives the three condition phases in order.
#[derive(Debug)]
pub struct ConditionsManager {
    config: ConditionsConfig,
    state: State,
}

impl ConditionsManager {
    pub fn new(config: ConditionsConfig) -> ConditionsManager {
        ConditionsManager {
            config,
            state: State::Idle,
        }
    }

    /// Evaluate the skip phase. Triggered means the whole backup is skipped
    /// deliberately; this is a success, not an error.
    pub fn check_skip(&mut self) -> PhaseOutcome {
        debug_assert_eq!(self.state, State::Idle);
        let outcome = check_gate(Phase::Skip, &self.config.skip_conditions);
        self.state = State::SkipChecked;
        outcome
    }

    /// Evaluate the run phase. Triggered aborts the run as a failure before
    /// any dump job starts.
    pub fn check_run(&mut self) -> PhaseOutcome {
        debug_assert_eq!(self.state, State::SkipChecked);
        let outcome = check_gate(Phase::Run, &self.config.run_conditions);
        self.state = State::RunChecked;
        outcome
    }

    /// Mark the transition into dump execution.
    pub fn begin_execution(&mut self) {
        debug_assert_eq!(self.state, State::RunChecked);
        self.state = State::Executing;
    }

    /// Run every terminate command, even after partial failures, so cleanup
    /// hooks always fire. Triggered marks the overall run failed but never
    /// undoes completed dumps.
    pub fn check_terminate(&mut self, current_dir: &Path) -> PhaseOutcome {
        debug_assert_eq!(self.state, State::Executing);
        self.state = State::Done;

        let mut outcome = PhaseOutcome::Passed;
        for condition in &self.config.terminate_conditions {
            let cmd = condition.command_line();
            match execute(condition, Some(current_dir)) {
                Ok(output) => {
                    log_output(Phase::Terminate, &output);
                    if output.exit_code == 0 {
                        log::info!(target: "conditions", "Terminate condition succeeded: '{cmd}'");
                    } else {
                        log::error!(
                            target: "conditions",
                            "Terminate condition failed: '{cmd}' (exit code: {})",
                            output.exit_code
                        );
                        outcome = PhaseOutcome::Triggered;
                    }
                }
                Err(e) => {
                    log::error!(target: "conditions", "Terminate condition could not be executed: '{cmd}': {e}");
                    outcome = PhaseOutcome::Triggered;
                }
            }
        }

        if outcome == PhaseOutcome::Passed && !self.config.terminate_conditions.is_empty() {
            log::info!(target: "conditions", "All terminate conditions succeeded");
        }
        outcome
    }
}

/// Evaluate a gating phase (skip or run), stopping at the first trigger.
fn check_gate(phase: Phase, commands: &[ConditionCommand]) -> PhaseOutcome {
    let label = phase.label();

    for condition in commands {
        let cmd = condition.command_line();
        match execute(condition, None) {
            Ok(output) => {
                log_output(phase, &output);
                if output.exit_code == 0 {
                    log::debug!(
                        target: "conditions",
                        "{label} condition passed: '{cmd}' (exit code: {})",
                        output.exit_code
                    );
                } else {
                    let level = match phase {
                        // triggering a skip is a normal, wanted event
                        Phase::Skip => log::Level::Info,
                        _ => log::Level::Error,
                    };
                    log::log!(
                        target: "conditions", level,
                        "{label} condition failed: '{cmd}' (exit code: {})",
                        output.exit_code
                    );
                    return PhaseOutcome::Triggered;
                }
            }
            Err(e) => {
                log::error!(target: "conditions", "{label} condition could not be executed: '{cmd}': {e}");
                return PhaseOutcome::Triggered;
            }
        }
    }

    PhaseOutcome::Passed
}

struct CommandOutput {
    exit_code: i32,
    stdout: String,
    stderr: String,
}

/// Stdout only at debug level; stderr always.
fn log_output(phase: Phase, output: &CommandOutput) {
    let label = phase.label();
    if !output.stdout.is_empty() {
        log::debug!(target: "conditions", "{label} condition stdout: {}", output.stdout.trim_end());
    }
    if !output.stderr.is_empty() {
        let level = if output.exit_code == 0 {
            log::Level::Warn
        } else {
            log::Level::Error
        };
        log::log!(target: "conditions", level, "{label} condition stderr: {}", output.stderr.trim_end());
    }
}

fn execute(condition: &ConditionCommand, current_dir: Option<&Path>) -> io::Result<CommandOutput> {
    let mut command = Command::new("sh");
    command
        .arg("-c")
        .arg(condition.command_line())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = current_dir {
        command.env("OMA_CURRENT_DIR", dir);
    }

    match condition.timeout() {
        None => {
            let output = command.output()?;
            Ok(CommandOutput {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
        Some(timeout) => execute_with_deadline(command, timeout, condition.command_line()),
    }
}

fn execute_with_deadline(
    mut command: Command,
    timeout: Duration,
    cmd: &str,
) -> io::Result<CommandOutput> {
    let mut child = command.spawn()?;
    let stdout = spawn_reader(child.stdout.take());
    let stderr = spawn_reader(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break Some(status);
        }
        if Instant::now() >= deadline {
            break None;
        }
        thread::sleep(DEADLINE_POLL);
    };

    match status {
        Some(status) => Ok(CommandOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout: join_reader(stdout),
            stderr: join_reader(stderr),
        }),
        None => {
            child.kill()?;
            child.wait()?;
            let seconds = timeout.as_secs();
            log::error!(target: "conditions", "Command timed out after {seconds} seconds: '{cmd}'");
            Ok(CommandOutput {
                exit_code: -1,
                stdout: join_reader(stdout),
                stderr: format!("Command timed out after {seconds} seconds"),
            })
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    reader: Option<R>,
) -> Option<thread::JoinHandle<String>> {
    reader.map(|mut reader| {
        thread::spawn(move || {
            let mut buf = String::new();
            let _ = reader.read_to_string(&mut buf);
            buf
        })
    })
}

fn join_reader(handle: Option<thread::JoinHandle<String>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}
