use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::app::adb::runner::{CommandOutput, ProcessRunner};
use crate::app::error::{AppError, ERR_NOT_FOUND, ERR_TIMEOUT};
use crate::app::notify::Notifier;

/// The external tool as the rest of the crate sees it.
///
/// Availability is probed once at construction. Every non-zero exit or
/// non-empty stderr produces exactly one notification before `run` returns.
pub struct Adb {
    program: String,
    runner: Arc<dyn ProcessRunner>,
    notifier: Notifier,
    available: bool,
}

impl Adb {
    /// Runs `<program> version` and remembers whether it worked.
    pub fn probe(
        program: impl Into<String>,
        runner: Arc<dyn ProcessRunner>,
        notifier: Notifier,
        timeout: Duration,
        trace_id: &str,
    ) -> Self {
        let program = program.into();
        notifier.info("Checking for ADB command...");
        let available = match runner.run(&program, &["version".to_string()], timeout, trace_id) {
            Ok(output) if output.succeeded() => true,
            Ok(output) => {
                warn!(trace_id = %trace_id, exit_code = ?output.exit_code, "adb version failed");
                false
            }
            Err(err) => {
                warn!(trace_id = %trace_id, code = %err.code, error = %err.error, "adb probe failed");
                false
            }
        };
        if available {
            notifier.info(format!("'{program}' command found."));
        } else {
            notifier.error(format!(
                "Error: '{program}' command not found. Please ensure Android SDK Platform-Tools \
                 are installed and '{program}' is in your system's PATH."
            ));
        }
        info!(trace_id = %trace_id, program = %program, available, "adb availability probed");
        Self {
            program,
            runner,
            notifier,
            available,
        }
    }

    /// Skips the probe; for callers that already know the answer.
    pub fn with_availability(
        program: impl Into<String>,
        runner: Arc<dyn ProcessRunner>,
        notifier: Notifier,
        available: bool,
    ) -> Self {
        Self {
            program: program.into(),
            runner,
            notifier,
            available,
        }
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn ensure_available(&self, trace_id: &str) -> Result<(), AppError> {
        if self.available {
            return Ok(());
        }
        let message = "ADB is not available. Cannot run command.";
        self.notifier.error(message);
        Err(AppError::tool_unavailable(message, trace_id))
    }

    /// Runs one command. Non-zero exits come back as `Ok` for the caller to branch on.
    pub fn run(
        &self,
        args: &[String],
        timeout: Duration,
        trace_id: &str,
    ) -> Result<CommandOutput, AppError> {
        self.ensure_available(trace_id)?;

        let output = match self.runner.run(&self.program, args, timeout, trace_id) {
            Ok(output) => output,
            Err(err) => {
                warn!(trace_id = %trace_id, code = %err.code, error = %err.error, args = ?args, "adb command failed to run");
                self.notifier.error(match err.code.as_str() {
                    ERR_NOT_FOUND => {
                        "Error: ADB command not found during execution. Check PATH.".to_string()
                    }
                    ERR_TIMEOUT => format!(
                        "Error: ADB command timed out after {} seconds.",
                        timeout.as_secs()
                    ),
                    _ => format!(
                        "An unexpected error occurred while running ADB command: {}",
                        err.error
                    ),
                });
                return Err(err);
            }
        };

        let stderr = output.stderr.trim();
        if !output.succeeded() {
            let detail = if stderr.is_empty() {
                match output.exit_code {
                    Some(code) => format!("ADB command failed with return code {code}."),
                    None => "ADB command was terminated by a signal.".to_string(),
                }
            } else {
                stderr.to_string()
            };
            self.notifier.error(format!("ADB Command Error: {detail}"));
        } else if !stderr.is_empty() {
            self.notifier.warning(format!("ADB Command Warning: {stderr}"));
        }
        Ok(output)
    }

    /// Like `run`, but a non-zero exit becomes `ERR_EXIT_STATUS`. Already notified.
    pub fn run_checked(
        &self,
        args: &[String],
        timeout: Duration,
        trace_id: &str,
    ) -> Result<CommandOutput, AppError> {
        let output = self.run(args, timeout, trace_id)?;
        if output.succeeded() {
            return Ok(output);
        }
        let detail = match output.stderr.trim() {
            "" => format!("exit code {:?}", output.exit_code),
            stderr => stderr.to_string(),
        };
        Err(AppError::exit_status(
            format!("adb {} failed: {detail}", args.join(" ")),
            trace_id,
        ))
    }
}

/// `-s <serial> <rest...>`
pub fn device_args(serial: &str, rest: &[&str]) -> Vec<String> {
    let mut args = Vec::with_capacity(rest.len() + 2);
    args.push("-s".to_string());
    args.push(serial.to_string());
    args.extend(rest.iter().map(|arg| arg.to_string()));
    args
}
