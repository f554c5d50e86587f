use std::io::{self, Read};
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::app::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Executes one external command to completion.
///
/// A non-zero exit is an `Ok` value. `Err` is reserved for spawn, poll and
/// timeout failures, classified as `ERR_NOT_FOUND`, `ERR_TIMEOUT` or `ERR_SYSTEM`.
pub trait ProcessRunner: Send + Sync {
    fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
        trace_id: &str,
    ) -> Result<CommandOutput, AppError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
        trace_id: &str,
    ) -> Result<CommandOutput, AppError> {
        run_command_with_timeout(program, args, timeout, trace_id)
    }
}

pub fn run_command_with_timeout(
    program: &str,
    args: &[String],
    timeout: Duration,
    trace_id: &str,
) -> Result<CommandOutput, AppError> {
    debug!(trace_id = %trace_id, program = %program, args = ?args, "spawning command");
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| spawn_error(program, &err, trace_id))?;

    // Drain stdout/stderr in parallel; otherwise, a chatty child process can block once the pipe
    // buffer fills, and we will incorrectly hit the timeout.
    let (stdout_handle, stderr_handle) = match drain_pipes(&mut child) {
        Some(handles) => handles,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(AppError::system("Failed to capture command output", trace_id));
        }
    };

    let start = Instant::now();
    let exit_code = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status.code(),
            Ok(None) => {
                if start.elapsed() > timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = stdout_handle.join();
                    let _ = stderr_handle.join();
                    return Err(AppError::timed_out(
                        format!("Command timed out after {} seconds.", timeout.as_secs()),
                        trace_id,
                    ));
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(err) => {
                let _ = child.kill();
                let _ = stdout_handle.join();
                let _ = stderr_handle.join();
                return Err(AppError::system(
                    format!("Failed to poll command: {err}"),
                    trace_id,
                ));
            }
        }
    };

    let stdout_bytes = stdout_handle.join().unwrap_or_default();
    let stderr_bytes = stderr_handle.join().unwrap_or_default();

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&stdout_bytes).to_string(),
        stderr: String::from_utf8_lossy(&stderr_bytes).to_string(),
        exit_code,
    })
}

fn spawn_error(program: &str, err: &io::Error, trace_id: &str) -> AppError {
    if err.kind() == io::ErrorKind::NotFound {
        AppError::not_found(
            format!("'{program}' was not found. Check that it is installed and on PATH."),
            trace_id,
        )
    } else {
        AppError::system(format!("Failed to spawn command: {err}"), trace_id)
    }
}

type PipeHandle = JoinHandle<Vec<u8>>;

fn drain_pipes(child: &mut Child) -> Option<(PipeHandle, PipeHandle)> {
    let stdout: ChildStdout = child.stdout.take()?;
    let stderr: ChildStderr = child.stderr.take()?;
    Some((
        std::thread::spawn(move || read_to_end(stdout)),
        std::thread::spawn(move || read_to_end(stderr)),
    ))
}

fn read_to_end(mut reader: impl Read) -> Vec<u8> {
    let mut buffer = Vec::<u8>::new();
    let mut temp = [0u8; 4096];
    loop {
        match reader.read(&mut temp) {
            Ok(0) => break,
            Ok(count) => buffer.extend_from_slice(&temp[..count]),
            Err(_) => break,
        }
    }
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(script: &str) -> (String, Vec<String>) {
        if cfg!(windows) {
            ("cmd.exe".to_string(), vec!["/C".to_string(), script.to_string()])
        } else {
            ("sh".to_string(), vec!["-c".to_string(), script.to_string()])
        }
    }

    #[test]
    fn run_command_with_timeout_does_not_deadlock_on_large_stdout() {
        // If stdout/stderr are piped but not drained, the child blocks once the pipe buffer
        // fills and an otherwise-fast command "hangs" until the timeout.
        let (program, args) = if cfg!(windows) {
            shell("for /L %i in (1,1,100000) do @echo 1234567890")
        } else {
            shell("i=0; while [ $i -lt 100000 ]; do echo 1234567890; i=$((i+1)); done")
        };

        let output = run_command_with_timeout(&program, &args, Duration::from_secs(10), "large")
            .expect("expected large-output command to complete without timing out");

        assert_eq!(output.exit_code, Some(0));
        assert!(output.stdout.len() >= 1_000_000);
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_is_returned_not_raised() {
        let (program, args) = shell("echo oops >&2; exit 3");
        let output = run_command_with_timeout(&program, &args, Duration::from_secs(5), "exit")
            .expect("non-zero exit is a normal result");
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.succeeded());
        assert_eq!(output.stderr.trim(), "oops");
    }

    #[cfg(unix)]
    #[test]
    fn slow_command_times_out() {
        let (program, args) = shell("sleep 5");
        let err = run_command_with_timeout(&program, &args, Duration::from_millis(200), "slow")
            .expect_err("expected timeout");
        assert_eq!(err.code, "ERR_TIMEOUT");
        assert_eq!(err.trace_id, "slow");
    }

    #[test]
    fn missing_program_is_not_found() {
        let err = run_command_with_timeout(
            "/this/path/should/not/exist/adb",
            &[],
            Duration::from_secs(1),
            "missing",
        )
        .expect_err("expected spawn failure");
        assert_eq!(err.code, "ERR_NOT_FOUND");
    }
}
