//! Long-lived `adb logcat` stream with a stop/start lifecycle.

use std::collections::VecDeque;
use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::app::adb::client::device_args;
use crate::app::config::LogcatSettings;
use crate::app::error::AppError;
use crate::app::notify::Notifier;

const BATCH_LIMIT: usize = 50;
const EXIT_POLL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, Serialize)]
pub struct LogcatEvent {
    pub serial: String,
    pub lines: Vec<String>,
    pub trace_id: String,
}

pub type LogcatEmitter = Arc<dyn Fn(LogcatEvent) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "serial", rename_all = "lowercase")]
pub enum StreamState {
    Idle,
    Streaming(String),
    Stopping(String),
}

struct LogcatHandle {
    serial: String,
    child: Child,
    stop_flag: Arc<AtomicBool>,
    trace_id: String,
}

enum Slot {
    Idle,
    Streaming(LogcatHandle),
    Stopping(String),
}

/// Bounded line history of one stream. Oldest lines go first.
struct LogBuffer {
    lines: VecDeque<String>,
    max_lines: usize,
}

type SharedBuffer = Arc<Mutex<LogBuffer>>;

impl LogBuffer {
    fn shared(max_lines: usize) -> SharedBuffer {
        Arc::new(Mutex::new(Self {
            lines: VecDeque::new(),
            max_lines,
        }))
    }

    fn push(&mut self, line: String) {
        if self.max_lines == 0 {
            return;
        }
        while self.lines.len() >= self.max_lines {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }
}

/// Spawns `<program> -s <serial> logcat -v <format>` with both pipes captured.
pub fn spawn_logcat(
    program: &str,
    serial: &str,
    format: &str,
    trace_id: &str,
) -> Result<Child, AppError> {
    let args = device_args(serial, &["logcat", "-v", format]);
    Command::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => {
                AppError::not_found(format!("Failed to start logcat: {err}"), trace_id)
            }
            _ => AppError::system(format!("Failed to start logcat: {err}"), trace_id),
        })
}

/// What each reader thread of one stream shares.
struct ReaderContext<'a> {
    serial: &'a str,
    buffer: &'a SharedBuffer,
    stop_flag: &'a Arc<AtomicBool>,
    emitter: &'a LogcatEmitter,
    trace_id: &'a str,
}

/// At most one stream at a time. `start` and `stop` are serialized, so
/// overlapping calls cannot leave two children running. Each stream writes to
/// its own buffer, so a reader still draining an old pipe never reaches the
/// buffer of its successor.
pub struct LogcatSession {
    slot: Mutex<Slot>,
    lifecycle: Mutex<()>,
    buffer: Mutex<SharedBuffer>,
    max_buffer_lines: usize,
    stop_grace: Duration,
    notifier: Notifier,
}

impl LogcatSession {
    pub fn new(settings: &LogcatSettings, notifier: Notifier) -> Self {
        Self {
            slot: Mutex::new(Slot::Idle),
            lifecycle: Mutex::new(()),
            buffer: Mutex::new(LogBuffer::shared(settings.max_buffer_lines)),
            max_buffer_lines: settings.max_buffer_lines,
            stop_grace: Duration::from_millis(settings.stop_grace_ms),
            notifier,
        }
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn current_buffer(&self) -> SharedBuffer {
        let buffer = self.buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&*buffer)
    }

    /// Current state. A child that exited on its own is reaped here.
    pub fn state(&self) -> StreamState {
        let mut slot = self.slot();
        let finished = match &mut *slot {
            Slot::Idle => return StreamState::Idle,
            Slot::Stopping(serial) => return StreamState::Stopping(serial.clone()),
            Slot::Streaming(handle) => match handle.child.try_wait() {
                Ok(Some(status)) => Some((handle.serial.clone(), status)),
                _ => None,
            },
        };
        match finished {
            Some((serial, status)) => {
                info!(serial = %serial, status = %status, "logcat exited on its own");
                *slot = Slot::Idle;
                drop(slot);
                self.notifier.info(format!("Log stream for {serial} ended."));
                StreamState::Idle
            }
            None => match &*slot {
                Slot::Streaming(handle) => StreamState::Streaming(handle.serial.clone()),
                _ => StreamState::Idle,
            },
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.state(), StreamState::Streaming(_))
    }

    /// Starts a stream for `serial`. A running stream is fully stopped first.
    /// The stream gets a fresh buffer so a later `save` covers this stream only.
    pub fn start(
        &self,
        serial: &str,
        emitter: LogcatEmitter,
        trace_id: &str,
        spawn: impl FnOnce(&str, &str) -> Result<Child, AppError>,
    ) -> Result<(), AppError> {
        if serial.trim().is_empty() {
            return Err(AppError::validation("serial is required", trace_id));
        }
        let _lifecycle = self
            .lifecycle
            .lock()
            .map_err(|_| AppError::system("Logcat lifecycle locked", trace_id))?;
        self.stop_locked();

        let mut child = spawn(serial, trace_id).inspect_err(|err| {
            self.notifier
                .error(format!("Failed to start log stream for {serial}: {}", err.error));
        })?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (Some(stdout), Some(stderr)) = (stdout, stderr) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(AppError::system("Failed to capture logcat output", trace_id));
        };

        let buffer = LogBuffer::shared(self.max_buffer_lines);
        *self.buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::clone(&buffer);

        let stop_flag = Arc::new(AtomicBool::new(false));
        let stream = ReaderContext {
            serial,
            buffer: &buffer,
            stop_flag: &stop_flag,
            emitter: &emitter,
            trace_id,
        };
        Self::spawn_reader(stdout, "", &stream);
        Self::spawn_reader(stderr, "STDERR: ", &stream);

        *self.slot() = Slot::Streaming(LogcatHandle {
            serial: serial.to_string(),
            child,
            stop_flag,
            trace_id: trace_id.to_string(),
        });
        info!(trace_id = %trace_id, serial = %serial, "logcat started");
        self.notifier
            .info(format!("Log stream started for {serial}."));
        Ok(())
    }

    fn spawn_reader(pipe: impl Read + Send + 'static, prefix: &'static str, stream: &ReaderContext<'_>) {
        let stop_flag = Arc::clone(stream.stop_flag);
        let emitter = Arc::clone(stream.emitter);
        let buffer = Arc::clone(stream.buffer);
        let serial = stream.serial.to_string();
        let trace_id = stream.trace_id.to_string();
        thread::spawn(move || {
            let mut reader = BufReader::new(pipe);
            let mut raw = Vec::new();
            let mut pending: Vec<String> = Vec::new();
            loop {
                raw.clear();
                match reader.read_until(b'\n', &mut raw) {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!(trace_id = %trace_id, error = %err, "failed to read logcat output");
                        break;
                    }
                }
                if stop_flag.load(Ordering::Relaxed) {
                    break;
                }
                let text = String::from_utf8_lossy(&raw);
                let line = format!("{prefix}{}", text.trim_end_matches(['\n', '\r']));
                if let Ok(mut buffer) = buffer.lock() {
                    buffer.push(line.clone());
                }
                pending.push(line);
                // Flush once the pipe has nothing more buffered, so bursts go out together.
                if pending.len() >= BATCH_LIMIT || reader.buffer().is_empty() {
                    (emitter)(LogcatEvent {
                        serial: serial.clone(),
                        lines: std::mem::take(&mut pending),
                        trace_id: trace_id.clone(),
                    });
                }
            }
            if !pending.is_empty() {
                (emitter)(LogcatEvent {
                    serial,
                    lines: pending,
                    trace_id,
                });
            }
        });
    }

    /// Stops the running stream. `Ok(false)` when nothing was running.
    pub fn stop(&self, trace_id: &str) -> Result<bool, AppError> {
        let _lifecycle = self
            .lifecycle
            .lock()
            .map_err(|_| AppError::system("Logcat lifecycle locked", trace_id))?;
        Ok(self.stop_locked())
    }

    /// Caller holds the lifecycle lock.
    fn stop_locked(&self) -> bool {
        let handle = {
            let mut slot = self.slot();
            match std::mem::replace(&mut *slot, Slot::Idle) {
                Slot::Streaming(handle) => {
                    *slot = Slot::Stopping(handle.serial.clone());
                    handle
                }
                other => {
                    *slot = other;
                    return false;
                }
            }
        };
        let LogcatHandle {
            serial,
            mut child,
            stop_flag,
            trace_id,
        } = handle;

        stop_flag.store(true, Ordering::Relaxed);
        if let Ok(None) = child.try_wait() {
            request_termination(&mut child);
            if !wait_for_exit(&mut child, self.stop_grace) {
                warn!(trace_id = %trace_id, serial = %serial, "logcat ignored termination, killing");
                let _ = child.kill();
            }
        }
        let _ = child.wait();

        *self.slot() = Slot::Idle;
        info!(trace_id = %trace_id, serial = %serial, "logcat stopped");
        self.notifier.info(format!("Log stream stopped for {serial}."));
        true
    }

    /// Accumulated lines of the current or last stream, newline-terminated.
    pub fn contents(&self) -> String {
        let current = self.current_buffer();
        let buffer = current.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut text = String::new();
        for line in &buffer.lines {
            text.push_str(line);
            text.push('\n');
        }
        text
    }

    /// Writes `contents()` to `path` unchanged and returns the byte count.
    pub fn save(&self, path: &Path, trace_id: &str) -> Result<usize, AppError> {
        let text = self.contents();
        fs::write(path, text.as_bytes()).map_err(|err| {
            let message = format!("Failed to save log to {}: {err}", path.display());
            self.notifier.error(&message);
            AppError::system(message, trace_id)
        })?;
        self.notifier
            .info(format!("Log saved to {}.", path.display()));
        Ok(text.len())
    }
}

impl Drop for LogcatSession {
    fn drop(&mut self) {
        self.stop_locked();
    }
}

#[cfg(unix)]
fn request_termination(child: &mut Child) {
    let Ok(pid) = libc::pid_t::try_from(child.id()) else {
        let _ = child.kill();
        return;
    };
    // SAFETY: pid belongs to a child we have not reaped yet.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn request_termination(child: &mut Child) {
    let _ = child.kill();
}

fn wait_for_exit(child: &mut Child, grace: Duration) -> bool {
    let deadline = Instant::now() + grace;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return true,
            Ok(None) if Instant::now() < deadline => thread::sleep(EXIT_POLL),
            _ => return false,
        }
    }
}
