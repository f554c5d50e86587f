use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type NotifyFn = Arc<dyn Fn(&str, Severity) + Send + Sync>;

/// Hands human-readable progress to whatever owns the screen.
///
/// Every message is mirrored to `tracing`. With a sink attached the mirror is
/// at `debug`, since the sink already shows it; a silent notifier logs at the
/// matching level instead. A callback that panics is contained here: the panic
/// is logged and the calling operation carries on.
#[derive(Clone)]
pub struct Notifier {
    sink: Option<NotifyFn>,
}

impl Notifier {
    pub fn new(sink: NotifyFn) -> Self {
        Self { sink: Some(sink) }
    }

    pub fn from_fn(sink: impl Fn(&str, Severity) + Send + Sync + 'static) -> Self {
        Self::new(Arc::new(sink))
    }

    /// Logs through `tracing` only.
    pub fn silent() -> Self {
        Self { sink: None }
    }

    pub fn notify(&self, message: &str, severity: Severity) {
        let Some(sink) = &self.sink else {
            match severity {
                Severity::Info => info!(notification = %message),
                Severity::Warning => warn!(notification = %message),
                Severity::Error => error!(notification = %message),
            }
            return;
        };
        debug!(severity = %severity, notification = %message);
        if catch_unwind(AssertUnwindSafe(|| sink(message, severity))).is_err() {
            error!(
                severity = %severity,
                notification = %message,
                "notification sink panicked; message dropped"
            );
        }
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.notify(message.as_ref(), Severity::Info);
    }

    pub fn warning(&self, message: impl AsRef<str>) {
        self.notify(message.as_ref(), Severity::Warning);
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.notify(message.as_ref(), Severity::Error);
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("has_sink", &self.sink.is_some())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingSink;
    use super::*;
    use std::io;
    use std::sync::Mutex;

    #[test]
    fn forwards_message_and_severity() {
        let sink = RecordingSink::default();
        let notifier = sink.notifier();
        notifier.info("Searching for devices...");
        notifier.error("adb not found");
        assert_eq!(
            sink.messages(),
            vec![
                ("Searching for devices...".to_string(), Severity::Info),
                ("adb not found".to_string(), Severity::Error),
            ]
        );
    }

    #[test]
    fn panicking_sink_does_not_abort_caller() {
        let notifier = Notifier::from_fn(|_message, _severity| panic!("ui gone"));
        notifier.warning("still running");
        notifier.info("and again");
    }

    #[test]
    fn silent_notifier_accepts_messages() {
        Notifier::silent().error("nobody listening");
    }

    #[derive(Clone, Default)]
    struct CapturedLog(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().expect("log lock").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLog {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().expect("log lock")).into_owned()
        }
    }

    fn log_at_info(f: impl FnOnce()) -> String {
        let captured = CapturedLog::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        captured.text()
    }

    #[test]
    fn sink_messages_are_shown_once_at_default_level() {
        let sink = RecordingSink::default();
        let notifier = sink.notifier();
        let log = log_at_info(|| {
            notifier.info("Searching for devices...");
            notifier.warning("Found 2 device(s) with parse warnings");
        });
        assert_eq!(sink.messages().len(), 2);
        assert!(!log.contains("Searching for devices..."), "log: {log}");
        assert!(!log.contains("parse warnings"), "log: {log}");
    }

    #[test]
    fn silent_notifier_logs_at_matching_level() {
        let log = log_at_info(|| Notifier::silent().warning("adb not found"));
        assert!(log.contains("WARN"), "log: {log}");
        assert!(log.contains("adb not found"), "log: {log}");
    }
}
