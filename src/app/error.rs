use serde::Serialize;
use std::fmt;

pub const ERR_TOOL_UNAVAILABLE: &str = "ERR_TOOL_UNAVAILABLE";
pub const ERR_VALIDATION: &str = "ERR_VALIDATION";
pub const ERR_NOT_FOUND: &str = "ERR_NOT_FOUND";
pub const ERR_TIMEOUT: &str = "ERR_TIMEOUT";
pub const ERR_SYSTEM: &str = "ERR_SYSTEM";
pub const ERR_EXIT_STATUS: &str = "ERR_EXIT_STATUS";
pub const ERR_COMMAND_FAILED: &str = "ERR_COMMAND_FAILED";
pub const ERR_CONNECTION_REFUSED: &str = "ERR_CONNECTION_REFUSED";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AppError {
    pub error: String,
    pub code: String,
    pub trace_id: String,
}

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code: code.into(),
            trace_id: trace_id.into(),
        }
    }

    /// The external tool was found missing by the startup probe.
    pub fn tool_unavailable(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_TOOL_UNAVAILABLE, message, trace_id)
    }

    /// Local argument validation; never reaches a subprocess.
    pub fn validation(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_VALIDATION, message, trace_id)
    }

    pub fn not_found(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_NOT_FOUND, message, trace_id)
    }

    pub fn timed_out(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_TIMEOUT, message, trace_id)
    }

    pub fn system(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_SYSTEM, message, trace_id)
    }

    pub fn exit_status(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_EXIT_STATUS, message, trace_id)
    }

    /// The command ran, but its output says the operation did not happen.
    pub fn command_failed(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_COMMAND_FAILED, message, trace_id)
    }

    pub fn connection_refused(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_CONNECTION_REFUSED, message, trace_id)
    }

    /// True for failures raised while spawning or supervising the subprocess.
    pub fn is_process_failure(&self) -> bool {
        matches!(self.code.as_str(), ERR_NOT_FOUND | ERR_TIMEOUT | ERR_SYSTEM)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.error, self.code)
    }
}

impl std::error::Error for AppError {}
