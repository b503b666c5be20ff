use std::fmt;
use std::io;

use genlink_supervisor::{SendError, StartError};

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const HEALTH_CHECK_FAILED: i32 = 30;
pub const USAGE: i32 = 64;
pub const UNAVAILABLE: i32 = 69;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;
pub const INTERRUPTED: i32 = 130;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => FAILURE,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound => UNAVAILABLE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn start_error(context: &str, err: StartError) -> CliError {
    match err {
        StartError::Spawn { source, .. } => {
            let inner = io_error(context, source);
            CliError::new(inner.code, format!("{context}: failed to spawn worker"))
        }
        StartError::AlreadyStarted => CliError::new(INTERNAL, format!("{context}: {err}")),
    }
}

pub fn send_error(context: &str, err: SendError) -> CliError {
    let code = match &err {
        SendError::Timeout { .. } => TIMEOUT,
        SendError::Rpc { .. } => FAILURE,
        SendError::NotRunning => INTERRUPTED,
        SendError::QueueFull { .. } => UNAVAILABLE,
        SendError::ProcessCrashed => FAILURE,
    };
    CliError::new(code, format!("{context}: {err}"))
}
