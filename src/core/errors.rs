/*!
 * Error Types
 * Centralized error handling with thiserror, miette, and serde support
 */

use miette::Diagnostic;
use nix::errno::Errno;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while constructing awaiters, registering waits, or calling
/// into the native layer
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum AwaitError {
    #[error("Unsupported operation: {0}")]
    #[diagnostic(
        code(os_await::unsupported_operation),
        help("Awaiting a process requires a local, running process spawned with exit events enabled.")
    )]
    UnsupportedOperation(String),

    #[error("OS call failed ({code}): {message}")]
    #[diagnostic(
        code(os_await::os_failure),
        help("A native call failed. The code is the platform errno value.")
    )]
    OsFailure { code: i32, message: String },

    #[error("Usage error: {0}")]
    #[diagnostic(
        code(os_await::usage),
        help("Check completion before reading a result, and register at most one continuation per awaiter.")
    )]
    Usage(String),

    #[error("Process {0} was closed before it exited")]
    #[diagnostic(
        code(os_await::process_closed),
        help("The process object was closed while a wait was pending.")
    )]
    ProcessClosed(u32),

    #[error("Wait pool has been shut down")]
    #[diagnostic(
        code(os_await::pool_shutdown),
        help("Register waits on a running pool, or use WaitPool::global().")
    )]
    PoolShutdown,
}

impl AwaitError {
    /// Create an OS failure from a raw errno value
    pub fn os(code: i32) -> Self {
        AwaitError::OsFailure {
            code,
            message: Errno::from_raw(code).desc().to_string(),
        }
    }

    /// Platform error code, if this is an OS failure
    pub fn os_code(&self) -> Option<i32> {
        match self {
            AwaitError::OsFailure { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<std::io::Error> for AwaitError {
    fn from(err: std::io::Error) -> Self {
        AwaitError::OsFailure {
            code: err.raw_os_error().unwrap_or(0),
            message: err.to_string(),
        }
    }
}

impl From<Errno> for AwaitError {
    fn from(errno: Errno) -> Self {
        AwaitError::OsFailure {
            code: errno as i32,
            message: errno.desc().to_string(),
        }
    }
}

/// Result type for awaiter and wait-pool operations
pub type AwaitResult<T> = std::result::Result<T, AwaitError>;
