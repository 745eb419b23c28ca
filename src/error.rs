//! Error types for the respawn supervisor.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for supervisor operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while supervising a process.
#[derive(Error, Debug)]
pub enum Error {
    /// `start()` called on a monitor whose child is alive
    #[error("Cannot start process that is already running.")]
    AlreadyRunning,

    /// `stop()`, `kill()` or `send()` called without a live child
    #[error("Cannot {action} process that is not running.")]
    NotRunning { action: &'static str },

    /// Target script does not exist
    #[error("Target script does not exist: {}", .0.display())]
    ScriptNotFound(PathBuf),

    /// Command could not be resolved to an executable
    #[error("Executable not found: {command}: {reason}")]
    ExecutableNotFound { command: String, reason: String },

    /// Command string rejected by the command parser
    #[error("Invalid command: {0:?}")]
    InvalidCommand(String),

    /// The child was not spawned with a message channel
    #[error("Process does not have a message channel")]
    IpcUnavailable,

    /// Process spawn error
    #[error("Failed to spawn process: {0}")]
    SpawnFailed(String),

    /// Signalled process does not exist
    #[error("No such process: PID {0}")]
    NoSuchProcess(u32),

    /// Not allowed to signal the process
    #[error("Permission denied signalling PID {0}")]
    PermissionDenied(u32),

    /// Signal error
    #[error("Signal error: {0}")]
    SignalError(String),

    /// Unknown signal name
    #[error("Invalid signal: {0}")]
    InvalidSignal(String),

    /// Process listing command failed
    #[error("Process listing failed: {0}")]
    ListingFailed(String),

    /// Process listing output could not be parsed
    #[error("Unparseable process listing: {0}")]
    ListingParse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Monitor constructed outside of a tokio runtime
    #[error("No tokio runtime available")]
    NoRuntime,

    /// The supervising task is gone
    #[error("Monitor task has shut down")]
    MonitorClosed,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Nix error
    #[cfg(unix)]
    #[error("System error: {0}")]
    Nix(#[from] nix::Error),
}

impl Error {
    /// Whether this error is an expected race with an exiting process.
    pub fn is_no_such_process(&self) -> bool {
        matches!(self, Error::NoSuchProcess(_))
    }
}
