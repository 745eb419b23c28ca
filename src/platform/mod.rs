//! Platform process operations.
//!
//! Everything that differs between operating systems - listing processes,
//! delivering signals, splitting command strings - sits behind
//! [`PlatformOps`]. The implementation is chosen once when a monitor is
//! built rather than branched on per call.

#[cfg(unix)]
pub mod unix;
#[cfg(windows)]
pub mod windows;

use crate::error::Result;
use crate::signal::Signal;
use crate::tree::ProcessRecord;
use std::sync::Arc;

/// Operating system process primitives used by the supervisor.
pub trait PlatformOps: Send + Sync {
    /// Enumerate every process visible to the current user.
    fn list_processes(&self) -> Result<Vec<ProcessRecord>>;

    /// Deliver `signal` to `pid`.
    ///
    /// Returns [`Error::NoSuchProcess`](crate::Error::NoSuchProcess) when the
    /// process is already gone and
    /// [`Error::PermissionDenied`](crate::Error::PermissionDenied) when it
    /// belongs to someone else.
    fn signal(&self, pid: u32, signal: Signal) -> Result<()>;

    /// Whether a process with this PID currently exists and can be signalled.
    fn is_alive(&self, pid: u32) -> bool;

    /// Split a command string into the program and its leading arguments.
    ///
    /// `args` are appended after any arguments embedded in `command`.
    /// Returns `None` when the command string is malformed.
    fn parse_command(&self, command: &str, args: &[String]) -> Option<(String, Vec<String>)>;

    /// Short name for logging.
    fn name(&self) -> &'static str;
}

/// Platform operations for the host operating system.
pub fn default_platform() -> Arc<dyn PlatformOps> {
    #[cfg(unix)]
    {
        Arc::new(unix::UnixPlatform)
    }
    #[cfg(windows)]
    {
        Arc::new(windows::WindowsPlatform)
    }
}
