//! Unix process operations backed by `ps` and `kill(2)`.

use super::PlatformOps;
use crate::error::{Error, Result};
use crate::signal::Signal;
use crate::spawn::parse_command_unix;
use crate::tree::{parse_listing, ProcessRecord};
use nix::errno::Errno;
use nix::sys::signal;
use nix::unistd::Pid;
use std::process::{Command, Stdio};
use tracing::debug;

/// Process operations for Linux, macOS and the BSDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnixPlatform;

impl UnixPlatform {
    fn to_pid(pid: u32) -> Result<Pid> {
        // PID 0 and negative values address process groups
        if pid == 0 || pid > i32::MAX as u32 {
            return Err(Error::SignalError(format!("refusing to signal PID {}", pid)));
        }
        Ok(Pid::from_raw(pid as i32))
    }
}

impl PlatformOps for UnixPlatform {
    fn list_processes(&self) -> Result<Vec<ProcessRecord>> {
        let output = Command::new("ps")
            .args(["-A", "-ww", "-o", "ppid,pid,stat,args"])
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::ListingFailed(format!("ps: {}", e)))?;

        if !output.status.success() {
            return Err(Error::ListingFailed(format!(
                "ps exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let records = parse_listing(&String::from_utf8_lossy(&output.stdout))?;
        debug!(count = records.len(), "Listed processes");
        Ok(records)
    }

    fn signal(&self, pid: u32, sig: Signal) -> Result<()> {
        match signal::kill(Self::to_pid(pid)?, Some(sig.into())) {
            Ok(()) => {
                debug!(pid = pid, signal = %sig, "Sent signal to process");
                Ok(())
            }
            Err(Errno::ESRCH) => Err(Error::NoSuchProcess(pid)),
            Err(Errno::EPERM) => Err(Error::PermissionDenied(pid)),
            Err(e) => Err(e.into()),
        }
    }

    fn is_alive(&self, pid: u32) -> bool {
        match Self::to_pid(pid) {
            Ok(pid) => signal::kill(pid, None).is_ok(),
            Err(_) => false,
        }
    }

    fn parse_command(&self, command: &str, args: &[String]) -> Option<(String, Vec<String>)> {
        parse_command_unix(command, args)
    }

    fn name(&self) -> &'static str {
        "unix"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lists_own_process() {
        let records = UnixPlatform.list_processes().unwrap();
        let me = std::process::id();
        assert!(records.iter().any(|r| r.pid == me));
    }

    #[test]
    fn test_signal_zero_pid_refused() {
        let result = UnixPlatform.signal(0, Signal::Terminate);
        assert!(matches!(result, Err(Error::SignalError(_))));
        assert!(!UnixPlatform.is_alive(0));
    }

    #[test]
    fn test_self_is_alive() {
        assert!(UnixPlatform.is_alive(std::process::id()));
    }
}
