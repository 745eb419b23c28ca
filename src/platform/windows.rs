//! Windows process operations backed by `wmic` and `taskkill`.

use super::PlatformOps;
use crate::error::{Error, Result};
use crate::signal::Signal;
use crate::spawn::parse_command_windows;
use crate::tree::{parse_csv_listing, ProcessRecord};
use std::process::{Command, Stdio};
use tracing::debug;

/// Process operations for Windows.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsPlatform;

impl PlatformOps for WindowsPlatform {
    fn list_processes(&self) -> Result<Vec<ProcessRecord>> {
        let output = Command::new("wmic.exe")
            .args([
                "PROCESS",
                "GET",
                "Name,ProcessId,ParentProcessId,Status",
                "/FORMAT:CSV",
            ])
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::ListingFailed(format!("wmic: {}", e)))?;

        if !output.status.success() {
            return Err(Error::ListingFailed(format!(
                "wmic exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        parse_csv_listing(&String::from_utf8_lossy(&output.stdout))
    }

    fn signal(&self, pid: u32, sig: Signal) -> Result<()> {
        let pid_arg = pid.to_string();
        let mut cmd = Command::new("taskkill");
        cmd.args(["/PID", pid_arg.as_str()]);
        if sig.is_forceful() {
            cmd.arg("/F");
        }

        let output = cmd
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::SignalError(format!("taskkill: {}", e)))?;

        if output.status.success() {
            debug!(pid = pid, signal = %sig, "Sent signal to process");
            return Ok(());
        }

        // taskkill exits 128 when the PID does not exist
        match output.status.code() {
            Some(128) => Err(Error::NoSuchProcess(pid)),
            Some(1) => Err(Error::PermissionDenied(pid)),
            _ => Err(Error::SignalError(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            )),
        }
    }

    fn is_alive(&self, pid: u32) -> bool {
        self.list_processes()
            .map(|records| records.iter().any(|r| r.pid == pid))
            .unwrap_or(false)
    }

    fn parse_command(&self, command: &str, args: &[String]) -> Option<(String, Vec<String>)> {
        parse_command_windows(command, args)
    }

    fn name(&self) -> &'static str {
        "windows"
    }
}
