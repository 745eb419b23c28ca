//! Process tree discovery and termination.
//!
//! Process listings are produced by a platform command (`ps` on unix,
//! `wmic` on Windows) whose column labels differ. Every listing is parsed
//! into the same [`ProcessRecord`] shape after the headers are normalized
//! onto the canonical `COMMAND`, `PPID`, `PID` and `STAT` fields.
//!
//! Descendant discovery is a single level: only the direct children of a
//! PID are signalled together with it. A child that forked grandchildren
//! before dying will leak them.

use crate::error::{Error, Result};
use crate::platform::{default_platform, PlatformOps};
use crate::signal::Signal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One row of a process listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRecord {
    /// Command line (or executable name where the platform only reports that)
    pub command: String,
    /// Parent process ID
    pub ppid: u32,
    /// Process ID
    pub pid: u32,
    /// Platform state string (`S`, `R+`, `Z`, ...)
    pub stat: String,
}

impl ProcessRecord {
    /// Whether the process has exited but not been reaped.
    pub fn is_zombie(&self) -> bool {
        self.stat.starts_with('Z')
    }
}

/// Canonical listing column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Command,
    Ppid,
    Pid,
    Stat,
    /// A column the supervisor does not use
    Other(String),
}

impl Field {
    pub fn as_str(&self) -> &str {
        match self {
            Field::Command => "COMMAND",
            Field::Ppid => "PPID",
            Field::Pid => "PID",
            Field::Stat => "STAT",
            Field::Other(name) => name,
        }
    }
}

/// Map a platform-specific column label onto the canonical field set.
pub fn normalize_header(label: &str) -> Field {
    match label.trim() {
        // win32 | darwin | linux
        "Name" | "COMM" | "COMMAND" | "ARGS" | "CMD" => Field::Command,
        "ParentProcessId" | "PPID" => Field::Ppid,
        "ProcessId" | "PID" => Field::Pid,
        "Status" | "STAT" | "S" => Field::Stat,
        other => Field::Other(other.to_string()),
    }
}

fn strip_defunct(command: &str) -> String {
    command
        .trim_end()
        .trim_end_matches("<defunct>")
        .trim_end()
        .to_string()
}

fn require_columns(columns: &[Field]) -> Result<()> {
    for required in [Field::Pid, Field::Ppid] {
        if !columns.contains(&required) {
            return Err(Error::ListingParse(format!(
                "missing {} column in header",
                required.as_str()
            )));
        }
    }
    Ok(())
}

/// Build a record from `(field, value)` cells, skipping rows without numeric IDs.
fn build_record<'a>(cells: impl Iterator<Item = (&'a Field, String)>) -> Option<ProcessRecord> {
    let mut command = String::new();
    let mut stat = String::new();
    let mut pid = None;
    let mut ppid = None;

    for (field, value) in cells {
        match field {
            Field::Command => command = strip_defunct(&value),
            Field::Stat => stat = value,
            Field::Pid => pid = value.trim().parse::<u32>().ok(),
            Field::Ppid => ppid = value.trim().parse::<u32>().ok(),
            Field::Other(_) => {}
        }
    }

    Some(ProcessRecord {
        command,
        ppid: ppid?,
        pid: pid?,
        stat,
    })
}

/// Parse whitespace-aligned `ps` style output.
///
/// The last column swallows the rest of the line, so it may contain spaces.
pub fn parse_listing(output: &str) -> Result<Vec<ProcessRecord>> {
    let mut lines = output.lines().filter(|line| !line.trim().is_empty());
    let header = lines
        .next()
        .ok_or_else(|| Error::ListingParse("empty output".to_string()))?;

    let columns: Vec<Field> = header.split_whitespace().map(normalize_header).collect();
    require_columns(&columns)?;
    let last = columns.len() - 1;

    let mut records = Vec::new();
    for line in lines {
        let items: Vec<&str> = line.split_whitespace().collect();
        if items.len() < last {
            debug!(line = %line, "Skipping short listing row");
            continue;
        }

        let cells = columns.iter().enumerate().map(|(index, field)| {
            let value = if index == last {
                items.get(index..).map(|rest| rest.join(" ")).unwrap_or_default()
            } else {
                items[index].to_string()
            };
            (field, value)
        });

        match build_record(cells) {
            Some(record) => records.push(record),
            None => debug!(line = %line, "Skipping unparseable listing row"),
        }
    }

    Ok(records)
}

/// Parse comma separated listing output (`wmic ... /FORMAT:CSV`).
pub fn parse_csv_listing(output: &str) -> Result<Vec<ProcessRecord>> {
    let mut lines = output
        .lines()
        .map(|line| line.trim_matches(|c| c == '\r' || c == '\n'))
        .filter(|line| !line.trim().is_empty());
    let header = lines
        .next()
        .ok_or_else(|| Error::ListingParse("empty output".to_string()))?;

    let columns: Vec<Field> = header.split(',').map(normalize_header).collect();
    require_columns(&columns)?;

    let mut records = Vec::new();
    for line in lines {
        let items: Vec<&str> = line.split(',').collect();
        if items.len() != columns.len() {
            debug!(line = %line, "Skipping malformed listing row");
            continue;
        }

        let cells = columns
            .iter()
            .zip(items)
            .map(|(field, value)| (field, value.trim().to_string()));

        if let Some(record) = build_record(cells) {
            records.push(record);
        }
    }

    Ok(records)
}

/// Direct children of `pid` within a listing.
pub fn children_of(records: &[ProcessRecord], pid: u32) -> Vec<ProcessRecord> {
    records
        .iter()
        .filter(|r| r.ppid == pid && r.pid != pid)
        .cloned()
        .collect()
}

/// Process table access for one platform.
#[derive(Clone)]
pub struct ProcessTree {
    platform: Arc<dyn PlatformOps>,
}

impl Default for ProcessTree {
    fn default() -> Self {
        Self::new(default_platform())
    }
}

impl std::fmt::Debug for ProcessTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessTree")
            .field("platform", &self.platform.name())
            .finish()
    }
}

impl ProcessTree {
    /// Create a process tree over the given platform operations.
    pub fn new(platform: Arc<dyn PlatformOps>) -> Self {
        Self { platform }
    }

    /// The platform operations in use.
    pub fn platform(&self) -> &Arc<dyn PlatformOps> {
        &self.platform
    }

    /// All processes visible to the current user.
    pub fn processes(&self) -> Result<Vec<ProcessRecord>> {
        self.platform.list_processes()
    }

    /// Direct children of `pid`.
    pub fn children(&self, pid: u32) -> Result<Vec<ProcessRecord>> {
        Ok(children_of(&self.processes()?, pid))
    }

    /// Signal a single process.
    ///
    /// Returns `Ok(false)` when the process had already exited.
    pub fn signal(&self, pid: u32, signal: Signal) -> Result<bool> {
        match self.platform.signal(pid, signal) {
            Ok(()) => Ok(true),
            Err(e) if e.is_no_such_process() => {
                debug!(pid = pid, signal = %signal, "Process already gone");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Signal `pid` and, when `kill_tree` is set, its direct children.
    ///
    /// Every PID is attempted once; the first hard failure is returned after
    /// all of them were tried. Returns the PIDs that received the signal.
    pub fn kill(&self, pid: u32, kill_tree: bool, signal: Signal) -> Result<Vec<u32>> {
        let mut targets = vec![pid];
        if kill_tree {
            targets.extend(self.children(pid)?.into_iter().map(|r| r.pid));
        }

        let mut signalled = Vec::with_capacity(targets.len());
        let mut first_error = None;

        for target in targets {
            match self.signal(target, signal) {
                Ok(true) => signalled.push(target),
                Ok(false) => {}
                Err(e) => {
                    warn!(pid = target, signal = %signal, error = %e, "Failed to signal process");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(signalled),
        }
    }

    /// Whether `pid` refers to a live process.
    pub fn is_alive(&self, pid: u32) -> bool {
        self.platform.is_alive(pid)
    }

    /// Live processes whose full command line equals `command_line`.
    pub fn find_by_command_line(&self, command_line: &str) -> Result<Vec<ProcessRecord>> {
        let wanted = command_line.trim();
        Ok(self
            .processes()?
            .into_iter()
            .filter(|r| !r.is_zombie() && r.command == wanted)
            .collect())
    }

    /// Kill every process running `command_line`, except those in `exclude`.
    pub fn kill_by_command_line(
        &self,
        command_line: &str,
        exclude: &[u32],
        signal: Signal,
    ) -> Result<Vec<u32>> {
        let mut killed = Vec::new();
        for record in self.find_by_command_line(command_line)? {
            if exclude.contains(&record.pid) {
                continue;
            }
            if self.signal(record.pid, signal)? {
                info!(pid = record.pid, command = %record.command, "Killed duplicate process");
                killed.push(record.pid);
            }
        }
        Ok(killed)
    }
}

/// Check whether a PID is running on the host.
pub fn check_process(pid: u32) -> bool {
    pid != 0 && default_platform().is_alive(pid)
}

/// Signal a PID (and its direct children when `kill_tree` is set) on the host.
pub fn kill_by_pid(pid: u32, kill_tree: bool, signal: Signal) -> Result<Vec<u32>> {
    ProcessTree::default().kill(pid, kill_tree, signal)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINUX_PS: &str = "\
 PPID   PID STAT COMMAND
    0     1 Ss   /sbin/init splash
    1   812 Ssl  /usr/bin/node server.js --port 8080
  812   820 S    sh -c sleep 100
  812   821 Z    [watch] <defunct>
  820   830 S    sleep 100
";

    const DARWIN_PS: &str = "\
COMM              PPID   PID STAT
/sbin/launchd        0     1 Ss
/usr/libexec/Use     1    43 Ss
";

    const WMIC_CSV: &str = "\r\n\
Node,Name,ParentProcessId,ProcessId,Status\r\r\n\
HOST,System Idle Process,0,0,\r\r\n\
HOST,System,0,4,\r\r\n\
HOST,node.exe,4,4604,\r\r\n\
HOST,cmd.exe,4604,4700,\r\r\n";

    #[test]
    fn test_normalize_header() {
        assert_eq!(normalize_header("Name"), Field::Command);
        assert_eq!(normalize_header("COMM"), Field::Command);
        assert_eq!(normalize_header("ParentProcessId"), Field::Ppid);
        assert_eq!(normalize_header("ProcessId"), Field::Pid);
        assert_eq!(normalize_header("Status"), Field::Stat);
        assert_eq!(normalize_header("Node"), Field::Other("Node".to_string()));
        assert_eq!(normalize_header("ParentProcessId").as_str(), "PPID");
    }

    #[test]
    fn test_parse_linux_listing() {
        let records = parse_listing(LINUX_PS).unwrap();
        assert_eq!(records.len(), 5);

        let node = records.iter().find(|r| r.pid == 812).unwrap();
        assert_eq!(node.ppid, 1);
        assert_eq!(node.stat, "Ssl");
        assert_eq!(node.command, "/usr/bin/node server.js --port 8080");
    }

    #[test]
    fn test_defunct_suffix_stripped() {
        let records = parse_listing(LINUX_PS).unwrap();
        let zombie = records.iter().find(|r| r.pid == 821).unwrap();
        assert_eq!(zombie.command, "[watch]");
        assert!(zombie.is_zombie());
    }

    #[test]
    fn test_parse_darwin_listing() {
        let records = parse_listing(DARWIN_PS).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].command, "/usr/libexec/Use");
        assert_eq!(records[1].ppid, 1);
        assert_eq!(records[1].pid, 43);
    }

    #[test]
    fn test_parse_wmic_csv() {
        let records = parse_csv_listing(WMIC_CSV).unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].command, "System Idle Process");
        let node = records.iter().find(|r| r.pid == 4604).unwrap();
        assert_eq!(node.command, "node.exe");
        assert_eq!(node.ppid, 4);
        assert_eq!(node.stat, "");
    }

    #[test]
    fn test_missing_pid_column() {
        let result = parse_listing("COMMAND STAT\nfoo S\n");
        assert!(matches!(result, Err(Error::ListingParse(_))));
        assert!(matches!(parse_listing(""), Err(Error::ListingParse(_))));
    }

    #[test]
    fn test_children_are_single_level() {
        let records = parse_listing(LINUX_PS).unwrap();
        let children: Vec<u32> = children_of(&records, 812).iter().map(|r| r.pid).collect();
        assert_eq!(children, vec![820, 821]);
        // grandchild 830 is not included
        assert!(!children.contains(&830));
    }

    #[test]
    fn test_root_is_not_its_own_child() {
        let records = parse_csv_listing(WMIC_CSV).unwrap();
        let children: Vec<u32> = children_of(&records, 0).iter().map(|r| r.pid).collect();
        assert_eq!(children, vec![4]);
    }
}
