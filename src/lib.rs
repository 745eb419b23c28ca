//! Respawn - keep a child process alive.
//!
//! This crate supervises a single child process per [`Monitor`] and restarts
//! it according to a restart policy:
//!
//! - Spawning scripts or commands with a merged environment and working directory
//! - Restart limits (`max`) and spin detection (`min_uptime`)
//! - Delayed restarts for spinning children (`spin_sleep_time`)
//! - Killing the child together with its direct children
//! - Optional escalation to `SIGKILL` after a grace period
//! - A newline-delimited JSON message channel to the child
//! - Cleanup of stale processes left over from an earlier run
//!
//! # Architecture
//!
//! - **Monitor**: handle to a task that owns the state of one job and
//!   publishes [`MonitorEvent`]s on a broadcast channel; piped child output
//!   goes out as [`OutputLine`]s on a second channel
//! - **Policy**: pure function deciding what happens after each exit
//! - **ProcessTree**: process listing, signal delivery and liveness checks,
//!   backed by a per-OS [`PlatformOps`] implementation
//! - **Spawner**: turns a resolved [`ProcessSpec`] into a running child
//!
//! # Example
//!
//! ```no_run
//! use respawn::{MonitorEvent, MonitorOptions, Target};
//! use std::time::Duration;
//! use tokio::sync::broadcast::error::RecvError;
//!
//! #[tokio::main]
//! async fn main() -> respawn::Result<()> {
//!     let options = MonitorOptions::default()
//!         .with_max(5)
//!         .with_min_uptime(Duration::from_secs(1));
//!
//!     let (_monitor, mut events) = respawn::start(Target::command(["node", "server.js"]), options)?;
//!
//!     loop {
//!         match events.recv().await {
//!             Ok(MonitorEvent::Exit { .. }) | Err(RecvError::Closed) => break,
//!             Ok(_) | Err(RecvError::Lagged(_)) => continue,
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod ipc;
pub mod logging;
pub mod monitor;
pub mod options;
pub mod platform;
pub mod policy;
pub mod signal;
pub mod spawn;
pub mod tree;

// Re-export main types
pub use error::{Error, Result};
pub use ipc::IpcChannel;
pub use monitor::{Monitor, MonitorEvent, MonitorState, OutputLine, ProcessData};
pub use options::{MonitorOptions, StdioConfig, StreamMode, Target};
pub use platform::{default_platform, PlatformOps};
pub use policy::{ExitContext, RestartDecision};
pub use signal::Signal;
pub use spawn::{CommandSpawner, ProcessSpec, SpawnedChild, Spawner};
pub use tree::{check_process, kill_by_pid, ProcessRecord, ProcessTree};

use tokio::sync::broadcast;

/// Create a monitor, subscribe to its events and start it.
///
/// The receiver is subscribed before the child is spawned, so it observes
/// the initial `Start` event.
pub fn start(
    target: Target,
    options: MonitorOptions,
) -> Result<(Monitor, broadcast::Receiver<MonitorEvent>)> {
    let monitor = Monitor::new(target, options)?;
    let events = monitor.subscribe();
    monitor.start();
    Ok((monitor, events))
}
