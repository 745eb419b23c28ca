//! Supervisor state machine.
//!
//! A [`Monitor`] is a handle to a task that owns all runtime state of one
//! supervised job. Calls on the handle are queued to that task and never
//! fail synchronously: misuse (double start, stopping a stopped job) and
//! OS failures are published as [`MonitorEvent::Error`] on the event stream.
//!
//! ```text
//! Idle -> Starting -> Running -> Exited
//!                       |  ^
//!                       v  |
//!                    Restarting        (stop) -> Stopped
//! ```

use crate::error::{Error, Result};
use crate::ipc::{IpcReceiver, IpcSender};
use crate::options::{MonitorOptions, Target};
use crate::platform::{default_platform, PlatformOps};
use crate::policy::{self, ExitContext, RestartDecision};
use crate::signal::Signal;
use crate::spawn::{CommandSpawner, ProcessSpec, SpawnedChild, Spawner};
use crate::tree::ProcessTree;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Number of lifecycle events buffered for slow subscribers.
const EVENT_CAPACITY: usize = 1024;

/// Number of output lines buffered for slow subscribers.
const OUTPUT_CAPACITY: usize = 4096;

/// Lifecycle state of a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MonitorState {
    /// Constructed, never started
    #[default]
    Idle,
    /// Spawning a child
    Starting,
    /// Child is alive
    Running,
    /// Child exited and a respawn is pending
    Restarting,
    /// Stopped on request
    Stopped,
    /// Restart policy gave up
    Exited,
}

impl MonitorState {
    /// Whether no further spawn will happen without an explicit call.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MonitorState::Stopped | MonitorState::Exited)
    }
}

impl std::fmt::Display for MonitorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorState::Idle => write!(f, "idle"),
            MonitorState::Starting => write!(f, "starting"),
            MonitorState::Running => write!(f, "running"),
            MonitorState::Restarting => write!(f, "restarting"),
            MonitorState::Stopped => write!(f, "stopped"),
            MonitorState::Exited => write!(f, "exited"),
        }
    }
}

/// Snapshot of a monitor and its child, rebuilt on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessData {
    /// Monitor identifier
    pub uid: String,
    /// Launch time of the current (or last) child
    pub ctime: Option<DateTime<Utc>>,
    /// Configured command
    pub command: String,
    /// First argument, relative to `source_dir` when set
    pub file: Option<String>,
    /// Remaining arguments
    pub args: Vec<String>,
    /// PID of the live child
    pub pid: Option<u32>,
    /// PID of the supervising process
    pub supervisor_pid: u32,
    /// Whether a child is running or about to be respawned
    pub running: bool,
    /// Number of child exits observed
    pub restarts: u32,
    /// Lifecycle state
    pub state: MonitorState,
    /// Working directory
    pub cwd: PathBuf,
    /// Environment overlay
    pub env: HashMap<String, String>,
    /// Directory the script is resolved against
    pub source_dir: Option<PathBuf>,
}

/// Notification published by a monitor.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    /// First spawn after `start()`
    Start(ProcessData),
    /// Any later spawn
    Restart(ProcessData),
    /// The child exited
    ChildExit {
        code: Option<i32>,
        signal: Option<i32>,
    },
    /// The child targeted by `kill()` exited
    Killed(ProcessData),
    /// No further restart will happen
    Exit { data: ProcessData, spinning: bool },
    /// Misuse or OS failure
    Error(Arc<Error>),
    /// Message relayed from the child
    Message(Value),
}

impl MonitorEvent {
    /// Event name as seen by loggers and other collaborators.
    pub fn name(&self) -> &'static str {
        match self {
            MonitorEvent::Start(_) => "start",
            MonitorEvent::Restart(_) => "restart",
            MonitorEvent::ChildExit { .. } | MonitorEvent::Killed(_) => "child-exit",
            MonitorEvent::Exit { .. } => "exit",
            MonitorEvent::Error(_) => "error",
            MonitorEvent::Message(_) => "message",
        }
    }
}

/// Line written by a piped child, published apart from lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine {
    Stdout(String),
    Stderr(String),
}

impl OutputLine {
    pub fn name(&self) -> &'static str {
        match self {
            OutputLine::Stdout(_) => "stdout",
            OutputLine::Stderr(_) => "stderr",
        }
    }

    pub fn line(&self) -> &str {
        match self {
            OutputLine::Stdout(line) | OutputLine::Stderr(line) => line,
        }
    }
}

/// Requests from [`Monitor`] handles.
enum Command {
    Start { restart: bool },
    Restart,
    Kill { force_stop: bool },
    Send(Value),
    Data(oneshot::Sender<ProcessData>),
}

/// Notifications from tasks owned by the supervisor.
enum Internal {
    Exited {
        generation: u64,
        code: Option<i32>,
        signal: Option<i32>,
    },
    Message {
        generation: u64,
        message: Value,
    },
    GraceExpired {
        generation: u64,
    },
    DelayedRestart {
        generation: u64,
    },
    KillFailed(Error),
}

/// The live child as seen by the supervisor.
struct ChildHandle {
    pid: u32,
    sender: Option<IpcSender>,
    // Held so a piped stdin stays open
    _stdin: Option<ChildStdin>,
    relay: Option<JoinHandle<()>>,
}

/// Owner of the runtime state of one supervised job.
struct Supervisor {
    uid: String,
    spec: ProcessSpec,
    options: MonitorOptions,
    spawner: Arc<dyn Spawner>,
    tree: ProcessTree,
    events: broadcast::Sender<MonitorEvent>,
    output: broadcast::Sender<OutputLine>,
    internal: mpsc::UnboundedSender<Internal>,

    state: MonitorState,
    running: bool,
    times: u32,
    ctime: Option<DateTime<Utc>>,
    started_at: Option<Instant>,
    child: Option<ChildHandle>,
    generation: u64,
    force_stop: bool,
    force_restart: bool,
    kill_observers: usize,
    grace_timer: Option<JoinHandle<()>>,
    pending_restart: Option<JoinHandle<()>>,
}

impl Supervisor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        let mut detached = false;

        loop {
            tokio::select! {
                command = commands.recv(), if !detached => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        // Every handle is gone, take the child down with us
                        debug!(uid = %self.uid, "Monitor handles dropped");
                        detached = true;
                        if self.child.is_some() || self.pending_restart.is_some() {
                            self.kill(true);
                        }
                    }
                },
                Some(event) = internal.recv() => self.handle_internal(event).await,
            }

            if detached && self.child.is_none() && self.pending_restart.is_none() {
                break;
            }
        }

        debug!(uid = %self.uid, "Monitor task finished");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { restart } => self.start(restart).await,
            Command::Restart => self.restart().await,
            Command::Kill { force_stop } => self.kill(force_stop),
            Command::Send(message) => self.send(message).await,
            Command::Data(reply) => {
                let _ = reply.send(self.data());
            }
        }
    }

    async fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::Exited {
                generation,
                code,
                signal,
            } => {
                if generation == self.generation && self.child.is_some() {
                    self.on_exit(code, signal).await;
                }
            }
            Internal::Message {
                generation,
                message,
            } => {
                if generation == self.generation && self.child.is_some() {
                    self.emit(MonitorEvent::Message(message));
                }
            }
            Internal::GraceExpired { generation } => {
                if generation != self.generation {
                    return;
                }
                if let Some(pid) = self.child.as_ref().map(|c| c.pid) {
                    warn!(uid = %self.uid, pid = pid, "Process did not exit in time, sending SIGKILL");
                    self.spawn_kill(pid, true, Signal::Kill);
                }
            }
            Internal::DelayedRestart { generation } => {
                if generation == self.generation && self.pending_restart.take().is_some() {
                    self.force_restart = false;
                    self.start(true).await;
                }
            }
            Internal::KillFailed(e) => self.emit_error(e),
        }
    }

    async fn start(&mut self, restart: bool) {
        if self.child.is_some() || (self.running && !restart) {
            self.emit_error(Error::AlreadyRunning);
            return;
        }

        // A spawn supersedes any pending delayed restart
        if let Some(timer) = self.pending_restart.take() {
            timer.abort();
        }

        if self.options.kill_duplicates {
            kill_duplicates(&self.uid, &self.tree, &self.spec, self.options.kill_signal).await;
        }

        let previous = self.state;
        self.state = MonitorState::Starting;

        match self.spawner.spawn(&self.spec).await {
            Ok(spawned) => self.attach(spawned, restart),
            Err(e) => {
                error!(uid = %self.uid, error = %e, "Failed to start process");
                self.running = false;
                self.state = if restart {
                    MonitorState::Exited
                } else {
                    previous
                };
                self.emit_error(e);

                // A failed respawn ends the job
                if restart {
                    self.emit(MonitorEvent::Exit {
                        data: self.data(),
                        spinning: false,
                    });
                }
            }
        }
    }

    fn attach(&mut self, spawned: SpawnedChild, restart: bool) {
        let SpawnedChild {
            pid,
            mut child,
            channel,
        } = spawned;

        self.generation += 1;
        let generation = self.generation;

        self.ctime = Some(Utc::now());
        self.started_at = Some(Instant::now());
        self.running = true;
        self.state = MonitorState::Running;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdin = child.stdin.take();

        let (sender, relay) = match channel {
            Some(channel) => {
                let (receiver, sender) = channel.into_split();
                let relay = tokio::spawn(relay_messages(receiver, generation, self.internal.clone()));
                (Some(sender), Some(relay))
            }
            None => (None, None),
        };

        self.child = Some(ChildHandle {
            pid,
            sender,
            _stdin: stdin,
            relay,
        });

        if restart {
            info!(uid = %self.uid, pid = pid, restarts = self.times, "Process restarted");
            self.emit(MonitorEvent::Restart(self.data()));
        } else {
            info!(uid = %self.uid, pid = pid, "Process started");
            self.emit(MonitorEvent::Start(self.data()));
        }

        if let Some(stdout) = stdout {
            tokio::spawn(forward_lines(stdout, self.output.clone(), OutputLine::Stdout));
        }
        if let Some(stderr) = stderr {
            tokio::spawn(forward_lines(stderr, self.output.clone(), OutputLine::Stderr));
        }

        tokio::spawn(watch_exit(child, generation, self.internal.clone()));
    }

    async fn on_exit(&mut self, code: Option<i32>, signal: Option<i32>) {
        let uptime = self
            .started_at
            .map(|started| started.elapsed())
            .unwrap_or_default();
        let spinning = policy::is_spinning(uptime, self.options.min_uptime);
        let killed = self.data();

        info!(
            uid = %self.uid,
            pid = ?killed.pid,
            code = ?code,
            signal = ?signal,
            uptime_ms = uptime.as_millis() as u64,
            spinning = spinning,
            "Process exited"
        );
        self.emit(MonitorEvent::ChildExit { code, signal });

        if let Some(handle) = self.child.take() {
            if let Some(relay) = handle.relay {
                relay.abort();
            }
        }
        if let Some(timer) = self.grace_timer.take() {
            timer.abort();
        }

        self.times += 1;

        let decision = policy::decide(&ExitContext {
            times: self.times,
            max: self.options.max,
            spinning,
            spin_sleep_time: self.options.spin_sleep_time,
            force_stop: self.force_stop,
            force_restart: self.force_restart,
        });

        let mut respawn = false;
        match decision {
            RestartDecision::Terminate => {
                let stopped = self.force_stop;
                self.running = false;
                self.force_stop = false;
                if stopped {
                    self.force_restart = false;
                }
                self.state = if stopped {
                    MonitorState::Stopped
                } else {
                    MonitorState::Exited
                };
                info!(uid = %self.uid, restarts = self.times, state = %self.state, "Process will not be restarted");
                self.emit(MonitorEvent::Exit {
                    data: self.data(),
                    spinning,
                });
            }
            RestartDecision::Restart => {
                self.state = MonitorState::Restarting;
                self.force_restart = false;
                respawn = true;
            }
            RestartDecision::RestartAfter(delay) => {
                self.state = MonitorState::Restarting;
                warn!(uid = %self.uid, delay_ms = delay.as_millis() as u64, "Process is spinning, delaying restart");
                self.schedule_restart(delay);
            }
        }

        for _ in 0..std::mem::take(&mut self.kill_observers) {
            self.emit(MonitorEvent::Killed(killed.clone()));
            if self.force_restart && !self.running {
                respawn = true;
            }
        }

        if respawn {
            self.start(true).await;
        }
    }

    fn schedule_restart(&mut self, delay: Duration) {
        let internal = self.internal.clone();
        let generation = self.generation;
        self.pending_restart = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = internal.send(Internal::DelayedRestart { generation });
        }));
    }

    async fn restart(&mut self) {
        self.force_restart = true;

        if self.child.is_none() {
            // Not running, or cooling down before a delayed restart
            self.start(true).await;
            self.force_restart = false;
        } else {
            self.kill(false);
        }
    }

    fn kill(&mut self, force_stop: bool) {
        let pid = match self.child.as_ref() {
            Some(child) => child.pid,
            None => {
                if force_stop && self.pending_restart.is_some() {
                    self.cancel_pending_restart();
                } else {
                    self.emit_error(Error::NotRunning { action: "stop" });
                }
                return;
            }
        };

        if force_stop {
            // A stop overrides any restart still waiting on this child
            self.force_stop = true;
            self.force_restart = false;

            if let Some(grace) = self.options.kill_grace_period {
                if let Some(old) = self.grace_timer.take() {
                    old.abort();
                }
                let internal = self.internal.clone();
                let generation = self.generation;
                self.grace_timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(grace).await;
                    let _ = internal.send(Internal::GraceExpired { generation });
                }));
            }
        }

        self.kill_observers += 1;

        info!(
            uid = %self.uid,
            pid = pid,
            signal = %self.options.kill_signal,
            force_stop = force_stop,
            "Killing process"
        );
        self.spawn_kill(pid, self.options.kill_tree, self.options.kill_signal);
    }

    fn cancel_pending_restart(&mut self) {
        if let Some(timer) = self.pending_restart.take() {
            timer.abort();
        }

        self.running = false;
        self.force_stop = false;
        self.force_restart = false;
        self.state = MonitorState::Stopped;

        info!(uid = %self.uid, "Cancelled pending restart");
        // Only spinning children are restarted with a delay
        self.emit(MonitorEvent::Exit {
            data: self.data(),
            spinning: true,
        });
    }

    /// Signal the child off the scheduling loop; failures come back as events.
    fn spawn_kill(&self, pid: u32, kill_tree: bool, signal: Signal) {
        let tree = self.tree.clone();
        let internal = self.internal.clone();

        tokio::task::spawn_blocking(move || {
            let result = match tree.kill(pid, kill_tree, signal) {
                Err(e @ (Error::ListingFailed(_) | Error::ListingParse(_))) => {
                    warn!(pid = pid, error = %e, "Process tree kill failed, signalling root directly");
                    tree.signal(pid, signal).map(|_| ())
                }
                other => other.map(|_| ()),
            };

            if let Err(e) = result {
                let _ = internal.send(Internal::KillFailed(e));
            }
        });
    }

    async fn send(&mut self, message: Value) {
        if !self.running || self.child.is_none() {
            self.emit_error(Error::NotRunning { action: "send to" });
            return;
        }

        let result = match self.child.as_mut().and_then(|c| c.sender.as_mut()) {
            Some(sender) => sender.send(&message).await,
            None => Err(Error::IpcUnavailable),
        };

        if let Err(e) = result {
            self.emit_error(e);
        }
    }

    fn data(&self) -> ProcessData {
        ProcessData {
            uid: self.uid.clone(),
            ctime: self.ctime,
            command: self.spec.command.clone(),
            file: self.spec.file(),
            args: self.spec.args.iter().skip(1).cloned().collect(),
            pid: self.child.as_ref().map(|c| c.pid),
            supervisor_pid: std::process::id(),
            running: self.running,
            restarts: self.times,
            state: self.state,
            cwd: self.spec.cwd.clone(),
            env: self.spec.env.clone(),
            source_dir: self.spec.source_dir.clone(),
        }
    }

    fn emit(&self, event: MonitorEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }

    fn emit_error(&self, e: Error) {
        warn!(uid = %self.uid, error = %e, "Monitor error");
        self.emit(MonitorEvent::Error(Arc::new(e)));
    }
}

/// Kill processes left over from an earlier run of the same command line.
async fn kill_duplicates(uid: &str, tree: &ProcessTree, spec: &ProcessSpec, signal: Signal) {
    let tree = tree.clone();
    let command_line = spec.command_line();
    let exclude = [std::process::id()];

    let result = tokio::task::spawn_blocking(move || {
        tree.kill_by_command_line(&command_line, &exclude, signal)
    })
    .await;

    match result {
        Ok(Ok(killed)) if !killed.is_empty() => {
            info!(uid = %uid, pids = ?killed, "Killed processes left over from a previous run");
        }
        Ok(Ok(_)) => {}
        Ok(Err(e)) => warn!(uid = %uid, error = %e, "Duplicate process scan failed"),
        Err(e) => warn!(uid = %uid, error = %e, "Duplicate process scan aborted"),
    }
}

async fn watch_exit(mut child: Child, generation: u64, internal: mpsc::UnboundedSender<Internal>) {
    let (code, signal) = match child.wait().await {
        Ok(status) => (status.code(), exit_signal(&status)),
        Err(e) => {
            error!(error = %e, "Failed to wait for process");
            (None, None)
        }
    };

    let _ = internal.send(Internal::Exited {
        generation,
        code,
        signal,
    });
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

async fn relay_messages(
    mut receiver: IpcReceiver,
    generation: u64,
    internal: mpsc::UnboundedSender<Internal>,
) {
    loop {
        match receiver.recv().await {
            Ok(Some(message)) => {
                if internal.send(Internal::Message { generation, message }).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(Error::Serialization(e)) => {
                warn!(error = %e, "Dropping malformed message from child");
            }
            Err(e) => {
                debug!(error = %e, "Message channel closed");
                break;
            }
        }
    }
}

async fn forward_lines<R>(
    reader: R,
    output: broadcast::Sender<OutputLine>,
    wrap: fn(String) -> OutputLine,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let _ = output.send(wrap(line));
    }
}

fn generate_uid() -> String {
    Uuid::new_v4().simple().to_string()[..4].to_string()
}

/// Handle to a supervised job.
///
/// Cloning the handle is cheap; the job is torn down once every clone is
/// dropped.
#[derive(Clone)]
pub struct Monitor {
    uid: Arc<str>,
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<MonitorEvent>,
    output: broadcast::Sender<OutputLine>,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor").field("uid", &self.uid).finish()
    }
}

impl Monitor {
    /// Create a monitor for `target` using the host platform.
    ///
    /// Must be called from within a tokio runtime. The child is not spawned
    /// until [`Monitor::start`] is called.
    pub fn new(target: Target, options: MonitorOptions) -> Result<Self> {
        let platform = default_platform();
        let spawner = Arc::new(CommandSpawner::new(Arc::clone(&platform)));
        Self::with_platform(target, options, platform, spawner)
    }

    /// Create a monitor with custom platform operations and spawner.
    pub fn with_platform(
        target: Target,
        options: MonitorOptions,
        platform: Arc<dyn PlatformOps>,
        spawner: Arc<dyn Spawner>,
    ) -> Result<Self> {
        options.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| Error::NoRuntime)?;

        let spec = ProcessSpec::new(target, &options)?;
        let uid = options.uid.clone().unwrap_or_else(generate_uid);

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (output, _) = broadcast::channel(OUTPUT_CAPACITY);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        debug!(uid = %uid, platform = platform.name(), command = %spec.command_line(), "Created monitor");

        let supervisor = Supervisor {
            uid: uid.clone(),
            spec,
            options,
            spawner,
            tree: ProcessTree::new(platform),
            events: events.clone(),
            output: output.clone(),
            internal: internal_tx,
            state: MonitorState::Idle,
            running: false,
            times: 0,
            ctime: None,
            started_at: None,
            child: None,
            generation: 0,
            force_stop: false,
            force_restart: false,
            kill_observers: 0,
            grace_timer: None,
            pending_restart: None,
        };

        runtime.spawn(supervisor.run(commands_rx, internal_rx));

        Ok(Self {
            uid: uid.into(),
            commands: commands_tx,
            events,
            output,
        })
    }

    /// Identifier of this monitor.
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Subscribe to lifecycle events published from now on.
    ///
    /// Child output is not published here; see [`Monitor::subscribe_output`].
    /// A receiver that falls more than the channel capacity behind gets
    /// [`RecvError::Lagged`](broadcast::error::RecvError::Lagged) and skips
    /// the oldest events. Keep receiving after a lag.
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events.subscribe()
    }

    /// Subscribe to lines the child writes to piped stdout and stderr.
    pub fn subscribe_output(&self) -> broadcast::Receiver<OutputLine> {
        self.output.subscribe()
    }

    /// Spawn the child.
    pub fn start(&self) -> &Self {
        self.request(Command::Start { restart: false })
    }

    /// Restart the child, spawning it if it is not running.
    pub fn restart(&self) -> &Self {
        self.request(Command::Restart)
    }

    /// Kill the child and prevent any further restart.
    pub fn stop(&self) -> &Self {
        self.kill(true)
    }

    /// Signal the child with the configured kill signal.
    ///
    /// With `force_stop` the child is not restarted regardless of policy.
    pub fn kill(&self, force_stop: bool) -> &Self {
        self.request(Command::Kill { force_stop })
    }

    /// Send a structured message to the child.
    pub fn send(&self, message: impl Into<Value>) -> &Self {
        self.request(Command::Send(message.into()))
    }

    /// Snapshot of the monitor and its child.
    pub async fn data(&self) -> Result<ProcessData> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Data(tx))
            .map_err(|_| Error::MonitorClosed)?;
        rx.await.map_err(|_| Error::MonitorClosed)
    }

    fn request(&self, command: Command) -> &Self {
        if self.commands.send(command).is_err() {
            let _ = self
                .events
                .send(MonitorEvent::Error(Arc::new(Error::MonitorClosed)));
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(MonitorState::Idle.to_string(), "idle");
        assert_eq!(MonitorState::Restarting.to_string(), "restarting");
        assert!(MonitorState::Stopped.is_terminal());
        assert!(MonitorState::Exited.is_terminal());
        assert!(!MonitorState::Running.is_terminal());
    }

    #[test]
    fn test_event_names() {
        let exit = MonitorEvent::ChildExit {
            code: Some(0),
            signal: None,
        };
        assert_eq!(exit.name(), "child-exit");
        assert_eq!(MonitorEvent::Message(Value::Null).name(), "message");
        assert_eq!(
            MonitorEvent::Error(Arc::new(Error::AlreadyRunning)).name(),
            "error"
        );
        let line = OutputLine::Stderr("boom".to_string());
        assert_eq!(line.name(), "stderr");
        assert_eq!(line.line(), "boom");
    }

    #[test]
    fn test_generated_uid() {
        let uid = generate_uid();
        assert_eq!(uid.len(), 4);
        assert!(uid.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_new_outside_runtime() {
        let result = Monitor::new(Target::command(["true"]), MonitorOptions::default());
        assert!(matches!(result, Err(Error::NoRuntime)));
    }
}
