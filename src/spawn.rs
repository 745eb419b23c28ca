//! Process creation for the supervisor.
//!
//! This module resolves what to run (command parsing, script and
//! executable checks, environment merge) and starts the child.

use crate::error::{Error, Result};
use crate::ipc::IpcChannel;
use crate::options::{MonitorOptions, StdioConfig, StreamMode, Target, DEFAULT_INTERPRETER};
use crate::platform::{default_platform, PlatformOps};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::{Child, Command};
use tracing::{debug, info};

/// Split a command at the first unescaped space.
///
/// `"python3 -u"` with args `["app.py"]` becomes `("python3", ["-u", "app.py"])`.
/// An escaped space (`\ `) stays part of the program name.
pub fn parse_command_unix(command: &str, args: &[String]) -> Option<(String, Vec<String>)> {
    let command = command.trim();
    let bytes = command.as_bytes();

    let split = bytes
        .iter()
        .enumerate()
        .position(|(i, &b)| b == b' ' && i > 0 && bytes[i - 1] != b'\\');

    let (program, rest) = match split {
        Some(i) => (&command[..i], Some(&command[i + 1..])),
        None => (command, None),
    };

    if program.is_empty() || program.ends_with('\\') {
        return None;
    }

    let mut parsed: Vec<String> = rest
        .map(|r| r.split(' ').filter(|a| !a.is_empty()).map(String::from).collect())
        .unwrap_or_default();
    parsed.extend(args.iter().cloned());

    Some((program.replace("\\ ", " "), parsed))
}

/// Split a command whose program may be wrapped in double quotes.
///
/// `"\"C:\\Program Files\\node.exe\" --inspect"` becomes the quoted path
/// followed by `--inspect`.
pub fn parse_command_windows(command: &str, args: &[String]) -> Option<(String, Vec<String>)> {
    let command = command.trim();

    let (program, rest) = if let Some(quoted) = command.strip_prefix('"') {
        let end = quoted.find('"')?;
        (&quoted[..end], quoted[end + 1..].trim_start())
    } else {
        match command.find(char::is_whitespace) {
            Some(i) => (&command[..i], command[i..].trim_start()),
            None => (command, ""),
        }
    };

    if program.is_empty() || program.ends_with('/') {
        return None;
    }

    let mut parsed: Vec<String> = rest
        .split(' ')
        .filter(|a| !a.is_empty())
        .map(String::from)
        .collect();
    parsed.extend(args.iter().cloned());

    Some((program.to_string(), parsed))
}

/// Fully resolved description of the process a monitor runs.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    /// Command string, possibly carrying leading arguments
    pub command: String,
    /// Arguments; the first is the script for script targets
    pub args: Vec<String>,
    /// Whether `args[0]` is a script that must exist
    pub is_script: bool,
    /// Directory the first argument was joined onto
    pub source_dir: Option<PathBuf>,
    /// Working directory
    pub cwd: PathBuf,
    /// Environment overlay
    pub env: HashMap<String, String>,
    /// Inherited variables to suppress
    pub hide_env: Vec<String>,
    /// Stream wiring
    pub stdio: StdioConfig,
}

impl ProcessSpec {
    /// Resolve a target against the monitor options.
    pub fn new(target: Target, options: &MonitorOptions) -> Result<Self> {
        let (command, mut args, is_script) = match target {
            Target::Script(script) => {
                let command = options
                    .command
                    .clone()
                    .unwrap_or_else(|| DEFAULT_INTERPRETER.to_string());
                let mut args = vec![script.to_string_lossy().into_owned()];
                args.extend(options.args.iter().cloned());
                (command, args, true)
            }
            Target::Command(argv) => {
                let mut argv = argv.into_iter();
                let command = argv
                    .next()
                    .filter(|c| !c.trim().is_empty())
                    .ok_or_else(|| Error::ConfigError("empty command".to_string()))?;
                (command, argv.collect(), false)
            }
        };

        if let (Some(dir), Some(first)) = (&options.source_dir, args.first_mut()) {
            *first = dir.join(&*first).to_string_lossy().into_owned();
        }

        let cwd = match &options.cwd {
            Some(cwd) => cwd.clone(),
            None => std::env::current_dir()?,
        };

        Ok(Self {
            command,
            args,
            is_script,
            source_dir: options.source_dir.clone(),
            cwd,
            env: options.env.clone(),
            hide_env: options.hide_env.clone(),
            stdio: options.stdio,
        })
    }

    /// Command line as it appears in a process listing.
    pub fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Script file that must exist before spawning.
    pub fn script_path(&self) -> Option<PathBuf> {
        if !self.is_script {
            return None;
        }
        self.args.first().map(|script| self.cwd.join(script))
    }

    /// First argument, relative to `source_dir` when one is configured.
    pub fn file(&self) -> Option<String> {
        let first = self.args.first()?;
        match &self.source_dir {
            Some(dir) => Some(
                Path::new(first)
                    .strip_prefix(dir)
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_else(|_| first.clone()),
            ),
            None => Some(first.clone()),
        }
    }

    /// Environment for the child: inherited variables minus `hide_env`,
    /// overlaid with `env`.
    pub fn environment(&self) -> HashMap<String, String> {
        let inherited = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)));
        merge_env(inherited, &self.hide_env, &self.env)
    }
}

fn merge_env(
    inherited: impl Iterator<Item = (String, String)>,
    hide: &[String],
    overlay: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut merged: HashMap<String, String> = inherited
        .filter(|(key, _)| !hide.contains(key))
        .collect();
    merged.extend(overlay.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

fn stdio_for(mode: StreamMode) -> Stdio {
    match mode {
        StreamMode::Pipe => Stdio::piped(),
        StreamMode::Inherit => Stdio::inherit(),
        StreamMode::Null => Stdio::null(),
    }
}

/// A freshly started child.
pub struct SpawnedChild {
    /// OS process ID
    pub pid: u32,
    /// Handle used to await exit and take piped streams
    pub child: Child,
    /// Message channel, when stdio wiring asked for one
    pub channel: Option<IpcChannel>,
}

/// Creates child processes from a [`ProcessSpec`].
#[async_trait]
pub trait Spawner: Send + Sync {
    async fn spawn(&self, spec: &ProcessSpec) -> Result<SpawnedChild>;
}

/// Spawner that starts real OS processes.
pub struct CommandSpawner {
    platform: Arc<dyn PlatformOps>,
}

impl Default for CommandSpawner {
    fn default() -> Self {
        Self::new(default_platform())
    }
}

impl CommandSpawner {
    pub fn new(platform: Arc<dyn PlatformOps>) -> Self {
        Self { platform }
    }
}

#[async_trait]
impl Spawner for CommandSpawner {
    async fn spawn(&self, spec: &ProcessSpec) -> Result<SpawnedChild> {
        let (program, args) = self
            .platform
            .parse_command(&spec.command, &spec.args)
            .ok_or_else(|| Error::InvalidCommand(spec.command.clone()))?;

        if let Some(script) = spec.script_path() {
            if tokio::fs::metadata(&script).await.is_err() {
                return Err(Error::ScriptNotFound(script));
            }
        }

        let env = spec.environment();
        let executable = which::which_in(&program, env.get("PATH"), &spec.cwd).map_err(|e| {
            Error::ExecutableNotFound {
                command: program.clone(),
                reason: e.to_string(),
            }
        })?;

        let mut cmd = Command::new(&executable);
        #[cfg(unix)]
        cmd.arg0(&program);
        cmd.args(&args)
            .current_dir(&spec.cwd)
            .env_clear()
            .envs(&env)
            .stdin(stdio_for(spec.stdio.stdin))
            .stdout(stdio_for(spec.stdio.stdout))
            .stderr(stdio_for(spec.stdio.stderr));

        #[cfg(unix)]
        let pending = if spec.stdio.ipc {
            Some(crate::ipc::PendingChannel::install(&mut cmd)?)
        } else {
            None
        };
        #[cfg(not(unix))]
        {
            if spec.stdio.ipc {
                debug!("Message channels are not supported on this platform");
            }
        }

        let child = cmd
            .spawn()
            .map_err(|e| Error::SpawnFailed(format!("{}: {}", spec.command_line(), e)))?;
        let pid = child
            .id()
            .ok_or_else(|| Error::SpawnFailed("child exited before reporting a PID".to_string()))?;

        #[cfg(unix)]
        let channel = pending.map(|p| p.finish()).transpose()?;
        #[cfg(not(unix))]
        let channel = None;

        info!(pid = pid, command = %spec.command_line(), "Spawned process");
        debug!(executable = %executable.display(), cwd = %spec.cwd.display(), "Spawn details");

        Ok(SpawnedChild {
            pid,
            child,
            channel,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_unix_plain() {
        let (cmd, args) = parse_command_unix("node", &strings(&["app.js"])).unwrap();
        assert_eq!(cmd, "node");
        assert_eq!(args, strings(&["app.js"]));
    }

    #[test]
    fn test_parse_unix_embedded_args() {
        let (cmd, args) =
            parse_command_unix("python3 -u -X dev", &strings(&["main.py", "--port"])).unwrap();
        assert_eq!(cmd, "python3");
        assert_eq!(args, strings(&["-u", "-X", "dev", "main.py", "--port"]));
    }

    #[test]
    fn test_parse_unix_escaped_space() {
        let (cmd, args) = parse_command_unix("/opt/my\\ app/run --fast", &[]).unwrap();
        assert_eq!(cmd, "/opt/my app/run");
        assert_eq!(args, strings(&["--fast"]));
    }

    #[test]
    fn test_parse_unix_rejects_malformed() {
        assert!(parse_command_unix("", &[]).is_none());
        assert!(parse_command_unix("   ", &[]).is_none());
        assert!(parse_command_unix("\\", &[]).is_none());
    }

    #[test]
    fn test_parse_windows_quoted() {
        let (cmd, args) = parse_command_windows(
            "\"C:\\Program Files\\nodejs\\node.exe\" --inspect",
            &strings(&["app.js"]),
        )
        .unwrap();
        assert_eq!(cmd, "C:\\Program Files\\nodejs\\node.exe");
        assert_eq!(args, strings(&["--inspect", "app.js"]));
    }

    #[test]
    fn test_parse_windows_bare() {
        let (cmd, args) = parse_command_windows("node", &strings(&["app.js"])).unwrap();
        assert_eq!(cmd, "node");
        assert_eq!(args, strings(&["app.js"]));
        assert!(parse_command_windows("\"unterminated", &[]).is_none());
    }

    #[test]
    fn test_merge_env_hides_and_overlays() {
        let inherited = vec![
            ("HOME".to_string(), "/home/me".to_string()),
            ("SECRET".to_string(), "hunter2".to_string()),
            ("PORT".to_string(), "80".to_string()),
        ];
        let mut overlay = HashMap::new();
        overlay.insert("PORT".to_string(), "8080".to_string());

        let merged = merge_env(inherited.into_iter(), &strings(&["SECRET"]), &overlay);
        assert_eq!(merged.get("HOME").map(String::as_str), Some("/home/me"));
        assert_eq!(merged.get("PORT").map(String::as_str), Some("8080"));
        assert!(!merged.contains_key("SECRET"));
    }

    #[test]
    fn test_spec_from_script_target() {
        let options = MonitorOptions {
            command: Some("bash".to_string()),
            args: strings(&["--flag"]),
            source_dir: Some(PathBuf::from("/srv/app")),
            cwd: Some(PathBuf::from("/tmp")),
            ..Default::default()
        };

        let spec = ProcessSpec::new(Target::script("run.sh"), &options).unwrap();
        assert_eq!(spec.command, "bash");
        assert_eq!(spec.args, strings(&["/srv/app/run.sh", "--flag"]));
        assert_eq!(spec.script_path(), Some(PathBuf::from("/srv/app/run.sh")));
        assert_eq!(spec.file().as_deref(), Some("run.sh"));
        assert_eq!(spec.command_line(), "bash /srv/app/run.sh --flag");
    }

    #[test]
    fn test_spec_from_command_target() {
        let options = MonitorOptions {
            args: strings(&["ignored"]),
            ..Default::default()
        };

        let spec = ProcessSpec::new(Target::command(["sleep", "10"]), &options).unwrap();
        assert_eq!(spec.command, "sleep");
        assert_eq!(spec.args, strings(&["10"]));
        assert!(spec.script_path().is_none());

        let empty = ProcessSpec::new(Target::Command(Vec::new()), &options);
        assert!(matches!(empty, Err(Error::ConfigError(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_missing_script() {
        let dir = tempfile::TempDir::new().unwrap();
        let options = MonitorOptions::default().with_cwd(dir.path());
        let spec = ProcessSpec::new(Target::script("missing.sh"), &options).unwrap();

        let result = CommandSpawner::default().spawn(&spec).await;
        assert!(matches!(result, Err(Error::ScriptNotFound(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_missing_executable() {
        let options = MonitorOptions::default();
        let spec = ProcessSpec::new(
            Target::command(["respawn-definitely-not-a-binary", "x"]),
            &options,
        )
        .unwrap();

        let result = CommandSpawner::default().spawn(&spec).await;
        assert!(matches!(result, Err(Error::ExecutableNotFound { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_passes_env_and_cwd() {
        use tokio::io::AsyncReadExt;

        let dir = tempfile::TempDir::new().unwrap();
        let options = MonitorOptions::default()
            .with_cwd(dir.path())
            .with_env("RESPAWN_TEST_VALUE", "forty-two");
        let spec = ProcessSpec::new(
            Target::command(["sh", "-c", "echo \"$RESPAWN_TEST_VALUE $(pwd -P)\""]),
            &options,
        )
        .unwrap();

        let mut spawned = CommandSpawner::default().spawn(&spec).await.unwrap();
        assert!(spawned.channel.is_some());

        let mut out = String::new();
        let mut stdout = spawned.child.stdout.take().unwrap();
        stdout.read_to_string(&mut out).await.unwrap();
        spawned.child.wait().await.unwrap();

        let cwd = dir.path().canonicalize().unwrap();
        assert_eq!(out.trim(), format!("forty-two {}", cwd.display()));
    }
}
