//! Monitor configuration - describes what to run and how to restart it.

use crate::error::{Error, Result};
use crate::signal::Signal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Interpreter used for [`Target::Script`] when no `command` is configured.
#[cfg(unix)]
pub const DEFAULT_INTERPRETER: &str = "sh";
#[cfg(windows)]
pub const DEFAULT_INTERPRETER: &str = "cmd";

/// What the monitor runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A script passed as the first argument to `command`
    Script(PathBuf),
    /// A full argument vector; the first element is the command
    Command(Vec<String>),
}

impl Target {
    /// Build a command target from anything iterable.
    pub fn command<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Target::Command(argv.into_iter().map(Into::into).collect())
    }

    /// Build a script target.
    pub fn script(path: impl Into<PathBuf>) -> Self {
        Target::Script(path.into())
    }
}

/// How one of the child's standard streams is wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    /// Captured by the supervisor
    #[default]
    Pipe,
    /// Shared with the supervisor
    Inherit,
    /// Connected to the null device
    Null,
}

/// Standard stream and message channel wiring for the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StdioConfig {
    #[serde(default)]
    pub stdin: StreamMode,
    #[serde(default)]
    pub stdout: StreamMode,
    #[serde(default)]
    pub stderr: StreamMode,
    /// Open a structured message channel on fd 3
    #[serde(default = "default_true")]
    pub ipc: bool,
}

impl Default for StdioConfig {
    fn default() -> Self {
        Self {
            stdin: StreamMode::Pipe,
            stdout: StreamMode::Pipe,
            stderr: StreamMode::Pipe,
            ipc: true,
        }
    }
}

impl StdioConfig {
    /// All streams inherited, no message channel.
    pub fn inherit() -> Self {
        Self {
            stdin: StreamMode::Inherit,
            stdout: StreamMode::Inherit,
            stderr: StreamMode::Inherit,
            ipc: false,
        }
    }
}

/// Configuration for a single monitor instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorOptions {
    /// Command used to run a script target
    pub command: Option<String>,
    /// Extra arguments appended after the script
    pub args: Vec<String>,
    /// Directory the first argument is relative to
    pub source_dir: Option<PathBuf>,
    /// Working directory of the child (defaults to the current directory)
    pub cwd: Option<PathBuf>,
    /// Variables overlaid on the inherited environment
    pub env: HashMap<String, String>,
    /// Inherited variables that are not passed to the child
    pub hide_env: Vec<String>,
    /// Stream wiring
    pub stdio: StdioConfig,
    /// Maximum number of spawns before giving up
    pub max: Option<u32>,
    /// Exits sooner than this are treated as spinning
    #[serde(with = "millis_serde")]
    pub min_uptime: Duration,
    /// Delay before restarting a spinning process
    #[serde(with = "option_millis_serde")]
    pub spin_sleep_time: Option<Duration>,
    /// Whether kills also signal the direct children
    pub kill_tree: bool,
    /// Signal used by `stop()` and `restart()`
    pub kill_signal: Signal,
    /// Time after which an unresponsive child gets SIGKILL
    #[serde(with = "option_millis_serde")]
    pub kill_grace_period: Option<Duration>,
    /// Kill stray processes with an identical command line before spawning
    pub kill_duplicates: bool,
    /// Identifier reported in snapshots
    pub uid: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            source_dir: None,
            cwd: None,
            env: HashMap::new(),
            hide_env: Vec::new(),
            stdio: StdioConfig::default(),
            max: None,
            min_uptime: Duration::ZERO,
            spin_sleep_time: None,
            kill_tree: true,
            kill_signal: Signal::Kill,
            kill_grace_period: None,
            kill_duplicates: true,
            uid: None,
        }
    }
}

/// Durations stored as integer milliseconds.
mod millis_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

mod option_millis_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

impl MonitorOptions {
    /// Load options from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse options from a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let options: MonitorOptions = toml::from_str(content)?;
        options.validate()?;
        Ok(options)
    }

    /// Save the options to a TOML file.
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| Error::ConfigError(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check option values that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if let Some(command) = &self.command {
            if command.trim().is_empty() {
                return Err(Error::ConfigError("command must not be empty".to_string()));
            }
        }

        if self.spin_sleep_time == Some(Duration::ZERO) {
            return Err(Error::ConfigError(
                "spin_sleep_time must be greater than zero".to_string(),
            ));
        }

        if self.kill_grace_period == Some(Duration::ZERO) {
            return Err(Error::ConfigError(
                "kill_grace_period must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    pub fn with_max(mut self, max: u32) -> Self {
        self.max = Some(max);
        self
    }

    pub fn with_min_uptime(mut self, min_uptime: Duration) -> Self {
        self.min_uptime = min_uptime;
        self
    }

    pub fn with_spin_sleep_time(mut self, delay: Duration) -> Self {
        self.spin_sleep_time = Some(delay);
        self
    }

    pub fn with_kill_signal(mut self, signal: Signal) -> Self {
        self.kill_signal = signal;
        self
    }

    pub fn with_kill_grace_period(mut self, grace: Duration) -> Self {
        self.kill_grace_period = Some(grace);
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_stdio(mut self, stdio: StdioConfig) -> Self {
        self.stdio = stdio;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = MonitorOptions::default();
        assert!(options.kill_tree);
        assert!(options.kill_duplicates);
        assert_eq!(options.kill_signal, Signal::Kill);
        assert_eq!(options.min_uptime, Duration::ZERO);
        assert!(options.spin_sleep_time.is_none());
        assert!(options.max.is_none());
        assert!(options.stdio.ipc);
        assert_eq!(options.stdio.stdout, StreamMode::Pipe);
    }

    #[test]
    fn test_parse_toml() {
        let options = MonitorOptions::from_toml_str(
            r#"
            command = "bash"
            args = ["--verbose"]
            max = 3
            min_uptime = 2000
            spin_sleep_time = 500
            kill_signal = "SIGTERM"
            kill_grace_period = 1500
            kill_tree = false
            hide_env = ["SECRET"]

            [env]
            PORT = "8080"

            [stdio]
            stdout = "inherit"
            ipc = false
            "#,
        )
        .unwrap();

        assert_eq!(options.command.as_deref(), Some("bash"));
        assert_eq!(options.max, Some(3));
        assert_eq!(options.min_uptime, Duration::from_millis(2000));
        assert_eq!(options.spin_sleep_time, Some(Duration::from_millis(500)));
        assert_eq!(options.kill_signal, Signal::Terminate);
        assert_eq!(options.kill_grace_period, Some(Duration::from_millis(1500)));
        assert!(!options.kill_tree);
        assert_eq!(options.env.get("PORT").map(String::as_str), Some("8080"));
        assert_eq!(options.hide_env, vec!["SECRET".to_string()]);
        assert_eq!(options.stdio.stdout, StreamMode::Inherit);
        assert_eq!(options.stdio.stdin, StreamMode::Pipe);
        assert!(!options.stdio.ipc);
    }

    #[test]
    fn test_rejects_bad_signal() {
        let result = MonitorOptions::from_toml_str(r#"kill_signal = "SIGBOGUS""#);
        assert!(matches!(result, Err(Error::TomlParse(_))));
    }

    #[test]
    fn test_rejects_zero_spin_sleep() {
        let result = MonitorOptions::from_toml_str("spin_sleep_time = 0");
        assert!(matches!(result, Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("job.toml");

        let options = MonitorOptions::default()
            .with_max(5)
            .with_spin_sleep_time(Duration::from_millis(250))
            .with_env("MODE", "test");
        options.to_file(&path).unwrap();

        let loaded = MonitorOptions::from_file(&path).unwrap();
        assert_eq!(loaded.max, Some(5));
        assert_eq!(loaded.spin_sleep_time, Some(Duration::from_millis(250)));
        assert_eq!(loaded.env.get("MODE").map(String::as_str), Some("test"));
    }

    #[test]
    fn test_target_builders() {
        assert_eq!(
            Target::command(["sleep", "1"]),
            Target::Command(vec!["sleep".to_string(), "1".to_string()])
        );
        assert_eq!(Target::script("app.sh"), Target::Script(PathBuf::from("app.sh")));
    }
}
