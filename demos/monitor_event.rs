//! Supervise a script and print every lifecycle event.
//!
//! Usage: `cargo run --example monitor_event [job.toml]`

use anyhow::{Context, Result};
use respawn::{logging, Monitor, MonitorEvent, MonitorOptions, OutputLine, Target};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

fn load_options(path: Option<&Path>) -> Result<MonitorOptions> {
    match path {
        Some(path) => MonitorOptions::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display())),
        None => Ok(MonitorOptions::default()
            .with_max(3)
            .with_min_uptime(Duration::from_millis(500))
            .with_spin_sleep_time(Duration::from_secs(1))
            .with_env("GREETING", "hello from respawn")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let config = std::env::args().nth(1).map(PathBuf::from);
    let options = load_options(config.as_deref())?;
    let demos = Path::new(env!("CARGO_MANIFEST_DIR")).join("demos");
    let options = match options.cwd {
        Some(_) => options,
        None => options.with_cwd(&demos),
    };

    let monitor = Monitor::new(Target::script("counter.sh"), options)?;
    let mut events = monitor.subscribe();
    let mut output = monitor.subscribe_output();
    monitor.start();

    loop {
        tokio::select! {
            event = events.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped = skipped, "Event receiver lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                match event {
                    MonitorEvent::Start(data) | MonitorEvent::Restart(data) => {
                        let snapshot = serde_json::to_string(&data)?;
                        info!(pid = ?data.pid, restarts = data.restarts, "{}", snapshot);
                    }
                    MonitorEvent::ChildExit { code, signal } => {
                        info!(code = ?code, signal = ?signal, "child-exit");
                    }
                    MonitorEvent::Message(message) => info!(message = %message, "message"),
                    MonitorEvent::Error(e) => error!(error = %e, "error"),
                    MonitorEvent::Killed(_) => {}
                    MonitorEvent::Exit { data, spinning } => {
                        info!(restarts = data.restarts, spinning = spinning, state = %data.state, "exit");
                        break;
                    }
                }
            }
            Ok(line) = output.recv() => match line {
                OutputLine::Stdout(line) => println!("{}", line),
                OutputLine::Stderr(line) => eprintln!("{}", line),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping child");
                monitor.stop();
            }
        }
    }

    Ok(())
}
