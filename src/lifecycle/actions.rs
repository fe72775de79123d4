// src/lifecycle/actions.rs
//! Lifecycle hook execution
//!
//! Each action is a shell command. Settings come from the action first and
//! the set's defaults second. `max_total_seconds` bounds the action across
//! all of its attempts; `max_retries` is the number of extra attempts.

use crate::error::{Error, Result};
use crate::package::{Action, ActionDefaults};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default shell for actions
const DEFAULT_SHELL: &str = "sh";

/// Runs an ordered list of actions, stopping at the first failure
#[async_trait]
pub trait ActionRunner: Send + Sync {
    async fn run(
        &self,
        defaults: &ActionDefaults,
        actions: &[Action],
        cancel: &CancellationToken,
    ) -> Result<()>;
}

/// Action settings after applying defaults
#[derive(Debug, Clone, PartialEq, Eq)]
struct ResolvedAction {
    cmd: String,
    mute: bool,
    max_total: Option<Duration>,
    max_retries: u32,
    dir: Option<PathBuf>,
    env: Vec<(String, String)>,
    shell: String,
}

impl ResolvedAction {
    fn resolve(defaults: &ActionDefaults, action: &Action) -> Result<Self> {
        let seconds = action.max_total_seconds.unwrap_or(defaults.max_total_seconds);
        let mut env = Vec::new();
        for entry in defaults.env.iter().chain(&action.env) {
            let (key, value) = entry.split_once('=').ok_or_else(|| {
                Error::Validation(format!("invalid action env '{}': expected KEY=VALUE", entry))
            })?;
            env.push((key.to_string(), value.to_string()));
        }
        Ok(Self {
            cmd: action.cmd.clone(),
            mute: action.mute.unwrap_or(defaults.mute),
            max_total: (seconds > 0).then(|| Duration::from_secs(seconds)),
            max_retries: action.max_retries.unwrap_or(defaults.max_retries),
            dir: action
                .dir
                .as_ref()
                .or(defaults.dir.as_ref())
                .map(PathBuf::from),
            env,
            shell: defaults
                .shell
                .clone()
                .unwrap_or_else(|| DEFAULT_SHELL.to_string()),
        })
    }
}

/// Runs actions through `sh -c` (or the configured shell)
#[derive(Debug, Clone, Default)]
pub struct ShellActionRunner;

impl ShellActionRunner {
    pub fn new() -> Self {
        Self
    }

    async fn run_one(&self, action: &ResolvedAction, cancel: &CancellationToken) -> Result<()> {
        let deadline = action.max_total.map(|d| Instant::now() + d);
        let attempts = action.max_retries.saturating_add(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    Some(deadline - now)
                }
                None => None,
            };

            match self.attempt(action, remaining, cancel).await {
                Ok(()) => return Ok(()),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    if attempt < attempts {
                        warn!("Action \"{}\" failed (attempt {}/{}): {}", action.cmd, attempt, attempts, e);
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            Error::Action(format!(
                "command \"{}\" timed out after {} seconds",
                action.cmd,
                action.max_total.map(|d| d.as_secs()).unwrap_or_default()
            ))
        }))
    }

    async fn attempt(
        &self,
        action: &ResolvedAction,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut command = Command::new(&action.shell);
        command
            .arg("-c")
            .arg(&action.cmd)
            .envs(action.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &action.dir {
            command.current_dir(dir);
        }

        debug!("Running action: {} -c {:?}", action.shell, action.cmd);
        let child = command
            .spawn()
            .map_err(|e| Error::Action(format!("failed to spawn {}: {}", action.shell, e)))?;

        let output = child.wait_with_output();
        let output = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = async {
                match timeout {
                    Some(limit) => tokio::time::timeout(limit, output).await.map_err(|_| {
                        Error::Action(format!(
                            "command \"{}\" timed out after {} seconds",
                            action.cmd,
                            limit.as_secs()
                        ))
                    }),
                    None => Ok(output.await),
                }
            } => result??,
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stdout.lines() {
            if action.mute {
                debug!("[action] {}", line);
            } else {
                info!("[action] {}", line);
            }
        }
        for line in stderr.lines() {
            if action.mute {
                debug!("[action] {}", line);
            } else {
                warn!("[action] {}", line);
            }
        }

        if output.status.success() {
            Ok(())
        } else {
            Err(Error::Action(format!(
                "command \"{}\" failed with exit code {}",
                action.cmd,
                output.status.code().unwrap_or(-1)
            )))
        }
    }
}

#[async_trait]
impl ActionRunner for ShellActionRunner {
    async fn run(
        &self,
        defaults: &ActionDefaults,
        actions: &[Action],
        cancel: &CancellationToken,
    ) -> Result<()> {
        for action in actions {
            let resolved = ResolvedAction::resolve(defaults, action)?;
            if let Some(description) = &action.description {
                info!("{}", description);
            }
            self.run_one(&resolved, cancel).await?;
        }
        Ok(())
    }
}
