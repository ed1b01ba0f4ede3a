//! Command executor: the single choke point for every external invocation.
//!
//! [`ShellExecutor`] runs `shell -c <command>` in its own process group,
//! waits with a deadline, and kills the whole group on timeout. A gate mutex
//! keeps at most one invocation in flight; [`CommandRunner::execute`] queues
//! behind it in arrival order.

#![allow(missing_docs)]

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, bounded};
use parking_lot::Mutex;
use serde::Serialize;

use crate::core::config::Config;
use crate::core::errors::{CommandError, PanelError, Result};

/// Result of one external command: stdout on success.
pub type CommandResult = std::result::Result<String, CommandError>;

/// Interval between `try_wait` checks while a child runs.
const WAIT_STEP: Duration = Duration::from_millis(10);
/// How long to wait for pipe readers after the child has exited.
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(250);
/// Failure output kept in `ExitNonZero` (characters).
const MAX_FAILURE_OUTPUT: usize = 512;

/// Anything that can run a rendered command line with a time bound.
pub trait CommandRunner: Send + Sync {
    fn execute(&self, command: &str, timeout: Duration) -> CommandResult;
}

/// Runs commands through a POSIX shell.
#[derive(Debug)]
pub struct ShellExecutor {
    shell: PathBuf,
    gate: Mutex<()>,
}

impl ShellExecutor {
    #[must_use]
    pub fn new(shell: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
            gate: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn shell(&self) -> &Path {
        &self.shell
    }

    fn run_exclusive(&self, command: &str, timeout: Duration) -> CommandResult {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = cmd.spawn().map_err(|e| CommandError::SpawnFailure {
            details: format!("{}: {e}", self.shell.display()),
        })?;

        let stdout_rx = child.stdout.take().map(|pipe| drain_pipe("aspanel-stdout", pipe));
        let stderr_rx = child.stderr.take().map(|pipe| drain_pipe("aspanel-stderr", pipe));

        let deadline = Instant::now() + timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(e) => {
                    kill_group(&mut child);
                    return Err(CommandError::SpawnFailure {
                        details: format!("wait failed: {e}"),
                    });
                }
            }

            let now = Instant::now();
            if now >= deadline {
                kill_group(&mut child);
                let _ = child.wait();
                return Err(CommandError::Timeout { after: timeout });
            }
            thread::sleep(WAIT_STEP.min(deadline - now));
        };

        let stdout = collect(stdout_rx.as_ref());
        if status.success() {
            // A background process still holding stdout means the read is cut short.
            return stdout.ok_or_else(|| {
                kill_group(&mut child);
                CommandError::Timeout {
                    after: PIPE_DRAIN_GRACE,
                }
            });
        }

        let stdout = stdout.unwrap_or_default();
        let stderr = collect(stderr_rx.as_ref()).unwrap_or_default();
        let output = if stderr.trim().is_empty() { stdout } else { stderr };
        Err(CommandError::ExitNonZero {
            code: status.code(),
            output: output.trim().chars().take(MAX_FAILURE_OUTPUT).collect(),
        })
    }
}

impl CommandRunner for ShellExecutor {
    fn execute(&self, command: &str, timeout: Duration) -> CommandResult {
        let _guard = self.gate.lock();
        self.run_exclusive(command, timeout)
    }
}

fn drain_pipe<R>(name: &str, mut pipe: R) -> Receiver<String>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = bounded(1);
    let spawned = thread::Builder::new().name(name.to_string()).spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
    });
    if let Err(e) = spawned {
        eprintln!("[ASP-EXEC] failed to spawn pipe reader: {e}");
    }
    rx
}

/// `None` when the reader did not reach end-of-file within the grace period.
fn collect(rx: Option<&Receiver<String>>) -> Option<String> {
    match rx {
        Some(rx) => rx.recv_timeout(PIPE_DRAIN_GRACE).ok(),
        None => Some(String::new()),
    }
}

fn kill_group(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        if let Ok(pid) = i32::try_from(child.id())
            && killpg(Pid::from_raw(pid), Signal::SIGKILL).is_ok()
        {
            return;
        }
    }
    let _ = child.kill();
}

/// Characters allowed in a value substituted into a shell command.
#[must_use]
pub fn is_safe_argument(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// A command line with `{local}` / `{node}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    name: String,
    raw: String,
}

impl CommandTemplate {
    pub fn parse(name: &str, raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Err(PanelError::InvalidConfig {
                details: format!("{name} must not be empty"),
            });
        }
        Ok(Self {
            name: name.to_string(),
            raw: raw.to_string(),
        })
    }

    pub fn require_placeholder(&self, placeholder: &str) -> Result<()> {
        if self.raw.contains(placeholder) {
            Ok(())
        } else {
            Err(PanelError::InvalidConfig {
                details: format!("{} must contain {placeholder}", self.name),
            })
        }
    }

    /// Substitute ids. Both must pass [`is_safe_argument`].
    pub fn render(&self, local_node_id: &str, node_id: Option<&str>) -> Result<String> {
        for value in std::iter::once(local_node_id).chain(node_id) {
            if !is_safe_argument(value) {
                return Err(PanelError::UnsafeArgument {
                    value: value.to_string(),
                });
            }
        }
        let rendered = self.raw.replace("{local}", local_node_id);
        Ok(match node_id {
            Some(node) => rendered.replace("{node}", node),
            None => rendered,
        })
    }
}

/// A connect or disconnect request emitted by the navigation state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "node_id", rename_all = "snake_case")]
pub enum LinkIntent {
    Connect(String),
    Disconnect(String),
}

impl LinkIntent {
    #[must_use]
    pub fn node_id(&self) -> &str {
        match self {
            Self::Connect(node) | Self::Disconnect(node) => node,
        }
    }

    #[must_use]
    pub const fn verb(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Disconnect(_) => "disconnect",
        }
    }
}

/// The three configured templates bound to the local node.
#[derive(Debug, Clone)]
pub struct CommandSet {
    local_node_id: String,
    status: CommandTemplate,
    connect: CommandTemplate,
    disconnect: CommandTemplate,
    timeout: Duration,
}

impl CommandSet {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            local_node_id: config.node.local_node_id.clone(),
            status: CommandTemplate::parse(
                "commands.status_template",
                &config.commands.status_template,
            )?,
            connect: CommandTemplate::parse(
                "commands.connect_template",
                &config.commands.connect_template,
            )?,
            disconnect: CommandTemplate::parse(
                "commands.disconnect_template",
                &config.commands.disconnect_template,
            )?,
            timeout: Duration::from_millis(config.commands.timeout_ms),
        })
    }

    #[must_use]
    pub fn local_node_id(&self) -> &str {
        &self.local_node_id
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn status_command(&self, local_node_id: &str) -> Result<String> {
        self.status.render(local_node_id, None)
    }

    pub fn link_command(&self, intent: &LinkIntent) -> Result<String> {
        let template = match intent {
            LinkIntent::Connect(_) => &self.connect,
            LinkIntent::Disconnect(_) => &self.disconnect,
        };
        template.render(&self.local_node_id, Some(intent.node_id()))
    }

    /// Render and run a link command; the output is discarded.
    pub fn dispatch(&self, runner: &dyn CommandRunner, intent: &LinkIntent) -> Result<()> {
        let command = self.link_command(intent)?;
        runner.execute(&command, self.timeout)?;
        Ok(())
    }
}
