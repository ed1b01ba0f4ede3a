//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{PanelError, Result};
use crate::node::executor::{CommandTemplate, is_safe_argument};
use crate::node::status::StatusGrammar;

/// Full panel configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub node: NodeConfig,
    pub commands: CommandsConfig,
    pub status: StatusConfig,
    pub timing: TimingConfig,
    pub hardware: HardwareConfig,
    pub daemon: DaemonConfig,
    pub logging: LoggingConfig,
    /// Where this configuration was loaded from (not serialized).
    #[serde(skip)]
    pub source: PathBuf,
}

/// Identity of the managed node and the favorites source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NodeConfig {
    /// Node number this panel manages.
    pub local_node_id: String,
    pub favorites_path: PathBuf,
}

/// External command templates. `{local}` is the local node id, `{node}` the
/// remote node id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CommandsConfig {
    pub shell: PathBuf,
    pub status_template: String,
    pub connect_template: String,
    pub disconnect_template: String,
    pub timeout_ms: u64,
}

/// Line grammar for the status query output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StatusConfig {
    /// Regex with named groups `node` and `state`; one match per node line.
    pub node_pattern: String,
    /// Regex recognizing a table header. Empty disables header detection.
    pub header_pattern: String,
    pub connected_tokens: Vec<String>,
    pub connecting_tokens: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimingConfig {
    pub render_interval_ms: u64,
    pub status_poll_interval_ms: u64,
    pub button_sample_interval_ms: u64,
    pub button_debounce_ms: u64,
    pub system_info_interval_ms: u64,
    /// Delay before the first status poll so the radio stack can come up.
    pub startup_delay_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum HardwareBackend {
    /// GPIO value files for the buttons, JSON frame file for the renderer.
    #[default]
    Sysfs,
    /// stdin `a`/`b` lines for the buttons, text frames on stdout.
    Console,
}

impl HardwareBackend {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sysfs => "sysfs",
            Self::Console => "console",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sysfs" => Some(Self::Sysfs),
            "console" => Some(Self::Console),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HardwareConfig {
    pub backend: HardwareBackend,
    pub button_a_path: PathBuf,
    pub button_b_path: PathBuf,
    /// Buttons pull the line low when pressed.
    pub active_low: bool,
    /// Where the composed frame is published for the pixel renderer.
    pub frame_path: PathBuf,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Status polling and link commands run on a worker thread.
    #[default]
    Worker,
    /// Everything runs inside the control loop tick.
    Inline,
}

impl DispatchMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Worker => "worker",
            Self::Inline => "inline",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "worker" => Some(Self::Worker),
            "inline" => Some(Self::Inline),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DaemonConfig {
    pub dispatch: DispatchMode,
    /// Pending jobs allowed in the worker queue before new ones are dropped.
    pub job_queue_capacity: usize,
    /// Systemd watchdog timeout in seconds (0 = disabled).
    pub watchdog_sec: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// JSONL activity log file. `None` writes to stderr.
    pub jsonl_path: Option<PathBuf>,
    pub max_size_bytes: u64,
    pub max_rotated_files: u32,
    pub channel_capacity: usize,
    /// Also log button presses, renders and routine polls.
    pub verbose: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            local_node_id: String::new(),
            favorites_path: PathBuf::from("/etc/aspanel/favorites.txt"),
        }
    }
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            shell: PathBuf::from("/bin/sh"),
            status_template: "sudo asterisk -rx 'rpt lstats {local}'".to_string(),
            connect_template: "sudo asterisk -rx 'rpt cmd {local} ilink 3 {node}'".to_string(),
            disconnect_template: "sudo asterisk -rx 'rpt cmd {local} ilink 1 {node}'".to_string(),
            timeout_ms: 4_000,
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            node_pattern: r"^\s*(?P<node>\d+)\s.*?\b(?P<state>[A-Z]+)\s*$".to_string(),
            header_pattern: r"^\s*NODE\s".to_string(),
            connected_tokens: vec!["ESTABLISHED".to_string()],
            connecting_tokens: vec!["CONNECTING".to_string()],
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            render_interval_ms: 1_000,
            status_poll_interval_ms: 5_000,
            button_sample_interval_ms: 100,
            button_debounce_ms: 200,
            system_info_interval_ms: 10_000,
            startup_delay_ms: 10_000,
        }
    }
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            backend: HardwareBackend::Sysfs,
            button_a_path: PathBuf::from("/sys/class/gpio/gpio23/value"),
            button_b_path: PathBuf::from("/sys/class/gpio/gpio24/value"),
            active_low: true,
            frame_path: PathBuf::from("/run/aspanel/frame.json"),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchMode::Worker,
            job_queue_capacity: 8,
            watchdog_sec: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            jsonl_path: None,
            max_size_bytes: 10 * 1024 * 1024,
            max_rotated_files: 3,
            channel_capacity: 256,
            verbose: false,
        }
    }
}

impl Config {
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathBuf::from("/etc/aspanel/config.toml")
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        let cfg = Self::load_unvalidated(path)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read file and env overrides without running validation.
    pub fn load_unvalidated(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| PanelError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let mut parsed: Self = toml::from_str(&raw)?;
            parsed.source = path_buf;
            parsed
        } else if is_explicit_path {
            return Err(PanelError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize();
        Ok(cfg)
    }

    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // node
        if let Some(raw) = lookup("ASP_NODE_LOCAL_NODE_ID") {
            self.node.local_node_id = raw;
        }
        if let Some(raw) = lookup("ASP_NODE_FAVORITES_PATH") {
            self.node.favorites_path = PathBuf::from(raw);
        }

        // commands
        if let Some(raw) = lookup("ASP_COMMANDS_TIMEOUT_MS") {
            self.commands.timeout_ms = parse_env_u64("ASP_COMMANDS_TIMEOUT_MS", &raw)?;
        }

        // timing
        for (name, slot) in [
            (
                "ASP_TIMING_RENDER_INTERVAL_MS",
                &mut self.timing.render_interval_ms,
            ),
            (
                "ASP_TIMING_STATUS_POLL_INTERVAL_MS",
                &mut self.timing.status_poll_interval_ms,
            ),
            (
                "ASP_TIMING_BUTTON_SAMPLE_INTERVAL_MS",
                &mut self.timing.button_sample_interval_ms,
            ),
            (
                "ASP_TIMING_BUTTON_DEBOUNCE_MS",
                &mut self.timing.button_debounce_ms,
            ),
            (
                "ASP_TIMING_SYSTEM_INFO_INTERVAL_MS",
                &mut self.timing.system_info_interval_ms,
            ),
            (
                "ASP_TIMING_STARTUP_DELAY_MS",
                &mut self.timing.startup_delay_ms,
            ),
        ] {
            if let Some(raw) = lookup(name) {
                *slot = parse_env_u64(name, &raw)?;
            }
        }

        // hardware
        if let Some(raw) = lookup("ASP_HARDWARE_BACKEND") {
            self.hardware.backend =
                HardwareBackend::parse(&raw).ok_or_else(|| PanelError::ConfigParse {
                    context: "env",
                    details: format!("ASP_HARDWARE_BACKEND={raw:?}: expected sysfs or console"),
                })?;
        }
        if let Some(raw) = lookup("ASP_HARDWARE_FRAME_PATH") {
            self.hardware.frame_path = PathBuf::from(raw);
        }

        // daemon
        if let Some(raw) = lookup("ASP_DAEMON_DISPATCH") {
            self.daemon.dispatch =
                DispatchMode::parse(&raw).ok_or_else(|| PanelError::ConfigParse {
                    context: "env",
                    details: format!("ASP_DAEMON_DISPATCH={raw:?}: expected worker or inline"),
                })?;
        }
        if let Some(raw) = lookup("ASP_DAEMON_WATCHDOG_SEC") {
            self.daemon.watchdog_sec = parse_env_u64("ASP_DAEMON_WATCHDOG_SEC", &raw)?;
        }

        // logging
        if let Some(raw) = lookup("ASP_LOGGING_JSONL_PATH") {
            self.logging.jsonl_path = Some(PathBuf::from(raw));
        }
        if let Some(raw) = lookup("ASP_LOGGING_VERBOSE") {
            self.logging.verbose = parse_env_bool("ASP_LOGGING_VERBOSE", &raw)?;
        }

        Ok(())
    }

    fn normalize(&mut self) {
        self.node.local_node_id = self.node.local_node_id.trim().to_string();
        for token in self
            .status
            .connected_tokens
            .iter_mut()
            .chain(self.status.connecting_tokens.iter_mut())
        {
            *token = token.trim().to_ascii_uppercase();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.node.local_node_id.is_empty() {
            return Err(PanelError::InvalidConfig {
                details: "node.local_node_id must be set".to_string(),
            });
        }
        if !is_safe_argument(&self.node.local_node_id) {
            return Err(PanelError::InvalidConfig {
                details: format!(
                    "node.local_node_id {:?} may only contain letters, digits, '.', '_' or '-'",
                    self.node.local_node_id
                ),
            });
        }

        CommandTemplate::parse("commands.status_template", &self.commands.status_template)?
            .require_placeholder("{local}")?;
        CommandTemplate::parse("commands.connect_template", &self.commands.connect_template)?
            .require_placeholder("{node}")?;
        CommandTemplate::parse(
            "commands.disconnect_template",
            &self.commands.disconnect_template,
        )?
        .require_placeholder("{node}")?;

        if self.commands.timeout_ms == 0 {
            return Err(PanelError::InvalidConfig {
                details: "commands.timeout_ms must be > 0".to_string(),
            });
        }

        for (name, val) in [
            ("render_interval_ms", self.timing.render_interval_ms),
            ("status_poll_interval_ms", self.timing.status_poll_interval_ms),
            (
                "button_sample_interval_ms",
                self.timing.button_sample_interval_ms,
            ),
            ("system_info_interval_ms", self.timing.system_info_interval_ms),
        ] {
            if val == 0 {
                return Err(PanelError::InvalidConfig {
                    details: format!("timing.{name} must be > 0"),
                });
            }
        }

        if self.timing.button_sample_interval_ms > self.timing.render_interval_ms {
            return Err(PanelError::InvalidConfig {
                details: format!(
                    "timing.button_sample_interval_ms ({}) must be <= timing.render_interval_ms ({})",
                    self.timing.button_sample_interval_ms, self.timing.render_interval_ms
                ),
            });
        }

        StatusGrammar::from_config(&self.status)?;

        if self.daemon.job_queue_capacity == 0 {
            return Err(PanelError::InvalidConfig {
                details: "daemon.job_queue_capacity must be >= 1".to_string(),
            });
        }

        if self.logging.channel_capacity == 0 {
            return Err(PanelError::InvalidConfig {
                details: "logging.channel_capacity must be >= 1".to_string(),
            });
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env_u64(name: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse::<u64>()
        .map_err(|error| PanelError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}

fn parse_env_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(PanelError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: expected a boolean"),
        }),
    }
}
