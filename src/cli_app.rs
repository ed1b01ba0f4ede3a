//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use allstar_panel::core::config::Config;
use allstar_panel::core::errors::PanelError;
use allstar_panel::daemon::loop_main::{PanelDaemon, RunArgs};
use allstar_panel::node::executor::{CommandSet, ShellExecutor};
use allstar_panel::node::favorites::{FAVORITES_CAPACITY, FavoritesStore};
use allstar_panel::node::status::{LinkState, NodeStatusPoller, StatusGrammar};
use allstar_panel::ui::view::node_label;

/// Front panel controller for an AllStarLink node.
#[derive(Debug, Parser)]
#[command(
    name = "aspanel",
    author,
    version,
    about = "AllStarLink two-button front panel",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Log routine events (button presses, renders, unchanged polls).
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run the panel daemon.
    Run(RunCommandArgs),
    /// Poll the node once and print the connected nodes.
    Status,
    /// Load and print the favorites list.
    Favorites(FavoritesArgs),
    /// Inspect configuration.
    Config(ConfigArgs),
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct RunCommandArgs {
    /// Read buttons from stdin (`a`/`b` lines) and print frames to stdout.
    #[arg(long)]
    console: bool,
    /// Run status polls and link commands inside the control loop.
    #[arg(long)]
    inline: bool,
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct FavoritesArgs {
    /// Favorites file (defaults to `node.favorites_path`).
    #[arg(long, value_name = "PATH")]
    path: Option<PathBuf>,
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct ConfigArgs {
    /// Config operation to run.
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand, Serialize)]
enum ConfigCommand {
    /// Print resolved config file path.
    Path,
    /// Print effective merged configuration.
    Show,
    /// Validate configuration and exit.
    Validate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input or configuration.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
        }
    }
}

impl From<PanelError> for CliError {
    fn from(err: PanelError) -> Self {
        match err {
            PanelError::InvalidConfig { .. }
            | PanelError::MissingConfig { .. }
            | PanelError::ConfigParse { .. }
            | PanelError::UnsafeArgument { .. } => Self::User(err.to_string()),
            other => Self::Runtime(other.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    match &cli.command {
        Command::Run(args) => run_daemon(cli, args),
        Command::Status => run_status(cli),
        Command::Favorites(args) => run_favorites(cli, args),
        Command::Config(args) => run_config(cli, args),
    }
}

fn load_config(cli: &Cli) -> Result<Config, CliError> {
    let mut config = Config::load(cli.config.as_deref())?;
    if cli.verbose {
        config.logging.verbose = true;
    }
    Ok(config)
}

// ──────────────────── run ────────────────────

fn run_daemon(cli: &Cli, args: &RunCommandArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let run_args = RunArgs {
        console: args.console,
        inline: args.inline,
    };
    let mut daemon = PanelDaemon::init(config, &run_args)?;
    daemon.run()?;
    Ok(())
}

// ──────────────────── status ────────────────────

fn run_status(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let commands = CommandSet::from_config(&config)?;
    let grammar = StatusGrammar::from_config(&config.status)?;
    let runner = Arc::new(ShellExecutor::new(config.commands.shell.clone()));
    let mut poller = NodeStatusPoller::new(runner, commands, grammar);

    let outcome = poller.poll_with_outcome(&config.node.local_node_id);
    // Labels fall back to "Node" when the favorites file is unusable.
    let favorites = FavoritesStore::load(&config.node.favorites_path)
        .map(|report| report.favorites)
        .unwrap_or_default();

    match output_mode(cli) {
        OutputMode::Human => {
            println!("Node {}", config.node.local_node_id);
            if outcome.snapshot.nodes.is_empty() {
                println!("  no connected nodes");
            }
            for node in &outcome.snapshot.nodes {
                println!(
                    "  {:<24} {}",
                    node_label(&node.node_id, &favorites),
                    link_state_name(node.link_state)
                );
            }
            if let Some(err) = &outcome.error {
                eprintln!("status poll failed: {err}");
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "status",
                "local_node_id": config.node.local_node_id,
                "snapshot": serde_json::to_value(&outcome.snapshot)?,
                "error": outcome.error.as_ref().map(|e| json!({
                    "code": e.code(),
                    "message": e.to_string(),
                    "retryable": e.is_retryable(),
                })),
            });
            write_json_line(&payload)?;
        }
    }

    match outcome.error {
        Some(err) => Err(CliError::Runtime(format!("status poll failed: {err}"))),
        None => Ok(()),
    }
}

const fn link_state_name(state: LinkState) -> &'static str {
    match state {
        LinkState::Connected => "connected",
        LinkState::Connecting => "connecting",
        LinkState::Unknown => "unknown",
    }
}

// ──────────────────── favorites ────────────────────

fn run_favorites(cli: &Cli, args: &FavoritesArgs) -> Result<(), CliError> {
    let path = match &args.path {
        Some(path) => path.clone(),
        // Listing favorites does not need a node id.
        None => Config::load_unvalidated(cli.config.as_deref())?
            .node
            .favorites_path,
    };
    let report = FavoritesStore::load(&path)?;

    match output_mode(cli) {
        OutputMode::Human => {
            println!(
                "{} ({}/{FAVORITES_CAPACITY} favorites)",
                path.display(),
                report.favorites.len()
            );
            for (i, fav) in report.favorites.iter().enumerate() {
                println!("  {}. {:<20} {}", i + 1, fav.name, fav.node_id);
            }
            if report.malformed_lines > 0 {
                println!("  skipped {} malformed line(s)", report.malformed_lines);
            }
            if report.overflow_lines > 0 {
                println!(
                    "  ignored {} line(s) past the first {FAVORITES_CAPACITY}",
                    report.overflow_lines
                );
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "favorites",
                "path": path.to_string_lossy(),
                "favorites": serde_json::to_value(&report.favorites)?,
                "malformed_lines": report.malformed_lines,
                "overflow_lines": report.overflow_lines,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

// ──────────────────── config ────────────────────

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = Config::load_unvalidated(cli.config.as_deref())?;

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;

                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Source: {}", source_label(&config));
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": true,
                            "path": source_label(&config),
                            "hash": hash,
                        });
                        write_json_line(&payload)?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => {
                        eprintln!("Configuration is INVALID: {e}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": false,
                            "code": e.code(),
                            "error": e.to_string(),
                        });
                        write_json_line(&payload)?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

fn source_label(config: &Config) -> String {
    if config.source.as_os_str().is_empty() {
        "(defaults)".to_string()
    } else {
        config.source.display().to_string()
    }
}

// ──────────────────── output ────────────────────

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("ASP_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
