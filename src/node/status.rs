//! Node status polling: query the link table, parse it, keep the last good view.
//!
//! The status grammar is line oriented. A *node line* matches
//! `status.node_pattern`, which must expose the named groups `node` and
//! `state`. A *header line* matches `status.header_pattern`. Node and header
//! lines are both structural matches; output with neither is unparseable.

#![allow(missing_docs)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;

use crate::core::config::StatusConfig;
use crate::core::errors::{PanelError, Result};
use crate::node::executor::{CommandRunner, CommandSet};

/// Maximum number of connected nodes tracked and shown.
pub const CONNECTED_CAPACITY: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Connected,
    Connecting,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectedNode {
    pub node_id: String,
    pub link_state: LinkState,
}

impl ConnectedNode {
    #[must_use]
    pub fn new(node_id: impl Into<String>, link_state: LinkState) -> Self {
        Self {
            node_id: node_id.into(),
            link_state,
        }
    }
}

/// Why the latest poll did not produce fresh data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollFault {
    /// The status tool (or the shell) could not be found.
    ToolMissing,
    /// The status command failed, timed out or was refused.
    CommandFailed,
    /// The output had no structural matches.
    Unparseable,
}

impl PollFault {
    fn classify(err: &PanelError) -> Self {
        match err {
            PanelError::Command(cmd) if cmd.is_tool_missing() => Self::ToolMissing,
            PanelError::StatusParse { .. } => Self::Unparseable,
            _ => Self::CommandFailed,
        }
    }
}

/// Last-known connectivity, replaced wholesale on each successful poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub nodes: Vec<ConnectedNode>,
    pub stale: bool,
    /// Time of the last successful poll; `None` before the first one.
    pub last_updated: Option<DateTime<Utc>>,
    pub fault: Option<PollFault>,
}

impl StatusSnapshot {
    #[must_use]
    pub fn fresh(nodes: Vec<ConnectedNode>, at: DateTime<Utc>) -> Self {
        Self {
            nodes,
            stale: false,
            last_updated: Some(at),
            fault: None,
        }
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    fn into_stale(mut self, fault: PollFault) -> Self {
        self.stale = true;
        self.fault = Some(fault);
        self
    }
}

// ──────────────────── grammar ────────────────────

/// Compiled line grammar for status output.
#[derive(Debug, Clone)]
pub struct StatusGrammar {
    node_line: Regex,
    header_line: Option<Regex>,
    connected_tokens: Vec<String>,
    connecting_tokens: Vec<String>,
}

impl StatusGrammar {
    pub fn from_config(config: &StatusConfig) -> Result<Self> {
        let node_line = compile("status.node_pattern", &config.node_pattern)?;
        for group in ["node", "state"] {
            if !node_line.capture_names().flatten().any(|name| name == group) {
                return Err(PanelError::InvalidConfig {
                    details: format!("status.node_pattern must define the named group (?P<{group}>...)"),
                });
            }
        }

        let header_line = if config.header_pattern.trim().is_empty() {
            None
        } else {
            Some(compile("status.header_pattern", &config.header_pattern)?)
        };

        Ok(Self {
            node_line,
            header_line,
            connected_tokens: config.connected_tokens.clone(),
            connecting_tokens: config.connecting_tokens.clone(),
        })
    }

    /// Parse status output into at most [`CONNECTED_CAPACITY`] nodes in
    /// encounter order. Zero structural matches is a `StatusParse` error.
    pub fn parse(&self, output: &str) -> Result<Vec<ConnectedNode>> {
        let mut nodes = Vec::with_capacity(CONNECTED_CAPACITY);
        let mut structural = false;

        for line in output.lines() {
            if let Some(caps) = self.node_line.captures(line) {
                structural = true;
                if nodes.len() < CONNECTED_CAPACITY
                    && let (Some(node), Some(state)) = (caps.name("node"), caps.name("state"))
                {
                    nodes.push(ConnectedNode::new(
                        node.as_str().trim(),
                        self.link_state(state.as_str()),
                    ));
                }
                continue;
            }
            if self
                .header_line
                .as_ref()
                .is_some_and(|header| header.is_match(line))
            {
                structural = true;
            }
        }

        if !structural {
            let preview: String = output.trim().chars().take(80).collect();
            return Err(PanelError::StatusParse {
                details: format!("no node or header lines in {preview:?}"),
            });
        }
        Ok(nodes)
    }

    fn link_state(&self, token: &str) -> LinkState {
        let token = token.trim().to_ascii_uppercase();
        if self.connected_tokens.iter().any(|t| *t == token) {
            LinkState::Connected
        } else if self.connecting_tokens.iter().any(|t| *t == token) {
            LinkState::Connecting
        } else {
            LinkState::Unknown
        }
    }
}

fn compile(name: &str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| PanelError::InvalidConfig {
        details: format!("{name} is not a valid regex: {e}"),
    })
}

// ──────────────────── poller ────────────────────

/// Result of one poll: the snapshot now held, plus the error absorbed (if any).
#[derive(Debug)]
pub struct PollOutcome {
    pub snapshot: StatusSnapshot,
    pub error: Option<PanelError>,
}

/// Runs the status query and owns the last-known snapshot.
pub struct NodeStatusPoller {
    runner: Arc<dyn CommandRunner>,
    commands: CommandSet,
    grammar: StatusGrammar,
    current: StatusSnapshot,
}

impl NodeStatusPoller {
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, commands: CommandSet, grammar: StatusGrammar) -> Self {
        Self {
            runner,
            commands,
            grammar,
            current: StatusSnapshot::default(),
        }
    }

    /// Start from a snapshot held elsewhere, so a failed first poll keeps it.
    #[must_use]
    pub fn with_snapshot(mut self, snapshot: StatusSnapshot) -> Self {
        self.current = snapshot;
        self
    }

    #[must_use]
    pub fn snapshot(&self) -> &StatusSnapshot {
        &self.current
    }

    /// Poll and return the snapshot now held. Never fails.
    pub fn poll(&mut self, local_node_id: &str) -> StatusSnapshot {
        self.poll_with_outcome(local_node_id).snapshot
    }

    pub fn poll_with_outcome(&mut self, local_node_id: &str) -> PollOutcome {
        let error = match self.query(local_node_id) {
            Ok(nodes) => {
                self.current = StatusSnapshot::fresh(nodes, Utc::now());
                None
            }
            Err(err) => {
                let fault = PollFault::classify(&err);
                self.current = if fault == PollFault::Unparseable && self.current.nodes.is_empty() {
                    // Nothing worth keeping; the empty view carries the fault.
                    StatusSnapshot {
                        nodes: Vec::new(),
                        stale: false,
                        last_updated: self.current.last_updated,
                        fault: Some(fault),
                    }
                } else {
                    self.current.clone().into_stale(fault)
                };
                Some(err)
            }
        };

        PollOutcome {
            snapshot: self.current.clone(),
            error,
        }
    }

    fn query(&self, local_node_id: &str) -> Result<Vec<ConnectedNode>> {
        let command = self.commands.status_command(local_node_id)?;
        let output = self.runner.execute(&command, self.commands.timeout())?;
        self.grammar.parse(&output)
    }
}
