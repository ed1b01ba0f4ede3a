//! Activity logging: a dedicated logger thread owns the [`JsonlWriter`].
//!
//! Every other thread sends [`ActivityEvent`]s through a bounded crossbeam
//! channel with `try_send`, so neither the control loop nor the command
//! worker ever blocks on logging back-pressure. Dropped events are counted
//! and reported by the logger thread.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::config::LoggingConfig;
use crate::core::errors::{PanelError, Result};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

// ──────────────────── public event type ────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityEvent {
    DaemonStarted {
        version: String,
        config_hash: String,
        local_node_id: String,
        dispatch: String,
    },
    DaemonStopped {
        reason: String,
        uptime_secs: u64,
        bounces_rejected: u64,
    },
    FavoritesLoaded {
        path: String,
        count: usize,
        malformed: usize,
        overflow: usize,
    },
    ButtonPressed {
        button: String,
        screen: String,
        cursor: usize,
    },
    StatusPolled {
        nodes: Vec<String>,
        stale: bool,
        /// Whether the node list differs from the previous snapshot.
        changed: bool,
    },
    StatusFailed {
        code: String,
        message: String,
        stale: bool,
    },
    LinkRequested {
        action: String,
        node_id: String,
    },
    LinkCompleted {
        action: String,
        node_id: String,
        duration_ms: u64,
    },
    LinkFailed {
        action: String,
        node_id: String,
        code: String,
        message: String,
    },
    /// The request never reached the executor (queue full, unsafe id).
    LinkDropped {
        action: String,
        node_id: String,
        reason: String,
    },
    RenderCompleted {
        screen: String,
        duration_ms: u64,
    },
    RenderFailed {
        code: String,
        message: String,
    },
    Error {
        code: String,
        message: String,
    },
    /// Sentinel to request graceful shutdown of the logger thread.
    Shutdown,
}

impl ActivityEvent {
    /// Routine events only logged when `logging.verbose` is set.
    #[must_use]
    pub const fn is_verbose_only(&self) -> bool {
        matches!(
            self,
            Self::ButtonPressed { .. }
                | Self::RenderCompleted { .. }
                | Self::StatusPolled { changed: false, .. }
        )
    }

    #[must_use]
    pub fn error(err: &PanelError) -> Self {
        Self::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

// ──────────────────── public handle ────────────────────

/// Cheaply-cloneable handle for sending log events. Never blocks.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
    verbose: bool,
}

impl ActivityLoggerHandle {
    /// Send an event to the logger thread. A full channel drops the event
    /// and bumps the dropped-events counter.
    pub fn send(&self, event: ActivityEvent) {
        if !self.verbose && event.is_verbose_only() {
            return;
        }
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
        // Disconnected is fine during shutdown.
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Request graceful shutdown of the logger thread.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }

    /// A handle whose events land in the returned receiver instead of a
    /// logger thread. Every event passes the verbosity filter.
    #[must_use]
    pub fn capture(capacity: usize) -> (Self, Receiver<ActivityEvent>) {
        let (tx, rx) = bounded(capacity);
        (
            Self {
                tx,
                dropped_events: Arc::new(AtomicU64::new(0)),
                verbose: true,
            },
            rx,
        )
    }
}

// ──────────────────── configuration ────────────────────

#[derive(Debug, Clone)]
pub struct ActivityLoggerConfig {
    pub jsonl_config: JsonlConfig,
    pub channel_capacity: usize,
    pub verbose: bool,
}

impl From<&LoggingConfig> for ActivityLoggerConfig {
    fn from(logging: &LoggingConfig) -> Self {
        Self {
            jsonl_config: JsonlConfig::from(logging),
            channel_capacity: logging.channel_capacity,
            verbose: logging.verbose,
        }
    }
}

// ──────────────────── spawn ────────────────────

/// Spawn the logger thread. It runs until `handle.shutdown()` is called or
/// every handle is dropped.
pub fn spawn_logger(
    config: ActivityLoggerConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ActivityEvent>(config.channel_capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_clone = Arc::clone(&dropped);

    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: dropped,
        verbose: config.verbose,
    };

    let jsonl_config = config.jsonl_config;
    let join = thread::Builder::new()
        .name("aspanel-logger".to_string())
        .spawn(move || logger_thread_main(&rx, jsonl_config, &dropped_clone))
        .map_err(|e| PanelError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

// ──────────────────── logger thread ────────────────────

fn logger_thread_main(rx: &Receiver<ActivityEvent>, config: JsonlConfig, dropped: &AtomicU64) {
    let mut jsonl = JsonlWriter::open(config);

    while let Ok(event) = rx.recv() {
        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!("{d} log events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        if matches!(event, ActivityEvent::Shutdown) {
            break;
        }

        jsonl.write_entry(&event_to_log_entry(&event));
        if rx.is_empty() {
            jsonl.flush();
        }
    }

    jsonl.flush();
    jsonl.fsync();
}

// ──────────────────── event conversion ────────────────────

#[allow(clippy::too_many_lines)]
fn event_to_log_entry(event: &ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::DaemonStarted {
            version,
            config_hash,
            local_node_id,
            dispatch,
        } => {
            let mut e = LogEntry::new(EventType::DaemonStart, Severity::Info);
            e.node_id = Some(local_node_id.clone());
            e.details = Some(format!(
                "version={version} config_hash={config_hash} dispatch={dispatch}"
            ));
            e.ok = Some(true);
            e
        }
        ActivityEvent::DaemonStopped {
            reason,
            uptime_secs,
            bounces_rejected,
        } => {
            let mut e = LogEntry::new(EventType::DaemonStop, Severity::Info);
            e.details = Some(format!(
                "reason={reason} uptime={uptime_secs}s bounces_rejected={bounces_rejected}"
            ));
            e.ok = Some(true);
            e
        }
        ActivityEvent::FavoritesLoaded {
            path,
            count,
            malformed,
            overflow,
        } => {
            let severity = if *malformed > 0 || *overflow > 0 {
                Severity::Warning
            } else {
                Severity::Info
            };
            let mut e = LogEntry::new(EventType::FavoritesLoad, severity);
            e.count = Some(*count);
            e.details = Some(format!("path={path} malformed={malformed} overflow={overflow}"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::ButtonPressed {
            button,
            screen,
            cursor,
        } => {
            let mut e = LogEntry::new(EventType::ButtonPress, Severity::Debug);
            e.button = Some(button.clone());
            e.screen = Some(screen.clone());
            e.cursor = Some(*cursor);
            e
        }
        ActivityEvent::StatusPolled {
            nodes,
            stale,
            changed,
        } => {
            let severity = if *changed { Severity::Info } else { Severity::Debug };
            let mut e = LogEntry::new(EventType::StatusPoll, severity);
            e.count = Some(nodes.len());
            e.nodes = Some(nodes.clone());
            e.stale = Some(*stale);
            e.ok = Some(true);
            e
        }
        ActivityEvent::StatusFailed {
            code,
            message,
            stale,
        } => {
            let mut e = LogEntry::new(EventType::StatusPoll, Severity::Warning);
            e.stale = Some(*stale);
            e.ok = Some(false);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e
        }
        ActivityEvent::LinkRequested { action, node_id } => {
            let mut e = LogEntry::new(EventType::LinkRequest, Severity::Info);
            e.action = Some(action.clone());
            e.node_id = Some(node_id.clone());
            e
        }
        ActivityEvent::LinkCompleted {
            action,
            node_id,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::LinkResult, Severity::Info);
            e.action = Some(action.clone());
            e.node_id = Some(node_id.clone());
            e.duration_ms = Some(*duration_ms);
            e.ok = Some(true);
            e
        }
        ActivityEvent::LinkFailed {
            action,
            node_id,
            code,
            message,
        } => {
            let mut e = LogEntry::new(EventType::LinkResult, Severity::Warning);
            e.action = Some(action.clone());
            e.node_id = Some(node_id.clone());
            e.ok = Some(false);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e
        }
        ActivityEvent::LinkDropped {
            action,
            node_id,
            reason,
        } => {
            let mut e = LogEntry::new(EventType::LinkRequest, Severity::Warning);
            e.action = Some(action.clone());
            e.node_id = Some(node_id.clone());
            e.ok = Some(false);
            e.details = Some(reason.clone());
            e
        }
        ActivityEvent::RenderCompleted {
            screen,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::Render, Severity::Debug);
            e.screen = Some(screen.clone());
            e.duration_ms = Some(*duration_ms);
            e.ok = Some(true);
            e
        }
        ActivityEvent::RenderFailed { code, message } => {
            let mut e = LogEntry::new(EventType::Render, Severity::Warning);
            e.ok = Some(false);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e
        }
        ActivityEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Critical);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e.ok = Some(false);
            e
        }
        ActivityEvent::Shutdown => LogEntry::new(EventType::DaemonStop, Severity::Info),
    }
}

// ──────────────────── tests ────────────────────
