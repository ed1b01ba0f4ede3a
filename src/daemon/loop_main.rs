//! Control loop: one thread, one clock, three cadences.
//!
//! The [`Scheduler`] owns all panel state (navigation, favorites, the latest
//! status snapshot, header facts) and is driven by [`Scheduler::tick`]:
//! - every tick (~100ms): sample both buttons, debounce, feed presses to the
//!   navigator and hand link requests to the dispatcher
//! - status period (5s, after a startup delay): request a poll; adopt any
//!   published snapshot and re-clamp the cursor
//! - render period (1s), or right after any state change: compose the view
//!   model and draw it
//!
//! [`PanelDaemon`] wires the scheduler to real hardware, the shell executor,
//! the logger thread, signals and the systemd watchdog.

#![allow(missing_docs)]

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::core::config::{Config, DispatchMode, HardwareBackend, TimingConfig};
use crate::core::errors::{PanelError, Result};
use crate::daemon::dispatch::{Dispatcher, JobContext, build_dispatcher};
use crate::daemon::signals::{SignalHandler, WatchdogHeartbeat, notify_ready, notify_stopping};
use crate::logger::activity::{
    ActivityEvent, ActivityLoggerConfig, ActivityLoggerHandle, spawn_logger,
};
use crate::node::executor::{CommandSet, ShellExecutor};
use crate::node::favorites::{Favorites, FavoritesStore};
use crate::node::status::{StatusGrammar, StatusSnapshot};
use crate::platform::hardware::{ButtonEdge, ButtonInput, FrameSink, PanelHardware};
use crate::platform::pal::{MockPlatform, Platform, SystemInfo, detect_platform};
use crate::ui::debounce::Debouncer;
use crate::ui::state::{Button, NavContext, Navigator, UiState};
use crate::ui::view::{ViewModel, compose};

// ──────────────────── run arguments ────────────────────

/// Command-line overrides for `aspanel run`.
#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    /// Use stdin/stdout instead of GPIO and the frame file.
    pub console: bool,
    /// Run polls and link commands inside the control loop.
    pub inline: bool,
}

impl RunArgs {
    pub fn apply(&self, config: &mut Config) {
        if self.console {
            config.hardware.backend = HardwareBackend::Console;
        }
        if self.inline {
            config.daemon.dispatch = DispatchMode::Inline;
        }
    }
}

// ──────────────────── scheduler ────────────────────

/// Cadences of the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    pub render: Duration,
    pub status: Duration,
    pub sample: Duration,
    pub debounce: Duration,
    pub system_info: Duration,
    pub startup_delay: Duration,
}

impl From<&TimingConfig> for Cadence {
    fn from(timing: &TimingConfig) -> Self {
        Self {
            render: Duration::from_millis(timing.render_interval_ms),
            status: Duration::from_millis(timing.status_poll_interval_ms),
            sample: Duration::from_millis(timing.button_sample_interval_ms),
            debounce: Duration::from_millis(timing.button_debounce_ms),
            system_info: Duration::from_millis(timing.system_info_interval_ms),
            startup_delay: Duration::from_millis(timing.startup_delay_ms),
        }
    }
}

/// Collaborators handed to the scheduler.
pub struct SchedulerParts {
    pub buttons: Box<dyn ButtonInput>,
    pub frames: Box<dyn FrameSink>,
    pub dispatcher: Box<dyn Dispatcher>,
    pub platform: Arc<dyn Platform>,
    pub favorites: Favorites,
    pub logger: ActivityLoggerHandle,
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickOutcome {
    pub presses: usize,
    pub poll_requested: bool,
    pub snapshot_adopted: bool,
    pub rendered: bool,
}

/// Sole owner and mutator of panel state. Not reentrant.
pub struct Scheduler {
    navigator: Navigator,
    debouncer: Debouncer,
    favorites: Favorites,
    snapshot: StatusSnapshot,
    system: SystemInfo,
    buttons: Box<dyn ButtonInput>,
    frames: Box<dyn FrameSink>,
    dispatcher: Box<dyn Dispatcher>,
    platform: Arc<dyn Platform>,
    logger: ActivityLoggerHandle,
    cadence: Cadence,
    next_render: Instant,
    next_poll: Instant,
    next_system_info: Instant,
    poll_pending: bool,
    dirty: bool,
    last_input_error: Option<String>,
    render_failures: u64,
}

impl Scheduler {
    /// The first poll is held back by the startup delay; the first tick
    /// reads the header facts and draws.
    pub fn new(parts: SchedulerParts, cadence: Cadence, now: Instant) -> Self {
        Self {
            navigator: Navigator::new(),
            debouncer: Debouncer::new(cadence.debounce),
            favorites: parts.favorites,
            snapshot: StatusSnapshot::default(),
            system: SystemInfo::default(),
            buttons: parts.buttons,
            frames: parts.frames,
            dispatcher: parts.dispatcher,
            platform: parts.platform,
            logger: parts.logger,
            cadence,
            next_render: now,
            next_poll: now + cadence.startup_delay,
            next_system_info: now,
            poll_pending: false,
            dirty: true,
            last_input_error: None,
            render_failures: 0,
        }
    }

    pub const fn state(&self) -> UiState {
        self.navigator.state()
    }

    pub const fn snapshot(&self) -> &StatusSnapshot {
        &self.snapshot
    }

    pub const fn favorites(&self) -> &Favorites {
        &self.favorites
    }

    pub const fn system_info(&self) -> SystemInfo {
        self.system
    }

    pub const fn render_failures(&self) -> u64 {
        self.render_failures
    }

    /// Button edges swallowed as contact bounce.
    pub const fn bounces_rejected(&self) -> u64 {
        self.debouncer.rejected()
    }

    pub fn dispatch_mode(&self) -> DispatchMode {
        self.dispatcher.mode()
    }

    /// Poll on the next tick regardless of the status period.
    pub fn poll_now(&mut self) {
        self.poll_pending = true;
    }

    /// The frame as it would be drawn right now.
    pub fn view(&self) -> ViewModel {
        compose(
            self.navigator.state(),
            &self.snapshot,
            &self.favorites,
            &self.system,
        )
    }

    /// One-line summary for the watchdog status.
    pub fn status_line(&self) -> String {
        format!(
            "screen={} nodes={}{}",
            screen_name(self.navigator.state()),
            self.snapshot.node_count(),
            if self.snapshot.stale { " (stale)" } else { "" }
        )
    }

    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        let mut outcome = TickOutcome::default();

        // 1. Buttons.
        for button in Button::ALL {
            match self.buttons.read_edge(button) {
                Ok(ButtonEdge::Pressed) if self.debouncer.accept(button, now) => {
                    self.press(button);
                    outcome.presses += 1;
                }
                Ok(_) => {}
                Err(err) => self.input_error(&err),
            }
        }

        // 2. Status.
        if self.poll_pending || now >= self.next_poll {
            self.poll_pending = false;
            self.next_poll = now + self.cadence.status;
            self.dispatcher.request_poll();
            outcome.poll_requested = true;
        }
        if let Some(snapshot) = self.dispatcher.take_snapshot() {
            self.adopt(snapshot);
            outcome.snapshot_adopted = true;
        }

        // 3. Header facts.
        if now >= self.next_system_info {
            self.next_system_info = now + self.cadence.system_info;
            let system = SystemInfo::read(self.platform.as_ref());
            if system != self.system {
                self.system = system;
                self.dirty = true;
            }
        }

        // 4. Frame.
        if self.dirty || now >= self.next_render {
            self.render();
            self.next_render = now + self.cadence.render;
            self.dirty = false;
            outcome.rendered = true;
        }

        outcome
    }

    pub fn shutdown(&mut self) {
        self.dispatcher.shutdown();
    }

    fn press(&mut self, button: Button) {
        let ctx = NavContext {
            connected: &self.snapshot.nodes,
            favorites: &self.favorites,
        };
        let intent = self.navigator.handle(button, ctx);
        let state = self.navigator.state();

        self.logger.send(ActivityEvent::ButtonPressed {
            button: button_name(button).to_string(),
            screen: screen_name(state).to_string(),
            cursor: state.cursor(),
        });
        if let Some(intent) = intent {
            self.dispatcher.submit(intent);
        }
        self.dirty = true;
    }

    fn adopt(&mut self, snapshot: StatusSnapshot) {
        if snapshot != self.snapshot {
            self.dirty = true;
        }
        self.snapshot = snapshot;
        let ctx = NavContext {
            connected: &self.snapshot.nodes,
            favorites: &self.favorites,
        };
        if self.navigator.reclamp(ctx) {
            self.dirty = true;
        }
    }

    fn render(&mut self) {
        let started = Instant::now();
        let view = self.view();
        match self.frames.draw(&view) {
            Ok(()) => {
                self.logger.send(ActivityEvent::RenderCompleted {
                    screen: screen_name(self.navigator.state()).to_string(),
                    duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                });
            }
            Err(err) => {
                self.render_failures += 1;
                self.logger.send(ActivityEvent::RenderFailed {
                    code: err.code().to_string(),
                    message: err.to_string(),
                });
            }
        }
    }

    /// Log input failures once per distinct message; the loop samples ten
    /// times a second.
    fn input_error(&mut self, err: &PanelError) {
        let message = err.to_string();
        if self.last_input_error.as_deref() == Some(message.as_str()) {
            return;
        }
        self.logger.send(ActivityEvent::error(err));
        self.last_input_error = Some(message);
    }
}

const fn button_name(button: Button) -> &'static str {
    match button {
        Button::A => "a",
        Button::B => "b",
    }
}

const fn screen_name(state: UiState) -> &'static str {
    match state {
        UiState::Main { .. } => "main",
        UiState::Favorites { .. } => "favorites",
    }
}

/// Load favorites, degrading to an empty list when the file is unusable.
pub fn load_favorites(path: &Path, logger: &ActivityLoggerHandle) -> Favorites {
    match FavoritesStore::load(path) {
        Ok(report) => {
            logger.send(ActivityEvent::FavoritesLoaded {
                path: path.display().to_string(),
                count: report.favorites.len(),
                malformed: report.malformed_lines,
                overflow: report.overflow_lines,
            });
            report.favorites
        }
        Err(err) => {
            logger.send(ActivityEvent::error(&err));
            eprintln!("[ASP-DAEMON] {err}; continuing without favorites");
            Favorites::empty()
        }
    }
}

// ──────────────────── daemon ────────────────────

pub struct PanelDaemon {
    config: Config,
    scheduler: Scheduler,
    logger_handle: ActivityLoggerHandle,
    logger_join: Option<thread::JoinHandle<()>>,
    signal_handler: SignalHandler,
    watchdog: WatchdogHeartbeat,
    start_time: Instant,
}

impl PanelDaemon {
    /// Build the daemon. Hardware that cannot be opened is fatal; everything
    /// else degrades.
    pub fn init(mut config: Config, args: &RunArgs) -> Result<Self> {
        args.apply(&mut config);
        let start_time = Instant::now();

        // 1. Logger.
        let (logger_handle, logger_join) =
            spawn_logger(ActivityLoggerConfig::from(&config.logging))?;

        // 2. Everything the scheduler needs.
        let scheduler = match Self::assemble(&config, &logger_handle, start_time) {
            Ok(scheduler) => scheduler,
            Err(err) => {
                logger_handle.send(ActivityEvent::error(&err));
                logger_handle.shutdown();
                let _ = logger_join.join();
                return Err(err);
            }
        };

        // 3. Signals and watchdog.
        let signal_handler = SignalHandler::new();
        let watchdog = WatchdogHeartbeat::new(config.daemon.watchdog_sec);

        Ok(Self {
            config,
            scheduler,
            logger_handle,
            logger_join: Some(logger_join),
            signal_handler,
            watchdog,
            start_time,
        })
    }

    fn assemble(config: &Config, logger: &ActivityLoggerHandle, now: Instant) -> Result<Scheduler> {
        let hardware = PanelHardware::open(&config.hardware)?;
        let favorites = load_favorites(&config.node.favorites_path, logger);

        let platform: Arc<dyn Platform> = detect_platform().unwrap_or_else(|err| {
            logger.send(ActivityEvent::error(&err));
            Arc::new(MockPlatform::default())
        });

        let ctx = JobContext {
            runner: Arc::new(ShellExecutor::new(config.commands.shell.clone())),
            commands: CommandSet::from_config(config)?,
            grammar: StatusGrammar::from_config(&config.status)?,
            logger: logger.clone(),
        };
        let dispatcher = build_dispatcher(
            config.daemon.dispatch,
            ctx,
            config.daemon.job_queue_capacity,
        )?;

        Ok(Scheduler::new(
            SchedulerParts {
                buttons: hardware.buttons,
                frames: hardware.frames,
                dispatcher,
                platform,
                favorites,
                logger: logger.clone(),
            },
            Cadence::from(&config.timing),
            now,
        ))
    }

    /// Handle for stopping the loop from another thread.
    pub fn signal_handler(&self) -> SignalHandler {
        self.signal_handler.clone()
    }

    /// Run until SIGTERM/SIGINT.
    pub fn run(&mut self) -> Result<()> {
        let config_hash = self.config.stable_hash().unwrap_or_default();
        self.logger_handle.send(ActivityEvent::DaemonStarted {
            version: env!("CARGO_PKG_VERSION").to_string(),
            config_hash,
            local_node_id: self.config.node.local_node_id.clone(),
            dispatch: self.scheduler.dispatch_mode().as_str().to_string(),
        });
        eprintln!(
            "[ASP-DAEMON] started (node={}, hardware={}, dispatch={})",
            self.config.node.local_node_id,
            self.config.hardware.backend.as_str(),
            self.scheduler.dispatch_mode().as_str()
        );
        notify_ready(&format!("panel for node {}", self.config.node.local_node_id));

        let tick = Cadence::from(&self.config.timing).sample;

        // ──────── control loop ────────
        loop {
            if self.signal_handler.should_shutdown() {
                eprintln!("[ASP-DAEMON] shutdown requested");
                break;
            }
            if self.signal_handler.should_poll() {
                eprintln!("[ASP-DAEMON] status poll requested (SIGUSR1)");
                self.scheduler.poll_now();
            }

            let started = Instant::now();
            self.scheduler.tick(started);
            self.watchdog.maybe_notify(&self.scheduler.status_line());

            if let Some(rest) = tick.checked_sub(started.elapsed()) {
                thread::sleep(rest);
            }
        }

        self.shutdown("signal");
        Ok(())
    }

    fn shutdown(&mut self, reason: &str) {
        let uptime_secs = self.start_time.elapsed().as_secs();
        notify_stopping();

        // 1. Stop the command worker (waits for an in-flight command).
        self.scheduler.shutdown();

        // 2. Log shutdown.
        self.logger_handle.send(ActivityEvent::DaemonStopped {
            reason: reason.to_string(),
            uptime_secs,
            bounces_rejected: self.scheduler.bounces_rejected(),
        });
        let dropped = self.logger_handle.dropped_events();
        if dropped > 0 {
            eprintln!("[ASP-DAEMON] {dropped} log events dropped");
        }

        // 3. Logger thread.
        self.logger_handle.shutdown();
        if let Some(join) = self.logger_join.take() {
            let _ = join.join();
        }

        eprintln!("[ASP-DAEMON] shutdown complete (uptime={uptime_secs}s)");
    }
}
