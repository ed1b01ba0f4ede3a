//! Dispatch of status polls and link commands, away from or inside the tick.
//!
//! [`InlineDispatcher`] runs every job synchronously inside the control loop
//! tick: button latency under load is bounded by the command timeout.
//!
//! [`WorkerDispatcher`] hands jobs to one worker thread over a bounded FIFO
//! channel. The worker owns the [`NodeStatusPoller`] and publishes each new
//! snapshot to a single-slot, latest-wins [`SnapshotSlot`]. A full queue drops
//! the job and logs it; the tick never blocks on the external tool. A
//! respawned worker resumes from the last published snapshot.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::Mutex;

use crate::core::config::DispatchMode;
use crate::core::errors::{CommandError, PanelError, Result};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::node::executor::{CommandRunner, CommandSet, LinkIntent};
use crate::node::status::{NodeStatusPoller, StatusGrammar, StatusSnapshot};

// ──────────────────── dispatcher seam ────────────────────

/// How the scheduler reaches the external tool.
pub trait Dispatcher {
    /// Ask for a status poll. The result arrives via [`Self::take_snapshot`].
    fn request_poll(&mut self);
    /// Fire-and-forget connect/disconnect.
    fn submit(&mut self, intent: LinkIntent);
    /// Newest snapshot published since the last call.
    fn take_snapshot(&mut self) -> Option<StatusSnapshot>;
    fn shutdown(&mut self) {}
    fn mode(&self) -> DispatchMode;
}

/// Everything needed to build a [`JobRunner`]; cheap to clone.
#[derive(Clone)]
pub struct JobContext {
    pub runner: Arc<dyn CommandRunner>,
    pub commands: CommandSet,
    pub grammar: StatusGrammar,
    pub logger: ActivityLoggerHandle,
}

/// Executes poll and link jobs and logs their outcome.
pub struct JobRunner {
    ctx: JobContext,
    poller: NodeStatusPoller,
}

impl JobRunner {
    #[must_use]
    pub fn new(ctx: JobContext) -> Self {
        let poller = NodeStatusPoller::new(
            Arc::clone(&ctx.runner),
            ctx.commands.clone(),
            ctx.grammar.clone(),
        );
        Self { ctx, poller }
    }

    #[must_use]
    pub fn resume(ctx: JobContext, snapshot: Option<StatusSnapshot>) -> Self {
        let mut jobs = Self::new(ctx);
        if let Some(snapshot) = snapshot {
            jobs.poller = jobs.poller.with_snapshot(snapshot);
        }
        jobs
    }

    pub fn poll(&mut self) -> StatusSnapshot {
        let before: Vec<String> = node_ids(self.poller.snapshot());
        let outcome = self
            .poller
            .poll_with_outcome(self.ctx.commands.local_node_id());

        let event = match &outcome.error {
            Some(err) => ActivityEvent::StatusFailed {
                code: err.code().to_string(),
                message: err.to_string(),
                stale: outcome.snapshot.stale,
            },
            None => {
                let nodes = node_ids(&outcome.snapshot);
                ActivityEvent::StatusPolled {
                    changed: nodes != before,
                    nodes,
                    stale: outcome.snapshot.stale,
                }
            }
        };
        self.ctx.logger.send(event);
        outcome.snapshot
    }

    pub fn link(&self, intent: &LinkIntent) {
        let started = Instant::now();
        let action = intent.verb().to_string();
        let node_id = intent.node_id().to_string();

        let event = match self.ctx.commands.dispatch(self.ctx.runner.as_ref(), intent) {
            Ok(()) => ActivityEvent::LinkCompleted {
                action,
                node_id,
                duration_ms: millis(started.elapsed()),
            },
            Err(err @ PanelError::UnsafeArgument { .. }) => ActivityEvent::LinkDropped {
                action,
                node_id,
                reason: err.to_string(),
            },
            Err(err) => ActivityEvent::LinkFailed {
                action,
                node_id,
                code: err.code().to_string(),
                message: err.to_string(),
            },
        };
        self.ctx.logger.send(event);
    }
}

fn node_ids(snapshot: &StatusSnapshot) -> Vec<String> {
    snapshot.nodes.iter().map(|n| n.node_id.clone()).collect()
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn link_requested(logger: &ActivityLoggerHandle, intent: &LinkIntent) {
    logger.send(ActivityEvent::LinkRequested {
        action: intent.verb().to_string(),
        node_id: intent.node_id().to_string(),
    });
}

/// Build the dispatcher selected by `daemon.dispatch`.
pub fn build_dispatcher(
    mode: DispatchMode,
    ctx: JobContext,
    queue_capacity: usize,
) -> Result<Box<dyn Dispatcher>> {
    Ok(match mode {
        DispatchMode::Inline => Box::new(InlineDispatcher::new(ctx)),
        DispatchMode::Worker => Box::new(WorkerDispatcher::spawn(ctx, queue_capacity)?),
    })
}

// ──────────────────── inline ────────────────────

/// Cooperative dispatch: jobs run to completion inside the calling tick.
pub struct InlineDispatcher {
    jobs: JobRunner,
    logger: ActivityLoggerHandle,
    pending: Option<StatusSnapshot>,
}

impl InlineDispatcher {
    #[must_use]
    pub fn new(ctx: JobContext) -> Self {
        let logger = ctx.logger.clone();
        Self {
            jobs: JobRunner::new(ctx),
            logger,
            pending: None,
        }
    }
}

impl Dispatcher for InlineDispatcher {
    fn request_poll(&mut self) {
        self.pending = Some(self.jobs.poll());
    }

    fn submit(&mut self, intent: LinkIntent) {
        link_requested(&self.logger, &intent);
        self.jobs.link(&intent);
    }

    fn take_snapshot(&mut self) -> Option<StatusSnapshot> {
        self.pending.take()
    }

    fn mode(&self) -> DispatchMode {
        DispatchMode::Inline
    }
}

// ──────────────────── worker ────────────────────

#[derive(Debug, Default)]
struct SlotState {
    waiting: Option<StatusSnapshot>,
    last: Option<StatusSnapshot>,
}

/// Latest-wins mailbox between the worker and the control loop.
///
/// Also remembers the last published snapshot after it has been taken.
#[derive(Debug, Clone, Default)]
pub struct SnapshotSlot {
    inner: Arc<Mutex<SlotState>>,
}

impl SnapshotSlot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace whatever is waiting.
    pub fn publish(&self, snapshot: StatusSnapshot) {
        let mut state = self.inner.lock();
        state.last = Some(snapshot.clone());
        state.waiting = Some(snapshot);
    }

    pub fn take(&self) -> Option<StatusSnapshot> {
        self.inner.lock().waiting.take()
    }

    #[must_use]
    pub fn last(&self) -> Option<StatusSnapshot> {
        self.inner.lock().last.clone()
    }
}

#[derive(Debug)]
enum Job {
    Poll,
    Link(LinkIntent),
    Stop,
}

const MAX_RESPAWNS: usize = 3;
const RESPAWN_WINDOW: Duration = Duration::from_secs(300);

/// Panic history of the worker thread.
struct WorkerHealth {
    panic_times: Vec<Instant>,
}

impl WorkerHealth {
    const fn new() -> Self {
        Self {
            panic_times: Vec::new(),
        }
    }

    /// Record a panic. Returns false once the respawn budget is spent.
    fn record_panic(&mut self, now: Instant) -> bool {
        self.panic_times
            .retain(|t| now.duration_since(*t) < RESPAWN_WINDOW);
        self.panic_times.push(now);
        self.panic_times.len() <= MAX_RESPAWNS
    }
}

/// Shared between the dispatcher and its worker thread.
#[derive(Clone)]
struct WorkerShared {
    rx: Receiver<Job>,
    slot: SnapshotSlot,
    poll_queued: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
}

pub struct WorkerDispatcher {
    ctx: JobContext,
    tx: Sender<Job>,
    shared: WorkerShared,
    join: Option<thread::JoinHandle<()>>,
    health: WorkerHealth,
    gave_up: bool,
}

impl WorkerDispatcher {
    pub fn spawn(ctx: JobContext, queue_capacity: usize) -> Result<Self> {
        let (tx, rx) = bounded(queue_capacity.max(1));
        let shared = WorkerShared {
            rx,
            slot: SnapshotSlot::new(),
            poll_queued: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
        };
        let join = spawn_worker(ctx.clone(), shared.clone())?;
        Ok(Self {
            ctx,
            tx,
            shared,
            join: Some(join),
            health: WorkerHealth::new(),
            gave_up: false,
        })
    }

    /// Respawn the worker if it died outside of shutdown.
    fn check_worker(&mut self) {
        let died = self
            .join
            .as_ref()
            .is_some_and(thread::JoinHandle::is_finished);
        if !died || self.shared.stop.load(Ordering::Relaxed) {
            return;
        }

        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
        self.shared.poll_queued.store(false, Ordering::Relaxed);

        if !self.health.record_panic(Instant::now()) {
            if !self.gave_up {
                self.gave_up = true;
                self.ctx.logger.send(ActivityEvent::Error {
                    code: "ASP-3900".to_string(),
                    message: format!(
                        "command worker died {MAX_RESPAWNS} times within {}s; not respawning",
                        RESPAWN_WINDOW.as_secs()
                    ),
                });
            }
            return;
        }

        eprintln!("[ASP-DISPATCH] command worker died, respawning");
        match spawn_worker(self.ctx.clone(), self.shared.clone()) {
            Ok(join) => self.join = Some(join),
            Err(err) => self.ctx.logger.send(ActivityEvent::error(&err)),
        }
    }
}

impl Dispatcher for WorkerDispatcher {
    fn request_poll(&mut self) {
        self.check_worker();
        if self.shared.poll_queued.swap(true, Ordering::Relaxed) {
            return;
        }
        if self.tx.try_send(Job::Poll).is_err() {
            // Queue full; the next status period asks again.
            self.shared.poll_queued.store(false, Ordering::Relaxed);
        }
    }

    fn submit(&mut self, intent: LinkIntent) {
        self.check_worker();
        link_requested(&self.ctx.logger, &intent);
        let action = intent.verb().to_string();
        let node_id = intent.node_id().to_string();
        let reason = match self.tx.try_send(Job::Link(intent)) {
            Ok(()) => return,
            Err(TrySendError::Full(_)) => format!("{}: job queue full", CommandError::Busy),
            Err(TrySendError::Disconnected(_)) => "command worker stopped".to_string(),
        };
        self.ctx.logger.send(ActivityEvent::LinkDropped {
            action,
            node_id,
            reason,
        });
    }

    fn take_snapshot(&mut self) -> Option<StatusSnapshot> {
        self.check_worker();
        self.shared.slot.take()
    }

    fn shutdown(&mut self) {
        self.shared.stop.store(true, Ordering::Relaxed);
        let _ = self.tx.try_send(Job::Stop);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }

    fn mode(&self) -> DispatchMode {
        DispatchMode::Worker
    }
}

impl Drop for WorkerDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_worker(ctx: JobContext, shared: WorkerShared) -> Result<thread::JoinHandle<()>> {
    let jobs = JobRunner::resume(ctx, shared.slot.last());
    thread::Builder::new()
        .name("aspanel-worker".to_string())
        .spawn(move || worker_main(jobs, &shared))
        .map_err(|e| PanelError::Runtime {
            details: format!("failed to spawn command worker: {e}"),
        })
}

fn worker_main(mut jobs: JobRunner, shared: &WorkerShared) {
    while let Ok(job) = shared.rx.recv() {
        if shared.stop.load(Ordering::Relaxed) {
            break;
        }
        match job {
            Job::Poll => {
                shared.poll_queued.store(false, Ordering::Relaxed);
                shared.slot.publish(jobs.poll());
            }
            Job::Link(intent) => jobs.link(&intent),
            Job::Stop => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use crossbeam_channel::Receiver;

    use super::*;
    use crate::core::config::{Config, StatusConfig};
    use crate::node::executor::CommandResult;

    /// Answers status queries with a fixed table and records link commands.
    /// While `hold` is set, every call blocks until a token arrives.
    struct FakeTool {
        status: Mutex<VecDeque<CommandResult>>,
        links: Mutex<Vec<String>>,
        hold: Option<Receiver<()>>,
        panic_once: AtomicBool,
    }

    impl FakeTool {
        fn new(status: Vec<CommandResult>) -> Self {
            Self {
                status: Mutex::new(status.into()),
                links: Mutex::new(Vec::new()),
                hold: None,
                panic_once: AtomicBool::new(false),
            }
        }
    }

    impl CommandRunner for FakeTool {
        fn execute(&self, command: &str, _timeout: Duration) -> CommandResult {
            if let Some(hold) = &self.hold {
                let _ = hold.recv_timeout(Duration::from_secs(5));
            }
            if self.panic_once.swap(false, Ordering::SeqCst) {
                panic!("simulated worker crash");
            }
            if command.contains("lstats") {
                return self
                    .status
                    .lock()
                    .pop_front()
                    .unwrap_or_else(|| Ok("NODE PEER\n".to_string()));
            }
            self.links.lock().push(command.to_string());
            Ok(String::new())
        }
    }

    fn ctx(tool: Arc<FakeTool>) -> (JobContext, Receiver<ActivityEvent>) {
        let mut config = Config::default();
        config.node.local_node_id = "58175".to_string();
        let (logger, events) = ActivityLoggerHandle::capture(256);
        (
            JobContext {
                runner: tool,
                commands: CommandSet::from_config(&config).unwrap(),
                grammar: StatusGrammar::from_config(&StatusConfig::default()).unwrap(),
                logger,
            },
            events,
        )
    }

    fn wait_snapshot(d: &mut dyn Dispatcher) -> StatusSnapshot {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(snap) = d.take_snapshot() {
                return snap;
            }
            assert!(Instant::now() < deadline, "no snapshot published");
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn drain(events: &Receiver<ActivityEvent>) -> Vec<ActivityEvent> {
        events.try_iter().collect()
    }

    #[test]
    fn inline_poll_is_available_immediately() {
        let tool = Arc::new(FakeTool::new(vec![Ok("2000 x ESTABLISHED\n".to_string())]));
        let (ctx, _events) = ctx(tool);
        let mut d = InlineDispatcher::new(ctx);

        assert!(d.take_snapshot().is_none());
        d.request_poll();
        let snap = d.take_snapshot().expect("inline poll publishes synchronously");
        assert_eq!(snap.nodes[0].node_id, "2000");
        assert!(d.take_snapshot().is_none());
    }

    #[test]
    fn inline_link_runs_and_logs() {
        let tool = Arc::new(FakeTool::new(Vec::new()));
        let (ctx, events) = ctx(Arc::clone(&tool));
        let mut d = InlineDispatcher::new(ctx);

        d.submit(LinkIntent::Connect("40894".to_string()));
        assert_eq!(
            tool.links.lock().as_slice(),
            ["sudo asterisk -rx 'rpt cmd 58175 ilink 3 40894'"]
        );
        let events = drain(&events);
        assert!(matches!(events[0], ActivityEvent::LinkRequested { .. }));
        assert!(matches!(events[1], ActivityEvent::LinkCompleted { .. }));
    }

    #[test]
    fn unsafe_link_is_dropped_not_run() {
        let tool = Arc::new(FakeTool::new(Vec::new()));
        let (ctx, events) = ctx(Arc::clone(&tool));
        let mut d = InlineDispatcher::new(ctx);

        d.submit(LinkIntent::Connect("1;reboot".to_string()));
        assert!(tool.links.lock().is_empty());
        assert!(
            drain(&events)
                .iter()
                .any(|e| matches!(e, ActivityEvent::LinkDropped { .. }))
        );
    }

    #[test]
    fn failed_poll_logs_status_failed() {
        let tool = Arc::new(FakeTool::new(vec![Err(CommandError::Timeout {
            after: Duration::from_secs(4),
        })]));
        let (ctx, events) = ctx(tool);
        let mut d = InlineDispatcher::new(ctx);
        d.request_poll();
        assert!(d.take_snapshot().unwrap().stale);
        assert!(
            drain(&events)
                .iter()
                .any(|e| matches!(e, ActivityEvent::StatusFailed { .. }))
        );
    }

    #[test]
    fn worker_publishes_snapshot() {
        let tool = Arc::new(FakeTool::new(vec![Ok(
            "40894 a ESTABLISHED\n2000 b CONNECTING\n".to_string(),
        )]));
        let (ctx, _events) = ctx(tool);
        let mut d = WorkerDispatcher::spawn(ctx, 4).unwrap();

        d.request_poll();
        let snap = wait_snapshot(&mut d);
        assert_eq!(snap.node_count(), 2);
        d.shutdown();
    }

    #[test]
    fn worker_runs_links_in_submission_order() {
        let tool = Arc::new(FakeTool::new(Vec::new()));
        let (ctx, _events) = ctx(Arc::clone(&tool));
        let mut d = WorkerDispatcher::spawn(ctx, 8).unwrap();

        d.submit(LinkIntent::Connect("1000".to_string()));
        d.submit(LinkIntent::Disconnect("2000".to_string()));
        d.request_poll();
        wait_snapshot(&mut d);

        assert_eq!(
            tool.links.lock().as_slice(),
            [
                "sudo asterisk -rx 'rpt cmd 58175 ilink 3 1000'",
                "sudo asterisk -rx 'rpt cmd 58175 ilink 1 2000'",
            ]
        );
        d.shutdown();
    }

    #[test]
    fn full_queue_drops_link_and_logs_busy() {
        let (release, hold) = bounded(16);
        let tool = Arc::new(FakeTool {
            hold: Some(hold),
            ..FakeTool::new(Vec::new())
        });
        let (ctx, events) = ctx(Arc::clone(&tool));
        let mut d = WorkerDispatcher::spawn(ctx, 1).unwrap();

        // First job occupies the worker, second fills the queue.
        d.submit(LinkIntent::Connect("1".to_string()));
        thread::sleep(Duration::from_millis(100));
        d.submit(LinkIntent::Connect("2".to_string()));
        d.submit(LinkIntent::Connect("3".to_string()));

        let dropped: Vec<String> = drain(&events)
            .into_iter()
            .filter_map(|e| match e {
                ActivityEvent::LinkDropped { node_id, reason, .. } => {
                    assert!(reason.contains("busy"));
                    Some(node_id)
                }
                _ => None,
            })
            .collect();
        assert_eq!(dropped, vec!["3".to_string()]);

        for _ in 0..4 {
            let _ = release.send(());
        }
        let deadline = Instant::now() + Duration::from_secs(5);
        while tool.links.lock().len() < 2 {
            assert!(Instant::now() < deadline, "queued link never ran");
            thread::sleep(Duration::from_millis(5));
        }
        d.shutdown();
    }

    #[test]
    fn repeated_poll_requests_collapse() {
        let (release, hold) = bounded(16);
        let tool = Arc::new(FakeTool {
            hold: Some(hold),
            ..FakeTool::new(Vec::new())
        });
        let (ctx, _events) = ctx(tool);
        let mut d = WorkerDispatcher::spawn(ctx, 2).unwrap();

        d.request_poll();
        d.request_poll();
        d.request_poll();
        assert!(d.tx.len() <= 1);

        for _ in 0..4 {
            let _ = release.send(());
        }
        wait_snapshot(&mut d);
        d.shutdown();
    }

    #[test]
    fn worker_respawns_after_panic() {
        let tool = Arc::new(FakeTool::new(vec![Ok("2000 x ESTABLISHED\n".to_string())]));
        tool.panic_once.store(true, Ordering::SeqCst);
        let (ctx, _events) = ctx(tool);
        let mut d = WorkerDispatcher::spawn(ctx, 4).unwrap();

        d.request_poll();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !d.join.as_ref().is_some_and(thread::JoinHandle::is_finished) {
            assert!(Instant::now() < deadline, "worker should have died");
            thread::sleep(Duration::from_millis(5));
        }

        d.request_poll();
        let snap = wait_snapshot(&mut d);
        assert_eq!(snap.nodes[0].node_id, "2000");
        d.shutdown();
    }

    #[test]
    fn respawned_worker_keeps_previous_snapshot_on_failed_poll() {
        let tool = Arc::new(FakeTool::new(vec![
            Ok("1000 a ESTABLISHED\n2000 b ESTABLISHED\n3000 c CONNECTING\n".to_string()),
            Err(CommandError::Timeout {
                after: Duration::from_secs(4),
            }),
        ]));
        let (ctx, _events) = ctx(Arc::clone(&tool));
        let mut d = WorkerDispatcher::spawn(ctx, 4).unwrap();

        d.request_poll();
        let first = wait_snapshot(&mut d);
        assert_eq!(first.node_count(), 3);
        assert!(!first.stale);

        tool.panic_once.store(true, Ordering::SeqCst);
        d.request_poll();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !d.join.as_ref().is_some_and(thread::JoinHandle::is_finished) {
            assert!(Instant::now() < deadline, "worker should have died");
            thread::sleep(Duration::from_millis(5));
        }

        // Respawn, then the status query times out.
        d.request_poll();
        let after = wait_snapshot(&mut d);
        assert!(after.stale);
        assert_eq!(after.nodes, first.nodes);
        assert_eq!(after.last_updated, first.last_updated);
        d.shutdown();
    }

    #[test]
    fn snapshot_slot_remembers_last_published() {
        let slot = SnapshotSlot::new();
        assert_eq!(slot.last(), None);
        let mut snap = StatusSnapshot::default();
        snap.stale = true;
        slot.publish(snap.clone());
        assert_eq!(slot.take(), Some(snap.clone()));
        assert_eq!(slot.last(), Some(snap));
    }

    #[test]
    fn snapshot_slot_is_latest_wins() {
        let slot = SnapshotSlot::new();
        slot.publish(StatusSnapshot::default());
        let mut newer = StatusSnapshot::default();
        newer.stale = true;
        slot.publish(newer.clone());
        assert_eq!(slot.take(), Some(newer));
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn worker_health_limits_respawns() {
        let mut health = WorkerHealth::new();
        let t0 = Instant::now();
        for _ in 0..MAX_RESPAWNS {
            assert!(health.record_panic(t0));
        }
        assert!(!health.record_panic(t0));
        assert!(health.record_panic(t0 + RESPAWN_WINDOW + Duration::from_secs(1)));
    }
}
