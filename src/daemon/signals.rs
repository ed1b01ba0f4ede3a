//! Signal handling and systemd notification.
//!
//! SIGTERM/SIGINT request a graceful shutdown; SIGUSR1 requests an immediate
//! status poll. Flags are registered with `signal-hook` and polled by the
//! control loop each tick.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use signal_hook::consts::{SIGINT, SIGTERM};

// ──────────────────── signal handler ────────────────────

/// Signal state shared between the OS hooks and the control loop.
#[derive(Clone)]
pub struct SignalHandler {
    shutdown_flag: Arc<AtomicBool>,
    poll_flag: Arc<AtomicBool>,
}

impl SignalHandler {
    /// Create a handler and register OS signal hooks. Registration failures
    /// are reported on stderr and otherwise ignored.
    pub fn new() -> Self {
        let handler = Self::unregistered();
        handler.register_signals();
        handler
    }

    /// Flags only; nothing is hooked. For tests and embedded use.
    #[must_use]
    pub fn unregistered() -> Self {
        Self {
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            poll_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn should_shutdown(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    /// Check (and clear) whether an immediate poll was requested.
    pub fn should_poll(&self) -> bool {
        self.poll_flag.swap(false, Ordering::Relaxed)
    }

    pub fn request_shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::Relaxed);
    }

    pub fn request_poll(&self) {
        self.poll_flag.store(true, Ordering::Relaxed);
    }

    fn register_signals(&self) {
        for (signal, name) in [(SIGTERM, "SIGTERM"), (SIGINT, "SIGINT")] {
            if let Err(e) = signal_hook::flag::register(signal, Arc::clone(&self.shutdown_flag)) {
                eprintln!("[ASP-SIGNAL] failed to register {name}: {e}");
            }
        }

        #[cfg(unix)]
        {
            use signal_hook::consts::SIGUSR1;
            if let Err(e) = signal_hook::flag::register(SIGUSR1, Arc::clone(&self.poll_flag)) {
                eprintln!("[ASP-SIGNAL] failed to register SIGUSR1: {e}");
            }
        }
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

// ──────────────────── watchdog heartbeat ────────────────────

/// Sends `WATCHDOG=1` at half the configured systemd watchdog timeout.
pub struct WatchdogHeartbeat {
    interval: Duration,
    last_beat: Instant,
    enabled: bool,
}

impl WatchdogHeartbeat {
    /// `watchdog_sec` is the full systemd `WatchdogSec`; 0 disables.
    pub fn new(watchdog_sec: u64) -> Self {
        Self {
            interval: Duration::from_millis(watchdog_sec.saturating_mul(500)),
            last_beat: Instant::now(),
            enabled: watchdog_sec > 0,
        }
    }

    pub fn disabled() -> Self {
        Self::new(0)
    }

    /// Returns `true` if a notification was sent.
    pub fn maybe_notify(&mut self, status: &str) -> bool {
        if !self.enabled || self.last_beat.elapsed() < self.interval {
            return false;
        }
        self.last_beat = Instant::now();
        sd_notify(&format!("WATCHDOG=1\nSTATUS={status}\n"));
        true
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Tell systemd (`Type=notify`) that startup finished.
pub fn notify_ready(status: &str) {
    sd_notify(&format!("READY=1\nSTATUS={status}\n"));
}

/// Tell systemd that shutdown has begun.
pub fn notify_stopping() {
    sd_notify("STOPPING=1\n");
}

/// No-op unless `NOTIFY_SOCKET` is set.
fn sd_notify(message: &str) {
    #[cfg(target_os = "linux")]
    {
        use std::os::unix::net::UnixDatagram;

        let socket_path = match std::env::var("NOTIFY_SOCKET") {
            Ok(p) if !p.is_empty() => p,
            _ => return,
        };
        if let Ok(sock) = UnixDatagram::unbound() {
            let _ = sock.send_to(message.as_bytes(), &socket_path);
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = message;
    }
}

// ──────────────────── tests ────────────────────
