//! PAL trait for the environment queries shown on the main screen.

#![allow(missing_docs)]

use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use crate::core::errors::{PanelError, Result};

const PROC_UPTIME: &str = "/proc/uptime";

/// OS abstraction for best-effort system facts.
pub trait Platform: Send + Sync {
    fn local_ip_address(&self) -> Result<IpAddr>;
    fn uptime(&self) -> Result<Duration>;
}

/// Linux implementation backed by `/proc` and the routing table.
#[derive(Debug, Clone)]
pub struct LinuxPlatform {
    /// Any routable address; no packet is sent to it.
    probe_target: SocketAddr,
}

impl Default for LinuxPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl LinuxPlatform {
    #[must_use]
    pub fn new() -> Self {
        Self {
            probe_target: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)), 9),
        }
    }
}

impl Platform for LinuxPlatform {
    fn local_ip_address(&self) -> Result<IpAddr> {
        // Connecting a UDP socket only selects a route and source address.
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .and_then(|socket| socket.connect(self.probe_target).map(|()| socket))
            .and_then(|socket| socket.local_addr())
            .map_err(|e| PanelError::Runtime {
                details: format!("no local address: {e}"),
            })?;
        let ip = socket.ip();
        if ip.is_unspecified() {
            return Err(PanelError::Runtime {
                details: "no local address: route has no source".to_string(),
            });
        }
        Ok(ip)
    }

    fn uptime(&self) -> Result<Duration> {
        let raw = fs::read_to_string(PROC_UPTIME).map_err(|e| PanelError::io(PROC_UPTIME, e))?;
        parse_proc_uptime(&raw)
    }
}

/// In-memory mock implementation for deterministic tests.
#[derive(Debug, Clone, Default)]
pub struct MockPlatform {
    ip: Option<IpAddr>,
    uptime: Option<Duration>,
}

impl MockPlatform {
    #[must_use]
    pub const fn new(ip: Option<IpAddr>, uptime: Option<Duration>) -> Self {
        Self { ip, uptime }
    }
}

impl Platform for MockPlatform {
    fn local_ip_address(&self) -> Result<IpAddr> {
        self.ip.ok_or_else(|| PanelError::Runtime {
            details: "mock ip unavailable".to_string(),
        })
    }

    fn uptime(&self) -> Result<Duration> {
        self.uptime.ok_or_else(|| PanelError::Runtime {
            details: "mock uptime unavailable".to_string(),
        })
    }
}

/// Detect active platform implementation.
pub fn detect_platform() -> Result<Arc<dyn Platform>> {
    #[cfg(target_os = "linux")]
    {
        Ok(Arc::new(LinuxPlatform::new()))
    }
    #[cfg(not(target_os = "linux"))]
    {
        Err(PanelError::UnsupportedPlatform {
            details: "only Linux is currently implemented".to_string(),
        })
    }
}

/// A value that may not have been read yet, or whose read failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reading<T> {
    Loading,
    Ready(T),
    Failed,
}

impl<T> Default for Reading<T> {
    fn default() -> Self {
        Self::Loading
    }
}

impl<T> Reading<T> {
    fn from_result(result: Result<T>) -> Self {
        result.map_or(Self::Failed, Self::Ready)
    }
}

/// Header facts for the main screen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SystemInfo {
    pub ip: Reading<IpAddr>,
    pub uptime: Reading<Duration>,
}

impl SystemInfo {
    /// Query both facts. Failures become [`Reading::Failed`].
    #[must_use]
    pub fn read(platform: &dyn Platform) -> Self {
        Self {
            ip: Reading::from_result(platform.local_ip_address()),
            uptime: Reading::from_result(platform.uptime()),
        }
    }
}

fn parse_proc_uptime(raw: &str) -> Result<Duration> {
    let first = raw.split_whitespace().next().unwrap_or_default();
    let secs: f64 = first.parse().map_err(|e| PanelError::Runtime {
        details: format!("invalid {PROC_UPTIME} contents {raw:?}: {e}"),
    })?;
    Duration::try_from_secs_f64(secs).map_err(|e| PanelError::Runtime {
        details: format!("invalid uptime {secs}: {e}"),
    })
}
