//! Daemon subsystem: the control loop, command dispatch, signal handling and
//! systemd notification.

pub mod dispatch;
#[cfg(feature = "daemon")]
pub mod loop_main;
#[cfg(feature = "daemon")]
pub mod signals;
