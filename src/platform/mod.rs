//! Platform abstraction: system facts and panel hardware.

pub mod hardware;
pub mod pal;
