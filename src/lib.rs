#![forbid(unsafe_code)]

//! AllStarLink front panel (aspanel): a two-button controller for a small
//! display attached to a Raspberry Pi running an AllStarLink node.
//!
//! The panel shows the node's IP address, uptime and up to three connected
//! nodes, and lets the operator connect one of six favorite nodes or
//! disconnect a connected one:
//! 1. **Status**: the node CLI is polled on a fixed cadence and its output
//!    parsed into a snapshot
//! 2. **Navigation**: button A moves the cursor, button B acts on it
//! 3. **Rendering**: a view model is composed and handed to the display
//!
//! # Library usage
//!
//! ```rust,no_run
//! use allstar_panel::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use allstar_panel::core::config::Config;
//! use allstar_panel::node::favorites::parse_favorites;
//! ```

pub mod prelude;

pub mod core;
pub mod daemon;
pub mod logger;
pub mod node;
pub mod platform;
pub mod ui;
