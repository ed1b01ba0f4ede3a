//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use allstar_panel::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{CommandError, PanelError, Result};

// Node
pub use crate::node::executor::{CommandRunner, CommandSet, LinkIntent, ShellExecutor};
pub use crate::node::favorites::{Favorite, Favorites, FavoritesStore, parse_favorites};
pub use crate::node::status::{
    ConnectedNode, LinkState, NodeStatusPoller, StatusGrammar, StatusSnapshot,
};

// UI
pub use crate::ui::state::{Button, Navigator, UiState};
pub use crate::ui::view::{ViewModel, compose, render_text};

// Platform
pub use crate::platform::hardware::{ButtonInput, FrameSink, PanelHardware};
pub use crate::platform::pal::{Platform, SystemInfo, detect_platform};

// Daemon
pub use crate::daemon::dispatch::{Dispatcher, InlineDispatcher, WorkerDispatcher};
#[cfg(feature = "daemon")]
pub use crate::daemon::loop_main::{PanelDaemon, RunArgs, Scheduler};
