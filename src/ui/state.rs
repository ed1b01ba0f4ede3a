//! Navigation state machine for the two-button panel.
//!
//! Button A ("move") advances the cursor, button B ("do") acts on the
//! selection. The item count of each screen is recomputed from the data
//! passed in on every call, and the cursor is clamped into range before it is
//! used.

#![allow(missing_docs)]

use serde::Serialize;

use crate::node::favorites::Favorites;
use crate::node::status::ConnectedNode;

pub use crate::node::executor::LinkIntent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Button {
    /// Advances the selection cursor.
    A,
    /// Executes the action bound to the selection.
    B,
}

impl Button {
    pub const ALL: [Self; 2] = [Self::A, Self::B];

    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::A => 0,
            Self::B => 1,
        }
    }
}

/// Which screen is shown and where the cursor sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "screen", rename_all = "snake_case")]
pub enum UiState {
    /// Items: the favorites entry, then each connected node.
    Main { cursor: usize },
    /// Items: each favorite, then the exit entry.
    Favorites { cursor: usize },
}

impl Default for UiState {
    fn default() -> Self {
        Self::Main { cursor: 0 }
    }
}

/// Read-only data the state machine consults.
#[derive(Debug, Clone, Copy)]
pub struct NavContext<'a> {
    pub connected: &'a [ConnectedNode],
    pub favorites: &'a Favorites,
}

impl UiState {
    #[must_use]
    pub const fn cursor(self) -> usize {
        match self {
            Self::Main { cursor } | Self::Favorites { cursor } => cursor,
        }
    }

    #[must_use]
    pub fn item_count(self, ctx: NavContext<'_>) -> usize {
        match self {
            Self::Main { .. } => 1 + ctx.connected.len(),
            Self::Favorites { .. } => ctx.favorites.len() + 1,
        }
    }

    #[must_use]
    const fn with_cursor(self, cursor: usize) -> Self {
        match self {
            Self::Main { .. } => Self::Main { cursor },
            Self::Favorites { .. } => Self::Favorites { cursor },
        }
    }

    #[must_use]
    fn clamped(self, ctx: NavContext<'_>) -> Self {
        let last = self.item_count(ctx).saturating_sub(1);
        self.with_cursor(self.cursor().min(last))
    }
}

/// Owns the [`UiState`] for the life of the process.
#[derive(Debug, Clone, Default)]
pub struct Navigator {
    state: UiState,
}

impl Navigator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn state(&self) -> UiState {
        self.state
    }

    /// Apply one debounced press. Returns a link request when B lands on a
    /// node or favorite; the request is fire-and-forget.
    pub fn handle(&mut self, button: Button, ctx: NavContext<'_>) -> Option<LinkIntent> {
        let state = self.state.clamped(ctx);
        let count = state.item_count(ctx);

        let (next, intent) = match (state, button) {
            (_, Button::A) => (state.with_cursor((state.cursor() + 1) % count), None),

            (UiState::Main { cursor: 0 }, Button::B) => (UiState::Favorites { cursor: 0 }, None),
            (UiState::Main { cursor }, Button::B) => {
                let intent = ctx
                    .connected
                    .get(cursor - 1)
                    .map(|node| LinkIntent::Disconnect(node.node_id.clone()));
                (state, intent)
            }

            (UiState::Favorites { cursor }, Button::B) => {
                let intent = ctx
                    .favorites
                    .get(cursor)
                    .map(|fav| LinkIntent::Connect(fav.node_id.clone()));
                (UiState::Main { cursor: 0 }, intent)
            }
        };

        self.state = next;
        intent
    }

    /// Clamp the cursor after the data changed. Returns whether it moved.
    pub fn reclamp(&mut self, ctx: NavContext<'_>) -> bool {
        let clamped = self.state.clamped(ctx);
        let changed = clamped != self.state;
        self.state = clamped;
        changed
    }
}
