//! Operator-facing side: navigation, debouncing and view composition.

pub mod debounce;
pub mod state;
pub mod view;
