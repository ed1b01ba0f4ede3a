//! Node side: favorites, the external command executor and status polling.

pub mod executor;
pub mod favorites;
pub mod status;
