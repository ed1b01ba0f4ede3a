//! Collapses contact bounce into single logical presses.

use std::time::{Duration, Instant};

use crate::ui::state::Button;

/// Per-button edge debouncer driven by caller-supplied timestamps.
///
/// An edge is accepted only if at least `window` has passed since the last
/// accepted edge of the same button. Rejected edges do not extend the window.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    last_accepted: [Option<Instant>; 2],
    rejected: u64,
}

impl Debouncer {
    /// `window` is the minimum spacing between accepted edges of one button.
    #[must_use]
    pub const fn new(window: Duration) -> Self {
        Self {
            window,
            last_accepted: [None; 2],
            rejected: 0,
        }
    }

    /// Returns `true` if the edge counts as a press.
    pub fn accept(&mut self, button: Button, now: Instant) -> bool {
        let slot = &mut self.last_accepted[button.index()];
        if let Some(prev) = *slot
            && now.saturating_duration_since(prev) < self.window
        {
            self.rejected += 1;
            return false;
        }
        *slot = Some(now);
        true
    }

    /// Edges swallowed as bounce since startup.
    #[must_use]
    pub const fn rejected(&self) -> u64 {
        self.rejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(200);

    #[test]
    fn first_edge_is_accepted() {
        let mut d = Debouncer::new(WINDOW);
        assert!(d.accept(Button::A, Instant::now()));
    }

    #[test]
    fn bounce_inside_window_is_rejected() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(WINDOW);
        assert!(d.accept(Button::A, t0));
        assert!(!d.accept(Button::A, t0 + Duration::from_millis(30)));
        assert!(!d.accept(Button::A, t0 + Duration::from_millis(199)));
        assert!(d.accept(Button::A, t0 + Duration::from_millis(200)));
        assert_eq!(d.rejected(), 2);
    }

    #[test]
    fn rejected_edges_do_not_extend_window() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(WINDOW);
        d.accept(Button::B, t0);
        d.accept(Button::B, t0 + Duration::from_millis(150));
        assert!(d.accept(Button::B, t0 + Duration::from_millis(210)));
    }

    #[test]
    fn buttons_are_independent() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(WINDOW);
        assert!(d.accept(Button::A, t0));
        assert!(d.accept(Button::B, t0 + Duration::from_millis(10)));
    }

    #[test]
    fn zero_window_accepts_everything() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(Duration::ZERO);
        assert!(d.accept(Button::A, t0));
        assert!(d.accept(Button::A, t0));
    }
}
