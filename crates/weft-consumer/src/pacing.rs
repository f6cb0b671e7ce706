//! Presentation schedule.

use std::time::{Duration, Instant};
use weft_core::FrameRate;

/// Tracks when the next frame is due. The first frame after a reset is due
/// immediately and each presented (or dropped) frame moves the deadline one
/// frame duration on, so the schedule does not drift with render time.
#[derive(Debug, Clone)]
pub struct Pacer {
    frame_duration: Duration,
    next: Option<Instant>,
}

impl Pacer {
    pub fn new(rate: FrameRate) -> Self {
        Self {
            frame_duration: rate.frame_duration(),
            next: None,
        }
    }

    pub fn frame_duration(&self) -> Duration {
        self.frame_duration
    }

    /// Deadline of the next frame, anchoring the schedule at `now` if unset.
    pub fn due(&mut self, now: Instant) -> Instant {
        *self.next.get_or_insert(now)
    }

    /// How far past its deadline the next frame is at `now`.
    pub fn lateness(&mut self, now: Instant) -> Duration {
        now.saturating_duration_since(self.due(now))
    }

    pub fn advance(&mut self) {
        if let Some(next) = self.next.as_mut() {
            *next += self.frame_duration;
        }
    }

    /// Forget the schedule; the next frame anchors a new one.
    pub fn reset(&mut self) {
        self.next = None;
    }
}
