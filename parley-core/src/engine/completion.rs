//! Turn completion detection.
//!
//! There is no explicit "agent finished" message on the wire, so the end of
//! a turn is inferred from the playback cursor: once the host clock is
//! `margin` past the end of everything scheduled, the turn is over. A
//! trailing chunk that arrives inside the margin pushes the cursor out and
//! the turn keeps going.
//!
//! Polled by the session actor on a fixed interval.

use std::time::Duration;

use tracing::debug;

/// Silence after the last scheduled chunk before the user gets the floor.
///
/// This is a lower bound. The release is noticed on the next poll, so the
/// gate opens between `margin` and `margin + poll interval` after playback.
pub const DEFAULT_TURN_RELEASE_MARGIN: Duration = Duration::from_millis(800);

/// How long the final agent turn may play out before the session ends.
pub const DEFAULT_FINAL_TURN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Hand the floor to the user.
    TurnEnded,
    /// The closing turn has played out; end the session.
    SessionEnded,
}

#[derive(Debug)]
pub struct TurnCompletionDetector {
    margin: f64,
    grace: f64,
    armed: bool,
    final_marked_at: Option<f64>,
    session_ended: bool,
}

impl Default for TurnCompletionDetector {
    fn default() -> Self {
        Self::new(DEFAULT_TURN_RELEASE_MARGIN, DEFAULT_FINAL_TURN_GRACE)
    }
}

impl TurnCompletionDetector {
    pub fn new(margin: Duration, grace: Duration) -> Self {
        Self {
            margin: margin.as_secs_f64(),
            grace: grace.as_secs_f64(),
            armed: false,
            final_marked_at: None,
            session_ended: false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn is_final_turn(&self) -> bool {
        self.final_marked_at.is_some()
    }

    /// Agent audio was scheduled (or cancelled); start watching for the end.
    pub fn arm(&mut self) {
        self.armed = true;
    }

    /// A new agent turn began without audio yet.
    pub fn disarm(&mut self) {
        self.armed = false;
    }

    /// The current agent turn is the last one. Idempotent; the first mark wins.
    pub fn mark_final_turn(&mut self, now: f64) {
        if self.final_marked_at.is_none() {
            debug!(at = now, "final agent turn");
            self.final_marked_at = Some(now);
        }
    }

    /// Check for completion at host time `now` with the scheduler's `cursor`.
    ///
    /// `TurnEnded` fires once per armed turn. `SessionEnded` fires once per
    /// detector; while a final turn is marked, `TurnEnded` is suppressed.
    pub fn poll(&mut self, now: f64, cursor: f64) -> Option<Completion> {
        if self.session_ended {
            return None;
        }

        if let Some(marked_at) = self.final_marked_at {
            if now >= cursor.max(marked_at) + self.grace {
                self.session_ended = true;
                self.armed = false;
                return Some(Completion::SessionEnded);
            }
            return None;
        }

        if self.armed && now >= cursor + self.margin {
            self.armed = false;
            return Some(Completion::TurnEnded);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> TurnCompletionDetector {
        TurnCompletionDetector::default()
    }

    #[test]
    fn unarmed_detector_never_fires() {
        let mut d = detector();
        assert_eq!(d.poll(100.0, 0.0), None);
    }

    #[test]
    fn fires_once_after_margin() {
        let mut d = detector();
        d.arm();
        assert_eq!(d.poll(2.0, 2.0), None);
        assert_eq!(d.poll(2.79, 2.0), None);
        assert_eq!(d.poll(2.81, 2.0), Some(Completion::TurnEnded));
        assert_eq!(d.poll(3.5, 2.0), None);
    }

    #[test]
    fn late_chunk_extends_the_turn() {
        let mut d = detector();
        d.arm();
        assert_eq!(d.poll(1.5, 1.0), None);
        // Another chunk lands before the margin elapsed.
        d.arm();
        assert_eq!(d.poll(1.9, 2.5), None);
        assert_eq!(d.poll(3.31, 2.5), Some(Completion::TurnEnded));
    }

    #[test]
    fn disarm_cancels_pending_release() {
        let mut d = detector();
        d.arm();
        d.disarm();
        assert_eq!(d.poll(10.0, 0.0), None);
    }

    #[test]
    fn final_turn_ends_session_after_grace() {
        let mut d = detector();
        d.arm();
        d.mark_final_turn(1.0);
        // Audio runs until 3.0; grace counts from there.
        assert_eq!(d.poll(4.0, 3.0), None);
        assert_eq!(d.poll(7.99, 3.0), None);
        assert_eq!(d.poll(8.0, 3.0), Some(Completion::SessionEnded));
        assert_eq!(d.poll(20.0, 3.0), None);
    }

    #[test]
    fn final_turn_without_audio_counts_from_mark() {
        let mut d = detector();
        d.mark_final_turn(2.0);
        d.mark_final_turn(4.0);
        assert_eq!(d.poll(6.9, 0.0), None);
        assert_eq!(d.poll(7.0, 0.0), Some(Completion::SessionEnded));
    }

    #[test]
    fn custom_margin_is_respected() {
        let mut d = TurnCompletionDetector::new(Duration::from_millis(100), Duration::from_secs(1));
        d.arm();
        assert_eq!(d.poll(1.05, 1.0), None);
        assert_eq!(d.poll(1.11, 1.0), Some(Completion::TurnEnded));
    }
}
