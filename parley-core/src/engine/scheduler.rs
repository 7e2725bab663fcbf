//! Sequential playback scheduling.
//!
//! Inbound chunks arrive with unknown total length and irregular spacing.
//! Each one is placed at `max(cursor, now)`: back to back with the previous
//! chunk when it arrives in time, immediately when the queue has drained.
//! The cursor only moves forward, so scheduled slots never overlap.

/// Where one chunk was placed on the host playback clock (seconds).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSlot {
    pub start: f64,
    pub end: f64,
}

impl ScheduledSlot {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

#[derive(Debug, Default)]
pub struct PlaybackScheduler {
    cursor: f64,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// End time of everything scheduled so far.
    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    /// Whether everything scheduled has finished playing at `now`.
    pub fn is_drained(&self, now: f64) -> bool {
        now >= self.cursor
    }

    /// Align the cursor to the host clock at session start.
    pub fn reset(&mut self, now: f64) {
        self.cursor = now;
    }

    /// Reserve `duration` seconds of playback. Never blocks.
    pub fn schedule(&mut self, duration: f64, now: f64) -> ScheduledSlot {
        let duration = if duration.is_finite() { duration.max(0.0) } else { 0.0 };
        let start = self.cursor.max(now);
        self.cursor = start + duration;
        ScheduledSlot {
            start,
            end: self.cursor,
        }
    }
}
