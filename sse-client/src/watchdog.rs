use std::time::Duration;
use tokio::time::Instant;

/// Tracks when the last frame arrived. A connection that stays silent longer
/// than `threshold` is considered dead even if the transport still looks open.
#[derive(Debug, Clone)]
pub struct Staleness {
    threshold: Duration,
    last_frame: Instant,
}

impl Staleness {
    pub fn new(threshold: Duration, now: Instant) -> Self {
        Self {
            threshold,
            last_frame: now,
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_frame = now;
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_frame) > self.threshold
    }

    /// How often to check: often enough to notice staleness within a quarter
    /// of the threshold.
    pub fn check_interval(&self) -> Duration {
        (self.threshold / 4).max(Duration::from_millis(1))
    }
}
