use std::time::Duration;

/// Delay before the first retry after a failure.
pub const DEFAULT_RETRY_FLOOR: Duration = Duration::from_millis(250);

/// Geometric retry delay: floor on the first failure, then ×1.5, never above the ceiling.
#[derive(Debug, Clone)]
pub struct Backoff {
    floor: Duration,
    ceiling: Duration,
    current: Option<Duration>,
}

impl Backoff {
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        Self {
            floor,
            ceiling,
            current: None,
        }
    }

    /// Record a failure and return how long to wait before retrying.
    pub fn next_delay(&mut self) -> Duration {
        let next = match self.current {
            None => self.floor,
            Some(previous) => previous.saturating_add(previous / 2),
        };
        let next = next.min(self.ceiling);
        self.current = Some(next);
        next
    }

    /// Forget previous failures.
    pub fn reset(&mut self) {
        self.current = None;
    }

    /// The last delay handed out, `None` after a reset.
    pub fn current(&self) -> Option<Duration> {
        self.current
    }
}
