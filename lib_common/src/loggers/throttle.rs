//! # Log Throttle
//!
//! Rate limiter for log lines emitted from long-running loops. A line is let
//! through at most once per window; the calls swallowed in between are
//! counted so the next emitted line can report them.

use tokio::time::{Duration, Instant};

/// Last-logged-timestamp throttle.
#[derive(Debug, Clone)]
pub struct LogThrottle {
    every: Duration,
    last: Option<Instant>,
    suppressed: u64,
}

impl LogThrottle {
    /// Allows one line per `every`.
    pub fn new(every: Duration) -> Self {
        Self {
            every,
            last: None,
            suppressed: 0,
        }
    }

    /// Returns `Some(suppressed)` when a line may be logged now, where
    /// `suppressed` is the number of calls swallowed since the last one.
    pub fn check(&mut self) -> Option<u64> {
        self.check_at(Instant::now())
    }

    /// `check` against an explicit clock reading.
    pub fn check_at(&mut self, now: Instant) -> Option<u64> {
        let due = match self.last {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.every,
        };
        if due {
            self.last = Some(now);
            Some(std::mem::take(&mut self.suppressed))
        } else {
            self.suppressed += 1;
            None
        }
    }

    /// Forgets the window, so the next call is let through.
    pub fn reset(&mut self) {
        self.last = None;
        self.suppressed = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_call_passes_then_window_applies() {
        let mut throttle = LogThrottle::new(Duration::from_secs(60));
        let t0 = Instant::now();
        assert_eq!(throttle.check_at(t0), Some(0));
        assert_eq!(throttle.check_at(t0 + Duration::from_secs(1)), None);
        assert_eq!(throttle.check_at(t0 + Duration::from_secs(59)), None);
        assert_eq!(throttle.check_at(t0 + Duration::from_secs(60)), Some(2));
        assert_eq!(throttle.check_at(t0 + Duration::from_secs(61)), None);
    }

    #[test]
    fn reset_reopens_the_window() {
        let mut throttle = LogThrottle::new(Duration::from_secs(60));
        let t0 = Instant::now();
        throttle.check_at(t0);
        assert_eq!(throttle.check_at(t0), None);
        throttle.reset();
        assert_eq!(throttle.check_at(t0), Some(0));
    }
}
