//! Timeout value helpers.

use std::time::Duration;

/// Represents a timeout duration for lock operations.
///
/// - `Some(duration)` - Wait up to this duration
/// - `None` - Wait indefinitely
pub type Timeout = Option<Duration>;

/// Internal helper for timeout calculations.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutValue {
    millis: i64, // -1 for infinite
}

impl TimeoutValue {
    pub const INFINITE: Self = Self { millis: -1 };
    pub const ZERO: Self = Self { millis: 0 };

    pub fn is_infinite(&self) -> bool {
        self.millis < 0
    }

    /// A zero timeout turns an acquisition into a non-blocking probe.
    pub fn is_zero(&self) -> bool {
        self.millis == 0
    }

    pub fn as_duration(&self) -> Option<Duration> {
        if self.is_infinite() {
            None
        } else {
            Some(Duration::from_millis(self.millis as u64))
        }
    }
}

impl From<Option<Duration>> for TimeoutValue {
    fn from(timeout: Option<Duration>) -> Self {
        match timeout {
            None => Self::INFINITE,
            Some(d) => Self {
                millis: d.as_millis() as i64,
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn infinite_from_none() {
        let t = TimeoutValue::from(None);
        assert!(t.is_infinite());
        assert!(!t.is_zero());
        assert_eq!(t.as_duration(), None);
    }

    #[test]
    fn zero_is_probe() {
        let t = TimeoutValue::from(Some(Duration::ZERO));
        assert!(t.is_zero());
        assert!(!t.is_infinite());
    }

    #[test]
    fn bounded_round_trips() {
        let t = TimeoutValue::from(Some(Duration::from_millis(1500)));
        assert_eq!(t.as_duration(), Some(Duration::from_millis(1500)));
    }
}
