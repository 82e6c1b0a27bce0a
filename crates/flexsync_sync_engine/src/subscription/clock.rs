//! Strictly increasing subscription timestamps.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// Hands out UTC timestamps that never repeat or go backwards, even when the
/// wall clock does.
#[derive(Debug)]
pub(crate) struct MonotonicClock {
    last: Mutex<DateTime<Utc>>,
}

impl MonotonicClock {
    /// Every timestamp handed out will be later than `floor`.
    pub(crate) fn new(floor: DateTime<Utc>) -> Self {
        Self {
            last: Mutex::new(floor),
        }
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        let mut last = self.last.lock();
        let wall = Utc::now();
        let next = if wall > *last {
            wall
        } else {
            *last + Duration::nanoseconds(1)
        };
        *last = next;
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strictly_increasing() {
        let clock = MonotonicClock::new(DateTime::<Utc>::MIN_UTC);
        let mut previous = clock.now();
        for _ in 0..1000 {
            let next = clock.now();
            assert!(next > previous);
            previous = next;
        }
    }

    #[test]
    fn stays_ahead_of_future_floor() {
        let floor = Utc::now() + Duration::days(1);
        let clock = MonotonicClock::new(floor);
        let first = clock.now();
        assert!(first > floor);
        assert!(clock.now() > first);
    }
}
