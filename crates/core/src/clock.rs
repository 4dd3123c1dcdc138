use std::cell::Cell;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub type Millis = u64;

/// Largest timestamp accepted from outside. Anything above is treated as
/// garbage, leaving stamps room to keep increasing.
pub const MAX_MILLIS: Millis = i64::MAX as Millis;

/// Returns the current wall-clock time as milliseconds since Unix epoch.
/// A clock set before the epoch reads as zero.
pub fn physical_now() -> Millis {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Millis)
        .unwrap_or(0)
}

/// Source of "now" for stamping and debouncing.
pub trait Clock {
    fn now_ms(&self) -> Millis;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> Millis {
        physical_now()
    }
}

/// Virtual time shared between clones. Time only moves when told to.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<Millis>>,
}

impl ManualClock {
    pub fn new(start: Millis) -> Self {
        Self {
            now: Rc::new(Cell::new(start)),
        }
    }

    pub fn set(&self, now: Millis) {
        self.now.set(now);
    }

    pub fn advance(&self, delta_ms: Millis) {
        self.now.set(self.now.get() + delta_ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Millis {
        self.now.get()
    }
}

/// Issues strictly increasing slice modification stamps.
///
/// Every timestamp the device has seen (persisted or remote) is folded in
/// through [`SliceClock::observe`], so a fresh local stamp is always greater
/// than any `updatedAt` already present in local state.
#[derive(Debug, Clone, Default)]
pub struct SliceClock {
    last: Millis,
}

impl SliceClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Millis {
        self.last
    }

    /// Generate the next stamp: wall time, or one past the last stamp if the
    /// wall clock has not moved past it.
    pub fn stamp(&mut self, now: Millis) -> Millis {
        let next = if now > self.last { now } else { self.last.saturating_add(1) };
        self.last = next;
        next
    }

    /// Record a timestamp produced elsewhere.
    pub fn observe(&mut self, seen: Millis) {
        if seen > self.last {
            self.last = seen;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamp_monotonicity() {
        let mut clock = SliceClock::new();
        let mut prev = clock.stamp(1_000);
        for _ in 0..100 {
            let next = clock.stamp(1_000);
            assert!(next > prev, "expected {next} > {prev}");
            prev = next;
        }
    }

    #[test]
    fn stamp_follows_wall_time_when_ahead() {
        let mut clock = SliceClock::new();
        assert_eq!(clock.stamp(100), 100);
        assert_eq!(clock.stamp(250), 250);
    }

    #[test]
    fn backwards_wall_clock_still_increases() {
        let mut clock = SliceClock::new();
        let t1 = clock.stamp(5_000);
        let t2 = clock.stamp(4_000);
        assert_eq!(t1, 5_000);
        assert_eq!(t2, 5_001);
    }

    #[test]
    fn observed_remote_timestamp_bounds_next_stamp() {
        let mut clock = SliceClock::new();
        clock.stamp(100);
        // A peer whose clock runs ahead wrote at t=10_000.
        clock.observe(10_000);
        assert_eq!(clock.stamp(200), 10_001);

        // Observing something older is a no-op.
        clock.observe(50);
        assert_eq!(clock.last(), 10_001);
    }

    #[test]
    fn stamp_after_observing_the_maximum_does_not_overflow() {
        let mut clock = SliceClock::new();
        clock.observe(Millis::MAX);
        assert_eq!(clock.stamp(1_000), Millis::MAX);
        assert_eq!(clock.stamp(1_000), Millis::MAX);
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new(10);
        let other = clock.clone();
        clock.advance(5);
        assert_eq!(other.now_ms(), 15);
        other.set(100);
        assert_eq!(clock.now_ms(), 100);
    }
}
