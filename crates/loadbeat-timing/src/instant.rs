use std::ops::{Add, Sub};
use std::time::Instant as StdInstant;

use crate::Duration;

/// A monotonic point in time, backed directly by `std::time::Instant`.
///
/// This crate originally anchored `Instant` to a shared rdtsc-derived clock
/// so values could be compared across sockets/cores in a multi-threaded
/// process; this tool is single-threaded and single-process, so a plain
/// `std::time::Instant` is both sufficient and strictly simpler.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Eq, Ord, Hash)]
pub struct Instant(StdInstant);

impl Instant {
    #[inline]
    pub fn now() -> Self {
        Self(StdInstant::now())
    }

    #[inline]
    pub fn elapsed(self) -> Duration {
        Duration::from(self.0.elapsed())
    }

    #[inline]
    pub fn duration_since(self, earlier: Instant) -> Duration {
        Duration::from(self.0.saturating_duration_since(earlier.0))
    }
}

impl Add<Duration> for Instant {
    type Output = Instant;
    #[inline]
    fn add(self, rhs: Duration) -> Instant {
        Instant(self.0 + std::time::Duration::from(rhs))
    }
}

impl Sub<Duration> for Instant {
    type Output = Instant;
    #[inline]
    fn sub(self, rhs: Duration) -> Instant {
        Instant(self.0 - std::time::Duration::from(rhs))
    }
}

impl Sub<Instant> for Instant {
    type Output = Duration;
    #[inline]
    fn sub(self, rhs: Instant) -> Duration {
        self.duration_since(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_is_nonnegative() {
        let start = Instant::now();
        std::thread::sleep(std::time::Duration::from_millis(1));
        assert!(start.elapsed().as_secs_f64() > 0.0);
    }
}
