use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Sub, SubAssign};
use std::time::Duration as StdDuration;

/// A span of wall-clock time, stored as fractional seconds.
///
/// The timer wheel, distribution samplers, and watchdog arithmetic in this
/// crate are all naturally expressed in fractional seconds (matching the
/// `double`-based clock this behaviour is grounded on), so `Duration` wraps
/// `f64` directly rather than the integer-nanosecond representation
/// `std::time::Duration` uses.
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd)]
pub struct Duration(pub f64);

impl Duration {
    pub const ZERO: Self = Self(0.0);
    pub const MAX: Self = Self(f64::MAX);

    #[inline]
    pub const fn from_secs_f64(secs: f64) -> Self {
        Self(secs)
    }

    #[inline]
    pub fn from_millis_f64(millis: f64) -> Self {
        Self(millis / 1_000.0)
    }

    #[inline]
    pub fn as_secs_f64(self) -> f64 {
        self.0
    }

    #[inline]
    pub fn as_millis_f64(self) -> f64 {
        self.0 * 1_000.0
    }

    #[inline]
    pub fn is_zero(self) -> bool {
        self.0 <= 0.0
    }

    #[inline]
    pub fn saturating_sub(self, rhs: Duration) -> Self {
        Self((self.0 - rhs.0).max(0.0))
    }

    #[inline]
    pub fn saturating_add(self, rhs: Duration) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl From<StdDuration> for Duration {
    #[inline]
    fn from(d: StdDuration) -> Self {
        Self(d.as_secs_f64())
    }
}

impl From<Duration> for StdDuration {
    #[inline]
    fn from(d: Duration) -> Self {
        StdDuration::from_secs_f64(d.0.max(0.0))
    }
}

impl Add for Duration {
    type Output = Duration;
    #[inline]
    fn add(self, rhs: Duration) -> Duration {
        Duration(self.0 + rhs.0)
    }
}

impl Sub for Duration {
    type Output = Duration;
    #[inline]
    fn sub(self, rhs: Duration) -> Duration {
        Duration(self.0 - rhs.0)
    }
}

impl AddAssign for Duration {
    #[inline]
    fn add_assign(&mut self, rhs: Duration) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Duration {
    #[inline]
    fn sub_assign(&mut self, rhs: Duration) {
        self.0 -= rhs.0;
    }
}

impl Mul<f64> for Duration {
    type Output = Duration;
    #[inline]
    fn mul(self, rhs: f64) -> Duration {
        Duration(self.0 * rhs)
    }
}

impl Div<f64> for Duration {
    type Output = Duration;
    #[inline]
    fn div(self, rhs: f64) -> Duration {
        Duration(self.0 / rhs)
    }
}

impl MulAssign<f64> for Duration {
    #[inline]
    fn mul_assign(&mut self, rhs: f64) {
        self.0 *= rhs;
    }
}

impl DivAssign<f64> for Duration {
    #[inline]
    fn div_assign(&mut self, rhs: f64) {
        self.0 /= rhs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_round_trip() {
        let d = Duration::from_millis_f64(1.5);
        assert!((d.as_millis_f64() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn saturating_sub_never_negative() {
        let d = Duration::from_secs_f64(1.0).saturating_sub(Duration::from_secs_f64(2.0));
        assert_eq!(d, Duration::ZERO);
    }
}
