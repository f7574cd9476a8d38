//! Jittered exponential backoff, used by the Socket Manager to schedule
//! reconnection attempts.
//!
//! A reusable, mutable-state delay generator with an explicit attempt
//! counter, rather than a calculation inlined directly on the Manager.

use std::time::Duration;

use sio_core::error::{SioError, SioResult};

/// Exponential-with-jitter delay generator.
///
/// `duration()` returns `clamp(min * factor^attempts +/- jitter*rand*base,
/// min, max)` and increments the internal attempt counter. `reset()`
/// zeros it. Consecutive calls (without `reset`) are non-decreasing up
/// to `max`; after `reset()` the next call returns `min` again.
#[derive(Debug, Clone)]
pub struct Backoff {
    attempts: u32,
    min: Duration,
    max: Duration,
    factor: u32,
    jitter: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            attempts: 0,
            min: Duration::from_millis(100),
            max: Duration::from_secs(10),
            factor: 2,
            jitter: 0.0,
        }
    }
}

impl Backoff {
    /// Construct with explicit min/max/factor; jitter starts at 0.
    ///
    /// `max` below `min` is coerced up to `min`
    pub fn new(min: Duration, max: Duration, factor: u32) -> Self {
        let max = if max < min { min } else { max };
        Self {
            attempts: 0,
            min,
            max,
            factor: factor.max(1),
            jitter: 0.0,
        }
    }

    /// Current attempt count (number of `duration()` calls since the
    /// last `reset()`).
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Set the minimum delay. If this pushes `min` above the current
    /// `max`, `max` is coerced up to match.
    pub fn set_min(&mut self, min: Duration) {
        self.min = min;
        if self.max < self.min {
            self.max = self.min;
        }
    }

    /// Set the maximum delay. A value below the current `min` is
    /// coerced up to `min` rather than rejected.
    pub fn set_max(&mut self, max: Duration) {
        self.max = if max < self.min { self.min } else { max };
    }

    /// Set the jitter factor. Must lie in `[0.0, 1.0)`.
    pub fn set_jitter(&mut self, jitter: f64) -> SioResult<()> {
        if !(0.0..1.0).contains(&jitter) {
            return Err(SioError::InvalidArgument(format!(
                "jitter must be in [0.0, 1.0), got {jitter}"
            )));
        }
        self.jitter = jitter;
        Ok(())
    }

    /// Compute the next delay and advance the attempt counter.
    pub fn duration(&mut self) -> Duration {
        let base_ms = self.min.as_millis() as f64 * (self.factor as f64).powi(self.attempts as i32);

        let ms = if self.jitter > 0.0 {
            let magnitude: f64 = rand::random::<f64>() * self.jitter * base_ms;
            if rand::random::<bool>() {
                base_ms + magnitude
            } else {
                base_ms - magnitude
            }
        } else {
            base_ms
        };

        let min_ms = self.min.as_millis() as f64;
        let max_ms = self.max.as_millis() as f64;
        let clamped = ms.clamp(min_ms, max_ms);

        self.attempts += 1;
        Duration::from_millis(clamped.round() as u64)
    }

    /// Zero the attempt counter; the next `duration()` call resumes
    /// from `min`.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_without_jitter_follows_exponential_schedule() {
        let mut b = Backoff::new(Duration::from_millis(100), Duration::from_millis(10_000), 2);
        assert_eq!(b.duration(), Duration::from_millis(100));
        assert_eq!(b.duration(), Duration::from_millis(200));
        assert_eq!(b.duration(), Duration::from_millis(400));
        assert_eq!(b.duration(), Duration::from_millis(800));
    }

    #[test]
    fn duration_caps_at_max() {
        let mut b = Backoff::new(Duration::from_millis(100), Duration::from_millis(300), 2);
        b.duration(); // 100
        b.duration(); // 200
        let third = b.duration(); // would be 400, capped to 300
        assert_eq!(third, Duration::from_millis(300));
        let fourth = b.duration();
        assert_eq!(fourth, Duration::from_millis(300));
    }

    #[test]
    fn reset_resumes_from_min() {
        let mut b = Backoff::new(Duration::from_millis(50), Duration::from_secs(5), 2);
        b.duration();
        b.duration();
        assert!(b.attempts() >= 2);
        b.reset();
        assert_eq!(b.attempts(), 0);
        assert_eq!(b.duration(), Duration::from_millis(50));
    }

    #[test]
    fn duration_stays_within_bounds_with_jitter() {
        let mut b = Backoff::new(Duration::from_millis(100), Duration::from_millis(1_000), 2);
        b.set_jitter(0.5).unwrap();
        for _ in 0..20 {
            let d = b.duration();
            assert!(d >= Duration::from_millis(100));
            assert!(d <= Duration::from_millis(1_000));
        }
    }

    #[test]
    fn set_jitter_rejects_out_of_range() {
        let mut b = Backoff::default();
        assert!(b.set_jitter(1.0).is_err());
        assert!(b.set_jitter(-0.1).is_err());
        assert!(b.set_jitter(0.0).is_ok());
        assert!(b.set_jitter(0.999).is_ok());
    }

    #[test]
    fn set_max_below_min_is_coerced_up() {
        let mut b = Backoff::new(Duration::from_millis(500), Duration::from_secs(5), 2);
        b.set_max(Duration::from_millis(100));
        assert_eq!(b.duration(), Duration::from_millis(500));
    }

    #[test]
    fn constructing_with_max_below_min_coerces_at_construction() {
        let mut b = Backoff::new(Duration::from_millis(500), Duration::from_millis(10), 2);
        assert_eq!(b.duration(), Duration::from_millis(500));
    }
}
