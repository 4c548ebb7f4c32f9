//! Reconnect backoff calculation.
//!
//! Sync-only math; the async reconnect loop lives in `feedlink-client`.
//! Delays grow exponentially from a base, are capped, and are spread by a
//! symmetric jitter factor so many clients dropped at once do not reconnect
//! in lockstep.

use std::time::Duration;

/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
/// Default maximum delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 10_000;
/// Default jitter factor (0.0–1.0).
pub const DEFAULT_JITTER_FACTOR: f64 = 0.5;

/// Bounded exponential backoff parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Backoff {
    /// Delay before the first retry, in ms.
    pub base_delay_ms: u64,
    /// Upper bound on any single delay, in ms.
    pub max_delay_ms: u64,
    /// Jitter range as a fraction of the delay (clamped to 0.0–1.0).
    pub jitter_factor: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl Backoff {
    /// Capped exponential delay for a zero-based attempt, before jitter.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> u64 {
        self.base_delay_ms
            .saturating_mul(1u64 << attempt.min(31))
            .min(self.max_delay_ms)
    }

    /// Delay for a zero-based attempt with jitter applied.
    ///
    /// `random` should be a value in `[0.0, 1.0)` from a PRNG; `0.5` yields
    /// the un-jittered delay. The result never exceeds `max_delay_ms`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay(&self, attempt: u32, random: f64) -> Duration {
        let capped = self.base_delay(attempt) as f64;
        let jitter = self.jitter_factor.clamp(0.0, 1.0);
        let offset = (random.clamp(0.0, 1.0) * 2.0 - 1.0) * jitter * capped;
        let ms = (capped + offset).round().max(0.0) as u64;
        Duration::from_millis(ms.min(self.max_delay_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff() -> Backoff {
        Backoff {
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
            jitter_factor: 0.5,
        }
    }

    #[test]
    fn exponential_growth() {
        let b = backoff();
        assert_eq!(b.base_delay(0), 1000);
        assert_eq!(b.base_delay(1), 2000);
        assert_eq!(b.base_delay(2), 4000);
        assert_eq!(b.base_delay(3), 8000);
    }

    #[test]
    fn capped_at_max() {
        let b = backoff();
        assert_eq!(b.base_delay(4), 10_000);
        assert_eq!(b.base_delay(40), 10_000);
    }

    #[test]
    fn midpoint_random_has_no_jitter() {
        let b = backoff();
        assert_eq!(b.delay(1, 0.5), Duration::from_millis(2000));
    }

    #[test]
    fn jitter_spreads_symmetrically() {
        let b = backoff();
        assert_eq!(b.delay(1, 0.0), Duration::from_millis(1000));
        assert!(b.delay(1, 0.99) > Duration::from_millis(2900));
    }

    #[test]
    fn jittered_delay_never_exceeds_max() {
        let b = backoff();
        assert_eq!(b.delay(10, 0.99), Duration::from_millis(10_000));
    }

    #[test]
    fn zero_jitter_is_deterministic() {
        let b = Backoff {
            jitter_factor: 0.0,
            ..backoff()
        };
        assert_eq!(b.delay(2, 0.0), b.delay(2, 0.9));
    }

    #[test]
    fn huge_base_saturates() {
        let b = Backoff {
            base_delay_ms: u64::MAX,
            max_delay_ms: u64::MAX,
            jitter_factor: 0.0,
        };
        assert_eq!(b.base_delay(31), u64::MAX);
    }
}
