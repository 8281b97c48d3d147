//! Retry policies for transient I/O failures.
//!
//! Raster reads and store writes are retried at single-tile granularity;
//! deterministic failures (geometry, corrupt payloads) are never retried.

use std::time::Duration;

/// Default initial delay for exponential backoff (100ms).
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 100;

/// Default maximum delay for exponential backoff (10 seconds).
pub const DEFAULT_MAX_DELAY_SECS: u64 = 10;

/// Default multiplier for exponential backoff.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Run `op` under a caller-specified deadline.
///
/// The operation is not interrupted mid-flight; a result that arrives
/// after `timeout` is discarded and reported through `timed_out`, so a
/// slow suspension point surfaces as a failure the caller can retry
/// instead of silently stalling the job.
pub fn with_deadline<T, E>(
    timeout: Duration,
    op: impl FnOnce() -> Result<T, E>,
    timed_out: impl FnOnce(Duration) -> E,
) -> Result<T, E> {
    let started = std::time::Instant::now();
    let result = op();
    let elapsed = started.elapsed();
    if elapsed > timeout {
        return Err(timed_out(elapsed));
    }
    result
}

/// How a per-tile operation handles transient failures.
#[derive(Clone, Debug, PartialEq)]
pub enum RetryPolicy {
    /// No retries - fail immediately on error.
    None,

    /// Fixed number of retries with constant delay between attempts.
    Fixed {
        /// Maximum number of attempts (including the initial attempt).
        max_attempts: u32,
        /// Delay between retry attempts.
        delay: Duration,
    },

    /// Exponential backoff with configurable parameters.
    ExponentialBackoff {
        /// Maximum number of attempts (including the initial attempt).
        max_attempts: u32,
        /// Initial delay after the first failure.
        initial_delay: Duration,
        /// Maximum delay cap (delay won't exceed this).
        max_delay: Duration,
        /// Multiplier applied to delay after each failure.
        multiplier: f64,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3)
    }
}

impl RetryPolicy {
    /// Creates an exponential backoff policy with sensible defaults.
    pub fn exponential(max_attempts: u32) -> Self {
        Self::ExponentialBackoff {
            max_attempts,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }

    /// Creates a fixed retry policy.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::Fixed {
            max_attempts,
            delay,
        }
    }

    /// Delay before retry number `attempt` (1-based), or `None` when the
    /// attempt budget is spent.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        match self {
            Self::None => None,
            Self::Fixed {
                max_attempts,
                delay,
            } => (attempt < *max_attempts).then_some(*delay),
            Self::ExponentialBackoff {
                max_attempts,
                initial_delay,
                max_delay,
                multiplier,
            } => {
                if attempt >= *max_attempts {
                    return None;
                }
                let factor = multiplier.powi(attempt.saturating_sub(1) as i32);
                let delay_ms = (initial_delay.as_millis() as f64 * factor)
                    .min(max_delay.as_millis() as f64);
                Some(Duration::from_millis(delay_ms as u64))
            }
        }
    }

    /// Maximum number of attempts (including the initial one).
    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::None => 1,
            Self::Fixed { max_attempts, .. } => *max_attempts,
            Self::ExponentialBackoff { max_attempts, .. } => *max_attempts,
        }
    }

    /// Run `op`, retrying per this policy while `is_transient` holds for
    /// the returned error. The thread sleeps between attempts.
    pub fn run<T, E>(
        &self,
        mut op: impl FnMut() -> Result<T, E>,
        is_transient: impl Fn(&E) -> bool,
    ) -> Result<T, E> {
        let mut attempt = 1u32;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if is_transient(&e) => match self.delay_for_attempt(attempt) {
                    Some(delay) => {
                        std::thread::sleep(delay);
                        attempt += 1;
                    }
                    None => return Err(e),
                },
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_policy_none_single_attempt() {
        let policy = RetryPolicy::None;
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.delay_for_attempt(1), None);
    }

    #[test]
    fn test_policy_fixed_delays() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(5));
        assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_millis(5)));
        assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(5)));
        assert_eq!(policy.delay_for_attempt(3), None);
    }

    #[test]
    fn test_policy_exponential_doubles_and_caps() {
        let policy = RetryPolicy::ExponentialBackoff {
            max_attempts: 5,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(25),
            multiplier: 2.0,
        };
        assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_millis(10)));
        assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(20)));
        // Capped at max_delay.
        assert_eq!(policy.delay_for_attempt(3), Some(Duration::from_millis(25)));
        assert_eq!(policy.delay_for_attempt(5), None);
    }

    #[test]
    fn test_run_retries_transient_until_success() {
        let attempts = Cell::new(0u32);
        let policy = RetryPolicy::fixed(5, Duration::from_millis(0));
        let result: Result<u32, &str> = policy.run(
            || {
                attempts.set(attempts.get() + 1);
                if attempts.get() < 3 {
                    Err("transient")
                } else {
                    Ok(attempts.get())
                }
            },
            |_| true,
        );
        assert_eq!(result, Ok(3));
    }

    #[test]
    fn test_run_does_not_retry_permanent_errors() {
        let attempts = Cell::new(0u32);
        let policy = RetryPolicy::fixed(5, Duration::from_millis(0));
        let result: Result<(), &str> = policy.run(
            || {
                attempts.set(attempts.get() + 1);
                Err("permanent")
            },
            |_| false,
        );
        assert!(result.is_err());
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn test_deadline_passes_fast_operations_through() {
        let result: Result<u32, &str> =
            with_deadline(Duration::from_secs(10), || Ok(7), |_| "timed out");
        assert_eq!(result, Ok(7));
    }

    #[test]
    fn test_deadline_discards_late_results() {
        let result: Result<u32, String> = with_deadline(
            Duration::from_millis(1),
            || {
                std::thread::sleep(Duration::from_millis(20));
                Ok(7)
            },
            |elapsed| format!("read took {:?}", elapsed),
        );
        let err = result.unwrap_err();
        assert!(err.starts_with("read took"));
    }

    #[test]
    fn test_run_exhausts_attempt_budget() {
        let attempts = Cell::new(0u32);
        let policy = RetryPolicy::fixed(3, Duration::from_millis(0));
        let result: Result<(), &str> = policy.run(
            || {
                attempts.set(attempts.get() + 1);
                Err("transient")
            },
            |_| true,
        );
        assert!(result.is_err());
        assert_eq!(attempts.get(), 3);
    }
}
