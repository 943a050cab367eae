//! Backoff schedules for the bounded retry loops of the test runner.
//!
//! Every loop is bounded by a number of *attempts*; the schedules below yield one delay fewer
//! than that, since no delay follows the final attempt.

use backon::{ConstantBuilder, ExponentialBuilder};
use std::time::Duration;

/// An exponential schedule starting at `initial_delay`, doubling after each attempt up to
/// `max_delay`, allowing `max_attempts` attempts in total.
pub fn exponential_backoff(
    initial_delay: Duration,
    max_delay: Duration,
    max_attempts: usize,
) -> ExponentialBuilder {
    ExponentialBuilder::new()
        .with_min_delay(initial_delay)
        .with_max_delay(max_delay)
        .with_factor(2.0)
        .with_max_times(max_attempts.saturating_sub(1))
}

/// A schedule that waits `delay` between attempts, allowing `max_attempts` attempts in total.
pub fn constant_backoff(delay: Duration, max_attempts: usize) -> ConstantBuilder {
    ConstantBuilder::default()
        .with_delay(delay)
        .with_max_times(max_attempts.saturating_sub(1))
}
