//! Backoff arithmetic for the step retry policy.
//!
//! Stateless: the step executor tracks the failure count and asks for the
//! delay before each re-attempt.

use std::time::Duration;

use duraflow_types::workflow::{Backoff, RetryPolicy};

use crate::duration::{parse_duration, DurationError};

/// Compute the delay before retry `attempt` (1-based failure count).
///
/// Fixed backoff waits the base delay every time; exponential backoff waits
/// `delay * 2^(attempt-1)`. Overflowing the 64-bit millisecond range is an
/// error rather than a silent wrap.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Result<Duration, DurationError> {
    let base_ms = parse_duration(&policy.delay)?;

    let factor = match policy.backoff {
        Backoff::Fixed => 1,
        Backoff::Exponential => {
            let shift = attempt.saturating_sub(1);
            // 2^62 is the largest power of two that stays positive in i64.
            if shift > 62 {
                return Err(DurationError::Overflow(policy.delay.clone()));
            }
            1i64 << shift
        }
    };

    let ms = base_ms
        .checked_mul(factor)
        .ok_or_else(|| DurationError::Overflow(policy.delay.clone()))?;

    Ok(Duration::from_millis(ms.max(0) as u64))
}
