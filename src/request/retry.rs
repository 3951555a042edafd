//! Backoff computation for queued request retries.
//!
//! Delays grow exponentially with the attempt number, capped at
//! [`MAX_BACKOFF`], with symmetric jitter to avoid thundering herds.
//! Absolute delay tables, when configured, override the curve.

use std::time::Duration;

/// Ceiling on every computed retry delay.
pub const MAX_BACKOFF: Duration = Duration::from_millis(30_000);

/// Default jitter fraction applied to the capped delay.
pub const DEFAULT_JITTER: f64 = 0.1;

/// Computes the delay before retry attempt `attempt`.
///
/// The base curve is `base · 2^attempt`, capped at [`MAX_BACKOFF`]; the
/// capped value is then scaled by a uniform factor in
/// `[1 - jitter, 1 + jitter]`. The result always lies in
/// `[0, MAX_BACKOFF]`.
///
/// # Examples
///
/// ```rust
/// use helios_starling::request::backoff_delay;
/// use std::time::Duration;
///
/// let base = Duration::from_millis(1000);
/// // Without jitter the curve is exact.
/// assert_eq!(backoff_delay(base, 0, 0.0), Duration::from_millis(1000));
/// assert_eq!(backoff_delay(base, 1, 0.0), Duration::from_millis(2000));
/// assert_eq!(backoff_delay(base, 10, 0.0), Duration::from_millis(30_000));
/// ```
#[must_use]
pub fn backoff_delay(base: Duration, attempt: u32, jitter: f64) -> Duration {
    let exponential = base.as_millis() as f64 * 2f64.powi(attempt as i32);
    let capped = exponential.min(MAX_BACKOFF.as_millis() as f64);
    let factor = if jitter > 0.0 {
        1.0 + (rand::random::<f64>() * 2.0 - 1.0) * jitter
    } else {
        1.0
    };
    let delayed = (capped * factor).clamp(0.0, MAX_BACKOFF.as_millis() as f64);
    Duration::from_millis(delayed as u64)
}

/// Picks the delay before retry `attempt` (1-based ordinal).
///
/// When an absolute delay table is configured, the first retry takes
/// the first entry and the last entry repeats for later attempts;
/// otherwise the delay follows [`backoff_delay`].
#[must_use]
pub fn retry_delay(
    absolute: Option<&[Duration]>,
    base: Duration,
    attempt: u32,
    jitter: f64,
) -> Duration {
    if let Some(delays) = absolute
        && !delays.is_empty()
    {
        let index = (attempt.saturating_sub(1) as usize).min(delays.len() - 1);
        return delays[index];
    }
    backoff_delay(base, attempt, jitter)
}
