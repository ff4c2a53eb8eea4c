use std::time::Duration;

use crate::config::RetryConfig;

/// Largest doubling applied to the base delay.
const MAX_EXPONENT: u32 = 16;

/// Wait before the `retry_count`-th retry (1-based): `delay * 2^(n-1)` with
/// exponential backoff, otherwise the flat delay.
pub fn retry_delay(config: &RetryConfig, retry_count: u32) -> Duration {
    let base = config.delay_seconds;
    if !config.exponential_backoff {
        return Duration::from_secs(base);
    }
    let exponent = retry_count.saturating_sub(1).min(MAX_EXPONENT);
    Duration::from_secs(base.saturating_mul(1u64 << exponent))
}
