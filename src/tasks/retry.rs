use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Run `op`, retrying up to `retries` more times with exponential backoff
/// (`base`, `2×base`, …). Gives up early, returning the last error, once
/// `cancel` fires. The second value is how many retries were used.
pub async fn with_retry<T, E, F, Fut>(
    retries: u32,
    base: Duration,
    cancel: &CancellationToken,
    mut op: F,
) -> (Result<T, E>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => return (Ok(v), attempt),
            Err(e) if attempt >= retries || cancel.is_cancelled() => return (Err(e), attempt),
            Err(e) => {
                let delay = base * 2u32.pow(attempt);
                debug!("attempt {} failed ({}), retrying in {:?}", attempt + 1, e, delay);
                tokio::select! {
                    _ = cancel.cancelled() => return (Err(e), attempt),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
        }
    }
}

/// Delay before restart attempt `attempt` (1-based): doubling from `base`,
/// capped at `cap`, plus up to 25% random jitter.
pub fn backoff_with_jitter(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let exp = base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
    let delay = exp.min(cap);
    let jitter = rand::thread_rng().gen_range(0.0..=0.25);
    delay.mul_f64(1.0 + jitter)
}

/// Sleep for `delay` unless `cancel` fires first. Returns false if cancelled.
pub async fn pause(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
