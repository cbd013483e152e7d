//! Exponential-backoff helpers shared by the task queue (retry scheduling)
//! and by anything that needs a bounded async retry loop (the guest dial).

use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// `retry_count² seconds` — the backoff law the task queue contracts to in
/// §4.1/§8: `next_run(n) − now ≈ n² s` for the nth retry.
pub fn backoff_delay(retry_count: u32) -> Duration {
    Duration::from_secs((retry_count as u64).saturating_pow(2))
}

/// Retry an async operation up to `max_attempts` times with a fixed
/// `interval`, bailing out once `deadline` has elapsed. Used for the guest
/// vsock connect loop (500 ms interval, 15 s ceiling).
pub async fn retry_async<F, Fut, T, E>(
    max_attempts: u32,
    interval: Duration,
    deadline: Duration,
    label: &str,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let start = tokio::time::Instant::now();
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if attempt >= max_attempts || start.elapsed() >= deadline {
                    return Err(e);
                }
                warn!(label, attempt, error = %e, "retrying after transient failure");
                tokio::time::sleep(interval).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn backoff_follows_the_square_law() {
        assert_eq!(backoff_delay(0), Duration::from_secs(0));
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(3), Duration::from_secs(9));
        assert_eq!(backoff_delay(5), Duration::from_secs(25));
    }

    #[tokio::test]
    async fn retry_async_succeeds_on_the_second_attempt() {
        let attempts = Cell::new(0u32);
        let result: Result<&str, &str> = retry_async(
            5,
            Duration::from_millis(1),
            Duration::from_secs(1),
            "test",
            || {
                let n = attempts.get() + 1;
                attempts.set(n);
                async move {
                    if n < 2 {
                        Err("not yet")
                    } else {
                        Ok("ok")
                    }
                }
            },
        )
        .await;
        assert_eq!(result, Ok("ok"));
        assert_eq!(attempts.get(), 2);
    }

    #[tokio::test]
    async fn retry_async_gives_up_after_max_attempts() {
        let attempts = Cell::new(0u32);
        let result: Result<(), &str> = retry_async(
            3,
            Duration::from_millis(1),
            Duration::from_secs(1),
            "test",
            || {
                attempts.set(attempts.get() + 1);
                async { Err("still broken") }
            },
        )
        .await;
        assert_eq!(result, Err("still broken"));
        assert_eq!(attempts.get(), 3);
    }
}
