//! Retry / rate-limit controller (spec §4.3).

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Fixed tokens that identify a rate-limit signature in combined stderr
/// (spec §4.3). Matching is case-insensitive.
const RATE_LIMIT_TOKENS: &[&str] = &["rate limit", "429", "too many requests", "overloaded"];

/// True if `stderr` (lowercased) contains any rate-limit signature.
pub fn is_rate_limited(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    RATE_LIMIT_TOKENS.iter().any(|token| lower.contains(token))
}

/// Compute the delay before retry attempt `n` (zero-based), per spec
/// §4.3:
///
/// ```text
/// sleep = min(baseDelay * multiplier^n, maxDelay) + uniform(0, 500ms)
/// ```
///
/// Jitter is mandatory: lockstep retries from several concurrent workers
/// would otherwise cause synchronized re-throttling.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exp = config.multiplier.powi(attempt as i32);
    let base = (config.base_delay_ms as f64 * exp) as u64;
    let capped = base.min(config.max_delay_ms);
    let jitter_ms = rand::thread_rng().gen_range(0.0..500.0) as u64;
    Duration::from_millis(capped + jitter_ms)
}

/// An error kind as classified by the retry controller (spec §4.3, §7).
/// Only `RateLimit` is retryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClassification {
    RateLimit,
    NotRetryable,
}

pub fn classify(stderr: &str) -> RetryClassification {
    if is_rate_limited(stderr) {
        RetryClassification::RateLimit
    } else {
        RetryClassification::NotRetryable
    }
}

/// Run `attempt_fn` under the retry controller: up to `config.max_retries`
/// additional attempts are made whenever the attempt fails with a
/// rate-limit signature. Returns the successful value along with the
/// number of retries performed, or the last error if retries are
/// exhausted or the failure was not retryable.
pub async fn with_retry<T, E, F, Fut>(
    config: &RetryConfig,
    mut attempt_fn: F,
) -> Result<(T, u32), E>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, (E, String)>>,
{
    let mut attempt = 0u32;
    loop {
        match attempt_fn(attempt).await {
            Ok(value) => return Ok((value, attempt)),
            Err((err, stderr)) => {
                let retryable = classify(&stderr) == RetryClassification::RateLimit;
                if !retryable || attempt >= config.max_retries {
                    return Err(err);
                }
                let delay = backoff_delay(config, attempt);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_rate_limited_matches_known_tokens() {
        assert!(is_rate_limited("Error: Rate limit exceeded"));
        assert!(is_rate_limited("HTTP 429 Too Many Requests"));
        assert!(is_rate_limited("server overloaded, try again"));
        assert!(!is_rate_limited("segmentation fault"));
    }

    #[test]
    fn test_is_rate_limited_is_case_insensitive() {
        assert!(is_rate_limited("RATE LIMIT hit"));
    }

    #[test]
    fn test_backoff_delay_increases_with_attempt() {
        let config = RetryConfig::default();
        let d0 = backoff_delay(&config, 0).as_millis();
        let d1 = backoff_delay(&config, 1).as_millis();
        let d2 = backoff_delay(&config, 2).as_millis();
        // jitter adds up to 500ms, so compare against the deterministic floor.
        assert!(d0 >= config.base_delay_ms as u128);
        assert!(d1 as u64 >= (config.base_delay_ms as f64 * config.multiplier) as u64);
        assert!(d2 >= d1 || d2 >= config.max_delay_ms as u128);
    }

    #[test]
    fn test_backoff_delay_respects_max_delay_ceiling() {
        let config = RetryConfig::default();
        // At a high attempt count, the exponential term dwarfs max_delay.
        let d = backoff_delay(&config, 10);
        assert!(d.as_millis() <= config.max_delay_ms as u128 + 500);
    }

    #[tokio::test]
    async fn test_with_retry_succeeds_after_two_rate_limits() {
        let config = RetryConfig {
            base_delay_ms: 1,
            max_delay_ms: 2,
            multiplier: 2.0,
            max_retries: 3,
        };
        let attempts = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let attempts_clone = attempts.clone();
        let (value, retries) = with_retry(&config, move |_n| {
            let attempts = attempts_clone.clone();
            async move {
                let n = attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                if n < 2 {
                    Err(("fail".to_string(), "rate limit exceeded".to_string()))
                } else {
                    Ok("success".to_string())
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(value, "success");
        assert_eq!(retries, 2);
    }

    #[tokio::test]
    async fn test_with_retry_does_not_retry_non_rate_limit_errors() {
        let config = RetryConfig::default();
        let result: Result<(String, u32), String> = with_retry(&config, |_n| async {
            Err(("boom".to_string(), "segfault".to_string()))
        })
        .await;
        assert_eq!(result.unwrap_err(), "boom");
    }

    #[tokio::test]
    async fn test_with_retry_exhausts_max_retries() {
        let config = RetryConfig {
            base_delay_ms: 1,
            max_delay_ms: 2,
            multiplier: 2.0,
            max_retries: 1,
        };
        let attempts = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let attempts_clone = attempts.clone();
        let result: Result<(String, u32), String> = with_retry(&config, move |_n| {
            let attempts = attempts_clone.clone();
            async move {
                attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Err(("always fails".to_string(), "rate limit".to_string()))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}
