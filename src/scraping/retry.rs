//! Exponential backoff around any fallible async operation.

use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use rand::Rng;
use regex::Regex;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(2000);
/// Longest provider-suggested wait honoured before a retry.
pub const MAX_HINTED_DELAY: Duration = Duration::from_secs(3600);

static RETRY_DELAY_FIELD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""retryDelay"\s*:\s*"(\d+(?:\.\d+)?)s""#).expect("valid retryDelay regex")
});
static RETRY_IN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)please retry in (\d+(?:\.\d+)?)\s*s").expect("valid retry-in regex")
});

/// Reads a server-suggested wait out of an error message.
pub trait DelayHint: Send + Sync {
    fn suggested_delay(&self, message: &str) -> Option<Duration>;
}

/// Understands the two rate-limit formats seen in upstream errors:
/// a JSON `"retryDelay":"58s"` field and a `Please retry in 12.5s` sentence.
/// When both are present the longer wait wins.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProviderDelayHint;

impl DelayHint for ProviderDelayHint {
    fn suggested_delay(&self, message: &str) -> Option<Duration> {
        [&*RETRY_DELAY_FIELD_RE, &*RETRY_IN_RE]
            .into_iter()
            .filter_map(|re| re.captures(message))
            .filter_map(|caps| caps[1].parse::<f64>().ok())
            .map(|secs| Duration::try_from_secs_f64(secs).unwrap_or(MAX_HINTED_DELAY))
            .max()
            .map(|delay| delay.min(MAX_HINTED_DELAY))
    }
}

#[derive(Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_jitter: Duration,
    hint: Arc<dyn DelayHint>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, DEFAULT_INITIAL_DELAY)
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("initial_delay", &self.initial_delay)
            .field("max_jitter", &self.max_jitter)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_jitter: DEFAULT_MAX_JITTER,
            hint: Arc::new(ProviderDelayHint),
        }
    }

    pub fn with_hint(mut self, hint: Arc<dyn DelayHint>) -> Self {
        self.hint = hint;
        self
    }

    /// Wait before the attempt following failed attempt number `attempt` (1-based).
    ///
    /// A provider hint replaces the backoff and gets random jitter on top.
    pub fn delay_for(&self, attempt: u32, message: &str) -> Duration {
        if let Some(hinted) = self.hint.suggested_delay(message) {
            return hinted.min(MAX_HINTED_DELAY).saturating_add(self.jitter());
        }
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_delay.saturating_mul(1 << exponent)
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max_ms))
    }
}

/// Run `operation` until it succeeds or `policy.max_retries` attempts fail,
/// returning the last error in that case.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, label: &str, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    with_retry_if(policy, label, |_| true, operation).await
}

/// Like [`with_retry`], but an error for which `retryable` is false is
/// returned right away.
pub async fn with_retry_if<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    label: &str,
    retryable: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
{
    let attempts = policy.max_retries.max(1);
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if !retryable(&e) => {
                tracing::warn!("{label}: not retrying: {e}");
                return Err(e);
            }
            Err(e) if attempt >= attempts => {
                tracing::warn!("{label}: giving up after {attempts} attempts: {e}");
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_for(attempt, &e.to_string());
                tracing::warn!(
                    "{label}: attempt {attempt}/{attempts} failed: {e}; retrying in {}ms",
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn parses_retry_delay_field() {
        let msg = r#"429 {"error":{"details":[{"@type":"RetryInfo","retryDelay":"58s"}]}}"#;
        assert_eq!(ProviderDelayHint.suggested_delay(msg), Some(Duration::from_secs(58)));
    }

    #[test]
    fn longer_of_two_hints_wins() {
        let msg = r#"Please retry in 12.5s. {"retryDelay":"7s"}"#;
        assert_eq!(ProviderDelayHint.suggested_delay(msg), Some(Duration::from_millis(12_500)));
        assert_eq!(ProviderDelayHint.suggested_delay("connection reset"), None);
    }

    #[test]
    fn hinted_delay_is_never_shorter_than_hint() {
        let policy = RetryPolicy::default();
        let msg = r#"quota exceeded {"retryDelay":"58s"}"#;
        for attempt in 1..=3 {
            let delay = policy.delay_for(attempt, msg);
            assert!(delay >= Duration::from_millis(58_000), "{delay:?}");
            assert!(delay <= Duration::from_millis(58_000) + DEFAULT_MAX_JITTER);
        }
    }

    #[test]
    fn absurd_hint_is_capped() {
        let mut policy = RetryPolicy::default();
        policy.max_jitter = Duration::ZERO;
        let msg = r#"{"retryDelay":"99999999999999999999s"}"#;
        assert_eq!(ProviderDelayHint.suggested_delay(msg), Some(MAX_HINTED_DELAY));
        assert_eq!(policy.delay_for(1, msg), MAX_HINTED_DELAY);

        let policy = RetryPolicy::default();
        let delay = policy.delay_for(1, &format!("Please retry in 1{}s", "0".repeat(400)));
        assert!(delay >= MAX_HINTED_DELAY && delay <= MAX_HINTED_DELAY + DEFAULT_MAX_JITTER);
    }

    #[test]
    fn backoff_doubles_without_hint() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1000));
        assert_eq!(policy.delay_for(1, "timeout"), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2, "timeout"), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(3, "timeout"), Duration::from_millis(4000));
    }

    struct FixedHint(Duration);

    impl DelayHint for FixedHint {
        fn suggested_delay(&self, message: &str) -> Option<Duration> {
            message.contains("slow down").then_some(self.0)
        }
    }

    #[test]
    fn injected_hint_replaces_backoff() {
        let mut policy = RetryPolicy::new(3, Duration::from_millis(1000))
            .with_hint(Arc::new(FixedHint(Duration::from_secs(30))));
        policy.max_jitter = Duration::ZERO;
        assert_eq!(policy.delay_for(1, "slow down"), Duration::from_secs(30));
        assert_eq!(policy.delay_for(2, r#"{"retryDelay":"58s"}"#), Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(10));

        let result: Result<u32, String> = with_retry(&policy, "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { if n < 3 { Err(format!("attempt {n} failed")) } else { Ok(n) } }
        })
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn returns_last_error_when_exhausted() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(10));

        let result: Result<(), String> = with_retry(&policy, "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Err(format!("failure {n}")) }
        })
        .await;

        assert_eq!(result, Err("failure 3".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(10));

        let result: Result<(), String> = with_retry_if(
            &policy,
            "test",
            |e: &String| !e.starts_with("404"),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("404 not found".to_string()) }
            },
        )
        .await;

        assert_eq!(result, Err("404 not found".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_still_attempts_once() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(0, Duration::from_millis(10));

        let result: Result<(), &str> = with_retry(&policy, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("nope") }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
