//! Timeouts and bounded exponential backoff for port calls

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};

use crate::config::RetryConfig;
use crate::error::{Error, Port, Result};

/// Retry policy applied to every external port call
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    timeout: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration, timeout: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            timeout,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.timeout(),
        )
    }

    /// Deadline for one attempt
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Attempts made at most, including the first
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Backoff before retry number `retry` (0-based): base * 2^retry, capped
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(16));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `operation` once under the per-call deadline
    pub async fn once<F, Fut, T>(&self, port: Port, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match timeout(self.timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(port, self.timeout)),
        }
    }

    /// Run `operation`, retrying transient failures with exponential backoff
    pub async fn call<F, Fut, T>(&self, port: Port, what: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retry = 0;
        loop {
            match self.once(port, &mut operation).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && retry < self.max_retries => {
                    let delay = self.delay_for(retry);
                    tracing::warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        what,
                        retry + 1,
                        self.max_attempts(),
                        delay,
                        e
                    );
                    sleep(delay).await;
                    retry += 1;
                }
                Err(e) => {
                    if e.is_transient() {
                        tracing::error!("{} failed after {} attempts: {}", what, retry + 1, e);
                    }
                    return Err(e);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy::new(
            2,
            Duration::from_millis(100),
            Duration::from_millis(250),
            Duration::from_secs(1),
        )
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = policy();
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(250));
        assert_eq!(policy.delay_for(40), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_then_success() {
        let attempts = AtomicU32::new(0);
        let counter = &attempts;
        let result = policy()
            .call(Port::Generation, "generate", move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(Error::transient(Port::Generation, "rate limited"))
                } else {
                    Ok("answer")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "answer");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_transient_failure() {
        let attempts = AtomicU32::new(0);
        let counter = &attempts;
        let result = policy()
            .call(Port::Embedding, "embed", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                sleep(Duration::from_secs(5)).await;
                Ok(vec![0.0_f32])
            })
            .await;

        assert!(matches!(result, Err(Error::Embedding { transient: true, .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_not_retried() {
        let attempts = AtomicU32::new(0);
        let counter = &attempts;
        let result: Result<()> = policy()
            .call(Port::VectorStore, "query", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::retrieval("index missing"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
