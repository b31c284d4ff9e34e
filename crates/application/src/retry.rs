use std::future::Future;
use std::time::Duration;

use domain::RepositoryError;
use tokio::time::sleep;

use crate::error::ApplicationError;

/// 可判定是否值得重试的错误
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for RepositoryError {
    fn is_transient(&self) -> bool {
        RepositoryError::is_transient(self)
    }
}

impl Transient for ApplicationError {
    fn is_transient(&self) -> bool {
        ApplicationError::is_transient(self)
    }
}

#[derive(Clone, Debug)]
pub enum Backoff {
    Exponential { base: Duration },
}

impl Backoff {
    pub fn exponential(base: Duration) -> Self {
        Backoff::Exponential { base }
    }

    fn delay_at(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Exponential { base } => {
                let exp = std::cmp::min(attempt.saturating_sub(1), 20);
                base.saturating_mul(1u32 << exp)
            }
        }
    }
}

/// 存储暂时不可用时的有限次退避重试
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::exponential(Duration::ZERO),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::exponential(Duration::from_millis(50)),
        }
    }
}

impl From<&config::RetryConfig> for RetryPolicy {
    fn from(config: &config::RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: Backoff::exponential(Duration::from_millis(config.base_delay_ms)),
        }
    }
}

pub async fn retry_transient<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient + std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= policy.max_attempts || !err.is_transient() {
                    return Err(err);
                }
                let delay = policy.backoff.delay_at(attempt);
                tracing::warn!(
                    operation,
                    attempt,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "存储暂时不可用，稍后重试"
                );
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: Backoff::exponential(Duration::from_millis(1)),
        }
    }

    #[test]
    fn exponential_delays() {
        let backoff = Backoff::exponential(Duration::from_millis(10));
        assert_eq!(backoff.delay_at(1), Duration::from_millis(10));
        assert_eq!(backoff.delay_at(3), Duration::from_millis(40));
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, RepositoryError> = retry_transient(&policy(3), "test", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(RepositoryError::unavailable("down"))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), RepositoryError> = retry_transient(&policy(2), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RepositoryError::unavailable("down"))
        })
        .await;
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), RepositoryError> = retry_transient(&policy(5), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RepositoryError::storage("corrupt"))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
