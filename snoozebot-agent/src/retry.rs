//! Exponential backoff executor, reused for two distinct purposes:
//! on-demand plugin *load* retries, and automatic plugin *restart* after
//! a supervision crash.

use crate::error::AgentError;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl BackoffConfig {
    /// Restart backoff shape: 100ms, x2, cap 30s, max 5 attempts.
    pub fn restart_default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }

    /// Per-operation retries apply to load only; default 1 attempt with a
    /// 500ms step.
    pub fn load_default() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(500),
            multiplier: 1.0,
        }
    }
}

pub struct RetryExecutor {
    config: BackoffConfig,
}

impl RetryExecutor {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    pub async fn execute<F, Fut, T>(&self, mut f: F) -> Result<T, AgentError>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = Result<T, AgentError>>,
    {
        let mut delay = self.config.initial_delay;
        let mut last_error = None;

        for attempt in 0..self.config.max_attempts.max(1) {
            match f(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    last_error = Some(e);
                    if attempt + 1 >= self.config.max_attempts {
                        break;
                    }
                    sleep(delay).await;
                    let next = (delay.as_secs_f64() * self.config.multiplier).min(self.config.max_delay.as_secs_f64());
                    delay = Duration::from_secs_f64(next);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AgentError::internal("retry executed zero attempts")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_until_success() {
        let counter = AtomicU32::new(0);
        let executor = RetryExecutor::new(BackoffConfig {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            multiplier: 2.0,
        });
        let result = executor
            .execute(|attempt| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(AgentError::Timeout("not yet".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn load_default_attempts_exactly_once() {
        let executor = RetryExecutor::new(BackoffConfig::load_default());
        let counter = AtomicU32::new(0);
        let result: Result<(), AgentError> = executor
            .execute(|_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Err(AgentError::PluginUnavailable("down".into())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
