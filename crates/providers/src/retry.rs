//! Provider retry: bounded exponential backoff for transient failures.
//!
//! Rate limits, timeouts, network errors and 5xx responses are retried.
//! Authentication failures, unknown models and other 4xx errors are
//! returned immediately.

use async_trait::async_trait;
use legion_config::RetryConfig;
use legion_core::error::ProviderError;
use legion_core::provider::*;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// How many times to try and how long to wait in between.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Zero is treated as one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before attempt `attempt + 1`, doubling from `initial_backoff`.
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

/// A provider that retries its inner provider on transient errors.
pub struct RetryProvider {
    inner: Arc<dyn legion_core::Provider>,
    policy: RetryPolicy,
}

impl RetryProvider {
    pub fn new(inner: Arc<dyn legion_core::Provider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl legion_core::Provider for RetryProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let error = match self.inner.complete(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };

            if !error.is_transient() || attempt >= max_attempts {
                if attempt > 1 {
                    warn!(
                        provider = %self.inner.name(),
                        attempts = attempt,
                        error = %error,
                        "Retry: giving up"
                    );
                }
                return Err(error);
            }

            // Honour the server's hint when it asks for longer than our backoff.
            let mut delay = self.policy.backoff(attempt);
            if let ProviderError::RateLimited { retry_after_secs } = &error {
                delay = delay.max(Duration::from_secs(*retry_after_secs).min(self.policy.max_backoff));
            }

            info!(
                provider = %self.inner.name(),
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retry: transient failure, backing off"
            );

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        self.inner.health_check().await
    }
}
