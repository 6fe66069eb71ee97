use crate::error::ErrorCategory;
use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Maximum jitter as percentage of delay
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.1, // 10% jitter
        }
    }
}

impl RetryConfig {
    /// Slower, longer-reaching variant used for rate-limit responses
    #[must_use]
    pub fn rate_limited(&self) -> Self {
        Self {
            max_delay: self.max_delay.max(Duration::from_secs(60)),
            multiplier: 1.5,
            jitter: 0.3,
            ..self.clone()
        }
    }
}

/// Retry policy that determines retry behavior based on error
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    transient: RetryConfig,
    rate_limited: RetryConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(RetryConfig::default())
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn from_config(config: RetryConfig) -> Self {
        Self {
            rate_limited: config.rate_limited(),
            transient: config,
        }
    }

    /// Get retry config based on error
    #[must_use]
    pub const fn config_for_error(&self, error: &Error) -> Option<&RetryConfig> {
        match error.category() {
            ErrorCategory::Permanent => None,
            ErrorCategory::RateLimited => Some(&self.rate_limited),
            ErrorCategory::Transient => Some(&self.transient),
        }
    }
}

/// Execute an operation with retry logic.
///
/// Permanent errors return immediately; retryable ones are attempted up to
/// the matching config's `max_attempts` and the last error is returned.
pub async fn retry_with_policy<T, F, Fut>(
    operation: F,
    policy: &RetryPolicy,
    operation_name: &str,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;

    loop {
        debug!(
            "Executing operation '{}' (attempt {})",
            operation_name, attempt
        );

        let error = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(
                        "Operation '{}' succeeded after {} attempts",
                        operation_name, attempt
                    );
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        let Some(retry_config) = policy.config_for_error(&error) else {
            debug!(
                "Operation '{}' failed with non-retryable error: {}",
                operation_name, error
            );
            return Err(error);
        };

        if attempt >= retry_config.max_attempts {
            warn!(
                "Operation '{}' failed after {} attempts: {}",
                operation_name, attempt, error
            );
            return Err(error);
        }

        let delay = calculate_delay(attempt - 1, retry_config, &error);

        debug!(
            "Operation '{}' failed (attempt {}), retrying after {:?}: {}",
            operation_name, attempt, delay, error
        );

        sleep(delay).await;
        attempt += 1;
    }
}

/// Calculate delay for retry attempt
fn calculate_delay(attempt: u32, config: &RetryConfig, error: &Error) -> Duration {
    // Server-provided Retry-After wins over the computed backoff
    if let Some(retry_after) = error.retry_after() {
        return retry_after.min(config.max_delay);
    }

    let base_delay_ms = config.initial_delay.as_millis() as f64;
    let exponential_delay_ms = base_delay_ms * config.multiplier.powi(attempt as i32);
    let capped_delay_ms = exponential_delay_ms.min(config.max_delay.as_millis() as f64);
    let delay = Duration::from_millis(capped_delay_ms as u64);

    add_jitter(delay, config.jitter)
}

/// Add jitter to delay
fn add_jitter(delay: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return delay;
    }

    use rand::Rng;
    let jitter_ms = (delay.as_millis() as f64 * jitter_factor) as u64;
    let jitter = rand::thread_rng().gen_range(0..=jitter_ms);

    delay + Duration::from_millis(jitter)
}
