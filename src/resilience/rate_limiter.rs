use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::debug;

/// Minimum-interval rate limiter, one per source adapter
#[derive(Debug)]
pub struct RateLimiter {
    last_request_time: Option<Instant>,
    min_interval: Duration,
}

impl RateLimiter {
    /// Create a new rate limiter with the specified rate (requests per second)
    #[must_use]
    pub fn new(requests_per_second: f64) -> Self {
        let min_interval = if requests_per_second > 0.0 {
            Duration::from_secs_f64(1.0 / requests_per_second)
        } else {
            Duration::from_secs(1)
        };

        debug!(
            "Created rate limiter: {} requests per second",
            requests_per_second
        );

        Self {
            last_request_time: None,
            min_interval,
        }
    }

    /// Wait until it's safe to make a request (respects rate limit)
    pub async fn acquire(&mut self) {
        if let Some(wait_time) = self.time_until_ready() {
            debug!("Rate limiter: waiting {}ms", wait_time.as_millis());
            sleep(wait_time).await;
        }

        self.last_request_time = Some(Instant::now());
    }

    /// Get time until next request is allowed
    #[must_use]
    pub fn time_until_ready(&self) -> Option<Duration> {
        self.last_request_time.and_then(|last_time| {
            let elapsed = last_time.elapsed();
            (elapsed < self.min_interval).then(|| self.min_interval - elapsed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rate_limiter_basic() {
        let mut limiter = RateLimiter::new(2.0);

        // First request should be immediate
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(100));

        // Second request should wait for the interval
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(400));
    }

    #[test]
    fn test_fresh_limiter_is_ready() {
        let limiter = RateLimiter::new(1.0);
        assert!(limiter.time_until_ready().is_none());
    }

    #[tokio::test]
    async fn test_not_ready_right_after_acquire() {
        let mut limiter = RateLimiter::new(0.5);
        limiter.acquire().await;
        let wait = limiter.time_until_ready().unwrap();
        assert!(wait <= Duration::from_secs(2));
    }
}
