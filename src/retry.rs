use crate::error::ImageError;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_retry::RetryIf;
use tracing::{debug, warn};

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);

/// Quadratic backoff limited to `max_retries` extra attempts. Only retryable
/// errors (see [`ImageError::is_retryable`]) are tried again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Wait before retry `n` (1-based): `n² × base_delay`.
    pub fn backoff(&self, n: u32) -> Duration {
        self.base_delay.saturating_mul(n.saturating_mul(n))
    }

    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let policy = *self;
        (1..=self.max_retries).map(move |n| policy.backoff(n))
    }

    /// Run `action` until it succeeds, fails terminally or runs out of
    /// retries. Failures come back as [`ImageError::Exhausted`], except
    /// cancellation which is passed through unchanged.
    pub async fn run<F, Fut, T>(&self, label: &str, mut action: F) -> Result<T, ImageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ImageError>>,
    {
        let attempts = AtomicU32::new(0);

        let result = RetryIf::spawn(
            self.delays(),
            || {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                debug!("[{}] attempt {}/{}", label, attempt, self.max_retries + 1);
                action()
            },
            |e: &ImageError| {
                let retryable = e.is_retryable();
                if retryable {
                    warn!(
                        "[{}] attempt {} failed: {}",
                        label,
                        attempts.load(Ordering::SeqCst),
                        e
                    );
                }
                retryable
            },
        )
        .await;

        result.map_err(|last| match last {
            ImageError::Cancelled => ImageError::Cancelled,
            last => ImageError::Exhausted {
                attempts: attempts.load(Ordering::SeqCst),
                last: Box::new(last),
            },
        })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MAX_RETRIES)
    }
}
