//! Retry logic with exponential backoff
//!
//! Used for the two kinds of network call a run makes: order metadata requests
//! and whole-file transfers. A retried transfer always starts again from byte
//! zero.
//!
//! # Example
//!
//! ```no_run
//! use bundle_mirror::retry::{IsRetryable, with_retry};
//! use bundle_mirror::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{self:?}")
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::default();
//! with_retry(&config, || async { Ok::<_, MyError>(()) }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{CatalogError, ItemError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, connection resets, 5xx) return `true`.
/// Permanent failures (rejected session, size mismatch, corrupt data) return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for CatalogError {
    fn is_retryable(&self) -> bool {
        match self {
            CatalogError::Network { transient, .. } => *transient,
            // A body that does not parse will not parse next time either
            CatalogError::Malformed { .. } => false,
            CatalogError::AuthRejected { .. } => false,
        }
    }
}

impl IsRetryable for ItemError {
    fn is_retryable(&self) -> bool {
        match self {
            ItemError::Network(e) => e.is_timeout() || e.is_connect() || e.is_body(),
            ItemError::Timeout(_) => true,
            ItemError::Status { status } => *status >= 500 || *status == 429,
            ItemError::Incomplete { .. } => true,
            // Upstream metadata disagrees with the file; retrying will not change that
            ItemError::SizeMismatch { .. } => false,
            ItemError::ChecksumMismatch { .. } => false,
            ItemError::Filesystem { .. } => false,
            ItemError::Cancelled => false,
        }
    }
}

/// Delays between attempts: start at `initial_delay`, multiply each time,
/// never exceed `max_delay`
struct Backoff<'a> {
    config: &'a RetryConfig,
    next: Duration,
}

impl<'a> Backoff<'a> {
    fn new(config: &'a RetryConfig) -> Self {
        Self {
            config,
            next: config.initial_delay,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = Duration::from_secs_f64(delay.as_secs_f64() * self.config.backoff_multiplier)
            .min(self.config.max_delay);
        if self.config.jitter {
            add_jitter(delay)
        } else {
            delay
        }
    }
}

/// Run `operation`, retrying transient failures up to `config.max_attempts`
/// more times.
///
/// Permanent errors are returned at once. After the last retry the final
/// error is returned.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut backoff = Backoff::new(config);
    let mut retries = 0;

    loop {
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        if !error.is_retryable() {
            return Err(error);
        }
        if retries >= config.max_attempts {
            tracing::debug!(error = %error, retries, "Giving up");
            return Err(error);
        }

        retries += 1;
        let delay = backoff.next_delay();
        tracing::warn!(
            error = %error,
            retry = retries,
            max_retries = config.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "Network operation failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

/// Stretch a delay by a random factor in `[1, 2]`
fn add_jitter(delay: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(1.0..=2.0);
    delay.mul_f64(factor)
}
