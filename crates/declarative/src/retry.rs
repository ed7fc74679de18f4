//! Retry logic with exponential backoff for transient provider errors.

use crate::error::{Error, Result};
use crate::provider::ProviderError;
use crate::types::RetryConfig;
use std::thread;

/// Callback trait for retry progress notifications.
pub trait RetryCallback: Sync {
    /// Called when an operation is being retried.
    ///
    /// # Arguments
    /// * `attempt` - Attempt that just failed (1-indexed)
    /// * `max_attempts` - Maximum number of attempts
    /// * `error` - The transient error that triggered the retry
    /// * `delay_ms` - Milliseconds until next attempt
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &Error, delay_ms: u128);
}

/// No-op callback that does nothing.
pub struct NoCallback;

impl RetryCallback for NoCallback {
    fn on_retry(&self, _attempt: u32, _max_attempts: u32, _error: &Error, _delay_ms: u128) {}
}

/// Callback that reports retries through the `log` facade.
pub struct LogCallback;

impl RetryCallback for LogCallback {
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &Error, delay_ms: u128) {
        log::warn!(
            "Attempt {}/{} failed: {}. Retrying in {}ms...",
            attempt,
            max_attempts,
            error,
            delay_ms
        );
    }
}

/// Execute a provider call for `node` with retry logic.
///
/// The operation receives the 1-indexed attempt number. Retryable errors
/// are retried with exponential backoff; anything else, or the last
/// retryable error once attempts run out, becomes
/// [`Error::ProviderFatal`].
pub fn with_retry<T, F>(
    config: &RetryConfig,
    node: &str,
    callback: Option<&dyn RetryCallback>,
    mut operation: F,
) -> Result<T>
where
    F: FnMut(u32) -> std::result::Result<T, ProviderError>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        let err = match operation(attempt + 1) {
            Ok(result) => return Ok(result),
            Err(err) => err,
        };

        // Non-retryable errors and the final attempt are fatal
        if !err.is_retryable() || attempt + 1 >= max_attempts {
            return Err(Error::ProviderFatal {
                node: node.to_string(),
                attempts: attempt + 1,
                source: err,
            });
        }

        let delay = config.delay_for_attempt(attempt);
        let transient = Error::ProviderTransient {
            node: node.to_string(),
            source: err,
        };
        if let Some(cb) = callback {
            cb.on_retry(attempt + 1, max_attempts, &transient, delay.as_millis());
        }

        thread::sleep(delay);
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(1),
            backoff_factor: 1.0,
            max_delay: Duration::from_millis(5),
        }
    }

    fn throttled() -> ProviderError {
        ProviderError::Throttled {
            message: "rate exceeded".to_string(),
        }
    }

    #[test]
    fn test_with_retry_success_first_try() {
        let result = with_retry(&RetryConfig::no_retry(), "n", None, |_| Ok::<_, ProviderError>(42));
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn test_with_retry_non_retryable_error() {
        let attempts = AtomicU32::new(0);

        let result: Result<()> = with_retry(&fast(5), "n", None, |_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Validation {
                message: "bad name".to_string(),
            })
        });

        match result {
            Err(Error::ProviderFatal { attempts: n, .. }) => assert_eq!(n, 1),
            other => panic!("expected fatal error, got {other:?}"),
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_with_retry_eventual_success() {
        let seen = AtomicU32::new(0);

        let result = with_retry(&fast(3), "n", None, |attempt| {
            seen.store(attempt, Ordering::SeqCst);
            if attempt < 3 { Err(throttled()) } else { Ok(attempt) }
        });

        assert_eq!(result.unwrap(), 3);
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_with_retry_exhaustion_escalates() {
        let attempts = AtomicU32::new(0);

        let result: Result<()> = with_retry(&fast(3), "queue", None, |_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Timeout {
                after: Duration::from_secs(1),
            })
        });

        match result {
            Err(Error::ProviderFatal { node, attempts: n, source }) => {
                assert_eq!(node, "queue");
                assert_eq!(n, 3);
                assert!(source.is_retryable());
            }
            other => panic!("expected fatal error, got {other:?}"),
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_zero_attempts_still_calls_once() {
        let attempts = AtomicU32::new(0);
        let _: Result<()> = with_retry(&fast(0), "n", None, |_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(throttled())
        });
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_invoked() {
        struct CountingCallback(Arc<AtomicU32>);
        impl RetryCallback for CountingCallback {
            fn on_retry(&self, _: u32, _: u32, error: &Error, _: u128) {
                assert!(matches!(error, Error::ProviderTransient { .. }));
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let callback_count = Arc::new(AtomicU32::new(0));
        let callback = CountingCallback(callback_count.clone());

        let _: Result<()> = with_retry(&fast(3), "n", Some(&callback), |_| Err(throttled()));

        // Called for each retry, not for the final attempt
        assert_eq!(callback_count.load(Ordering::SeqCst), 2);
    }
}
