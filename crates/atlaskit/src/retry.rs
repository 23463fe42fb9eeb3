//! Exponential backoff around a single Atlas API call.
//!
//! Only [`Error::is_retryable`] failures (rate limiting, 5xx, dropped
//! connections) are attempted again. Everything else is handed straight
//! back so the caller can classify it.

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::types::RetryConfig;

/// Observer notified before every backoff wait.
pub trait RetryCallback: Sync {
    /// `attempt` is 1-based and names the attempt that just failed.
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &Error, delay_secs: u64);
}

/// Reports retries through the `log` facade.
pub struct LogCallback<'a> {
    /// What is being retried, e.g. "create cluster test-mongo"
    pub label: &'a str,
}

impl RetryCallback for LogCallback<'_> {
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &Error, delay_secs: u64) {
        log::warn!(
            "{}: attempt {attempt}/{max_attempts} failed: {error}. Retrying in {delay_secs}s...",
            self.label
        );
    }
}

/// Run `call`, retrying retryable failures with backoff.
///
/// The wait between attempts is cut short by `cancel`, which turns the
/// whole call into [`Error::Cancelled`]. When every attempt fails the
/// error of the final attempt is returned.
pub fn with_retry<T, F>(
    config: &RetryConfig,
    callback: Option<&dyn RetryCallback>,
    cancel: Option<&CancelToken>,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if cancel.is_some_and(CancelToken::is_cancelled) {
            return Err(Error::Cancelled);
        }

        let err = match call() {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        attempt += 1;
        if !err.is_retryable() || attempt >= attempts {
            return Err(err);
        }

        let delay = config.delay_for_attempt(attempt - 1);
        if let Some(callback) = callback {
            callback.on_retry(attempt, attempts, &err, delay.as_secs());
        }
        log::debug!("Backing off {}ms after: {err}", delay.as_millis());

        let interrupted = match cancel {
            Some(token) => token.sleep(delay),
            None => {
                std::thread::sleep(delay);
                false
            }
        };
        if interrupted {
            return Err(Error::Cancelled);
        }
    }
}
