//! Bounded retry with backoff.
//!
//! A single parameterized policy used wherever an operation can fail
//! transiently: moving a freshly downloaded file that the browser still holds
//! a lock on, or any network-facing collaborator that wants the same
//! behaviour.
//!
//! # Example
//!
//! ```
//! use bidstage::retry::{is_transient_io, RetryPolicy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new(3, Duration::ZERO);
//! let value = policy
//!     .run(|_attempt| Ok::<_, std::io::Error>(42), is_transient_io)
//!     .unwrap();
//! assert_eq!(value, 42);
//! ```

use std::io;
use std::thread;
use std::time::Duration;

use thiserror::Error;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    /// Same delay before every retry.
    #[default]
    Fixed,
    /// `delay * attempt`.
    Linear,
    /// `delay * 2^(attempt - 1)`.
    Exponential,
}

/// Retry policy: attempt bound plus backoff schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one. Never below 1.
    pub max_attempts: u32,
    /// Base delay between attempts.
    pub delay: Duration,
    /// Growth of the delay.
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    /// Five attempts, one second apart.
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(1),
            backoff: Backoff::Fixed,
        }
    }
}

/// Failure after the policy gave up.
#[derive(Debug, Error)]
pub enum RetryError<E: std::error::Error + 'static> {
    /// The error was not considered transient; no further attempts were made.
    #[error("{0}")]
    Permanent(#[source] E),

    /// Every attempt failed with a transient error.
    #[error("gave up after {attempts} attempt(s): {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: E,
    },
}

impl<E: std::error::Error + 'static> RetryError<E> {
    /// The underlying error of the final attempt.
    #[must_use]
    pub fn into_inner(self) -> E {
        match self {
            Self::Permanent(e) | Self::Exhausted { last: e, .. } => e,
        }
    }

    /// Whether the policy ran out of attempts.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

impl RetryPolicy {
    /// Create a fixed-backoff policy.
    #[must_use]
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            backoff: Backoff::Fixed,
        }
    }

    /// Set the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Delay to wait after the given failed attempt (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Linear => self.delay.saturating_mul(attempt),
            Backoff::Exponential => {
                let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
                self.delay.saturating_mul(factor)
            }
        }
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number. `is_transient` decides
    /// whether a failure is worth another attempt.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError::Permanent`] for the first non-transient error and
    /// [`RetryError::Exhausted`] when every attempt failed transiently.
    pub fn run<T, E, F, P>(&self, mut op: F, is_transient: P) -> Result<T, RetryError<E>>
    where
        E: std::error::Error + 'static,
        F: FnMut(u32) -> Result<T, E>,
        P: Fn(&E) -> bool,
    {
        let max = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if !is_transient(&e) => return Err(RetryError::Permanent(e)),
                Err(e) if attempt >= max => {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: e,
                    })
                }
                Err(e) => {
                    let delay = self.delay_after(attempt);
                    log::warn!(
                        "Attempt {}/{} failed, retrying in {:?}: {}",
                        attempt,
                        max,
                        delay,
                        e
                    );
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                    attempt += 1;
                }
            }
        }
    }
}

/// Classify I/O errors caused by another process briefly holding the file.
///
/// Browsers and antivirus scanners keep a handle on a finished download for a
/// short moment; on Windows this surfaces as a sharing or lock violation.
#[must_use]
pub fn is_transient_io(err: &io::Error) -> bool {
    if matches!(
        err.kind(),
        io::ErrorKind::PermissionDenied
            | io::ErrorKind::ResourceBusy
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::Interrupted
    ) {
        return true;
    }

    #[cfg(windows)]
    {
        // ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
        if matches!(err.raw_os_error(), Some(32) | Some(33)) {
            return true;
        }
    }

    false
}
