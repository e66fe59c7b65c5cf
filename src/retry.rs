//! Retry logic with capped exponential backoff
//!
//! Used by live-status subscribers to reconnect after a dropped channel. The delay starts at
//! `initial_delay`, grows by `backoff_multiplier` per failed attempt, is capped at `max_delay`,
//! and optionally gets random jitter to spread reconnect storms.
//!
//! # Example
//!
//! ```
//! use crawl_control::config::ReconnectConfig;
//! use crawl_control::retry::Backoff;
//!
//! let config = ReconnectConfig {
//!     jitter: false,
//!     ..ReconnectConfig::default()
//! };
//! let mut backoff = Backoff::new(&config);
//!
//! assert_eq!(backoff.next_delay(), Some(config.initial_delay));
//! assert_eq!(backoff.attempts(), 1);
//! ```

use crate::config::ReconnectConfig;
use crate::error::{Error, JobError};
use rand::Rng;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (connection refused, timeouts, a restarting server) return `true`.
/// Permanent failures (unknown job, bad configuration) return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|status| status.is_server_error())
            }
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::UnexpectedEof
            ),
            // The dispatcher may come back
            Error::WorkerUnavailable(_) => true,
            Error::Job(JobError::NotFound { .. }) => false,
            Error::Job(_) => false,
            Error::KnowledgeBaseNotFound(_) => false,
            Error::Database(_) | Error::Sqlx(_) => false,
            Error::Config { .. } => false,
            Error::ShuttingDown => false,
            Error::Serialization(_) => false,
            Error::ApiServerError(_) => false,
            Error::Other(_) => false,
        }
    }
}

/// Capped exponential backoff state
///
/// `next_delay` hands out the wait before each attempt and returns `None` once
/// `max_attempts` consecutive failures have been spent. `reset` starts over after a success.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: ReconnectConfig,
    attempt: u32,
    delay: Duration,
}

impl Backoff {
    /// Start a fresh backoff sequence
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            config: config.clone(),
            attempt: 0,
            delay: config.initial_delay,
        }
    }

    /// Failed attempts since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Delay to wait before the next attempt, or `None` when attempts are exhausted
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.config.max_attempts {
            return None;
        }
        self.attempt += 1;

        let current = self.delay;
        let next = Duration::from_secs_f64(current.as_secs_f64() * self.config.backoff_multiplier);
        self.delay = next.min(self.config.max_delay);

        let capped = current.min(self.config.max_delay);
        Some(if self.config.jitter {
            add_jitter(capped).min(self.config.max_delay)
        } else {
            capped
        })
    }

    /// Forget past failures
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.delay = self.config.initial_delay;
    }
}

/// Add random jitter to a delay
///
/// The result is uniformly distributed between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BaseId, JobId};

    fn fast_config(max_attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            max_attempts,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn backoff_grows_then_caps() {
        let mut backoff = Backoff::new(&fast_config(6));
        let delays: Vec<u128> = std::iter::from_fn(|| backoff.next_delay())
            .map(|d| d.as_millis())
            .collect();

        assert_eq!(delays, vec![10, 20, 40, 40, 40, 40]);
    }

    #[test]
    fn backoff_reset_starts_over() {
        let mut backoff = Backoff::new(&fast_config(3));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();

        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(10)));
    }

    #[test]
    fn jittered_backoff_never_exceeds_cap() {
        let mut config = fast_config(50);
        config.jitter = true;
        let mut backoff = Backoff::new(&config);

        while let Some(delay) = backoff.next_delay() {
            assert!(delay >= Duration::from_millis(10));
            assert!(delay <= config.max_delay);
        }
    }

    #[test]
    fn add_jitter_stays_within_bounds() {
        let base = Duration::from_millis(100);
        for _ in 0..1000 {
            let jittered = add_jitter(base);
            assert!(jittered >= base);
            assert!(jittered <= base * 2);
        }
    }

    #[test]
    fn io_connection_errors_are_retryable() {
        for kind in [
            std::io::ErrorKind::ConnectionRefused,
            std::io::ErrorKind::ConnectionReset,
            std::io::ErrorKind::UnexpectedEof,
            std::io::ErrorKind::TimedOut,
        ] {
            assert!(Error::Io(std::io::Error::new(kind, "x")).is_retryable());
        }
        assert!(
            !Error::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "x"
            ))
            .is_retryable()
        );
    }

    #[test]
    fn worker_unavailable_is_retryable() {
        assert!(Error::WorkerUnavailable("restarting".into()).is_retryable());
    }

    #[test]
    fn registry_errors_are_not_retryable() {
        assert!(!Error::job_not_found(JobId::new()).is_retryable());
        assert!(!Error::KnowledgeBaseNotFound(BaseId::new("kb")).is_retryable());
        assert!(!Error::ShuttingDown.is_retryable());
    }
}
