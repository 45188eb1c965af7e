//! Fixed-interval polling with an overall deadline.
//!
//! Every attempt is classified: `Ok` ends the loop, a [`Failure::Minor`] keeps polling and a
//! [`Failure::Severe`] aborts immediately with the wrapped error. When the deadline passes
//! while only minor failures were seen, the loop ends with [`Error::Timeout`] carrying the
//! last minor failure. Cancellation of the token ends it with [`Error::Cancelled`].

use std::future::Future;
use std::time::Duration;

use log::debug;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::errors::Error;

/// Interval between two polls of the platform.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);
/// Overall deadline for one wait.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaitConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        WaitConfig {
            interval: DEFAULT_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Debug)]
pub enum Failure {
    /// Recoverable, keep polling.
    Minor(Error),
    /// Not recoverable, stop polling.
    Severe(Error),
}

pub fn minor(err: impl Into<Error>) -> Failure {
    Failure::Minor(err.into())
}

pub fn severe(err: impl Into<Error>) -> Failure {
    Failure::Severe(err.into())
}

/// Poll `attempt` every `config.interval` until it succeeds, fails severely, the deadline passes
/// or `cancel` fires. The first attempt runs immediately.
pub async fn until_timeout<F, Fut>(
    cancel: &CancellationToken,
    config: WaitConfig,
    mut attempt: F,
) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), Failure>>,
{
    let deadline = Instant::now() + config.timeout;
    let mut last_error: Option<Error> = None;

    loop {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = sleep_until(deadline) => return Err(timeout(last_error)),
            outcome = attempt() => outcome,
        };

        match outcome {
            Ok(()) => return Ok(()),
            Err(Failure::Severe(err)) => return Err(err),
            Err(Failure::Minor(err)) => {
                debug!("Condition not met yet, retrying in {:?}: {}", config.interval, err);
                last_error = Some(err);
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = sleep_until(deadline) => return Err(timeout(last_error)),
            _ = sleep(config.interval) => {}
        }
    }
}

fn timeout(last_error: Option<Error>) -> Error {
    Error::Timeout {
        last_error: last_error.map(|err| err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config() -> WaitConfig {
        WaitConfig::default()
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_immediately() {
        let start = Instant::now();
        let result = until_timeout(&CancellationToken::new(), config(), || async { Ok(()) }).await;
        assert!(result.is_ok());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_minor_failures_keep_polling() {
        let attempts = &AtomicU32::new(0);
        let start = Instant::now();
        let result = until_timeout(&CancellationToken::new(), config(), || async move {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(minor(Error::Config("not yet".to_string())))
            } else {
                Ok(())
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_severe_failure_aborts() {
        let attempts = &AtomicU32::new(0);
        let result = until_timeout(&CancellationToken::new(), config(), || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(severe(Error::Config("broken".to_string())))
        })
        .await;
        assert!(matches!(result, Err(Error::Config(ref msg)) if msg == "broken"));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_with_last_minor_error() {
        let start = Instant::now();
        let result = until_timeout(&CancellationToken::new(), config(), || async {
            Err(minor(Error::Config("still waiting".to_string())))
        })
        .await;
        match result {
            Err(Error::Timeout { last_error }) => {
                assert_eq!(last_error.as_deref(), Some("Invalid config: still waiting"))
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert_eq!(start.elapsed(), DEFAULT_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_is_not_a_timeout() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(12)).await;
            trigger.cancel();
        });
        let result = until_timeout(&cancel, config(), || async {
            Err(minor(Error::Config("still waiting".to_string())))
        })
        .await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
