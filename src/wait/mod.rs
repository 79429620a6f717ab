//! Readiness polling.
//!
//! [`wait_until`] is the generic poll loop: evaluate a predicate, stop on
//! success, otherwise sleep and try again until cancelled or timed out.
//! [`WaitStrategy`] is the capability a readiness check implements; the
//! manager wraps each strategy in a predicate that refreshes the container
//! handle first, so strategies always see the latest backend state.

pub mod strategies;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::container::Container;
use crate::error::{ContainerError, Result};

pub use strategies::{
    UntilCommandIsCompleted, UntilContainerIsRunning, UntilHttpRequestIsSucceeded,
    UntilMessageIsLogged, UntilOperationIsSucceeded, UntilPortIsAvailable,
};

/// A readiness check evaluated against a freshly refreshed container.
#[async_trait]
pub trait WaitStrategy: Send + Sync {
    /// Short name for logs and errors.
    fn name(&self) -> &'static str;

    /// `Ok(true)` once the container is ready. Errors abort the wait.
    async fn until(&self, container: &Container) -> Result<bool>;

    /// Called before every wait, so per-wait state starts fresh on each
    /// `start`.
    fn reset(&self) {}
}

/// Race `future` against `cancel`.
pub async fn cancellable<T, F>(cancel: &CancellationToken, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ContainerError::Cancelled),
        result = future => result,
    }
}

/// Poll `predicate` every `interval` until it returns true.
///
/// Checks cancellation before every evaluation. With `timeout` set, gives up
/// with [`ContainerError::Timeout`] once a failed evaluation ends past the
/// deadline.
pub async fn wait_until<F, Fut>(
    mut predicate: F,
    interval: Duration,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let started = Instant::now();
    let mut polls: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(ContainerError::Cancelled);
        }

        polls += 1;
        if cancellable(cancel, predicate()).await? {
            tracing::debug!("Ready after {} poll(s) in {:?}", polls, started.elapsed());
            return Ok(());
        }

        if let Some(limit) = timeout {
            if started.elapsed() >= limit {
                return Err(ContainerError::Timeout(limit));
            }
        }

        tracing::trace!("Poll {} not ready, retrying in {:?}", polls, interval);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ContainerError::Cancelled),
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    const INTERVAL: Duration = Duration::from_secs(1);

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_poll() {
        let polls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let started = Instant::now();

        wait_until(
            || async { Ok::<_, ContainerError>(polls.fetch_add(1, Ordering::SeqCst) + 1 >= 3) },
            INTERVAL,
            None,
            &cancel,
        )
        .await
        .unwrap();

        assert_eq!(polls.load(Ordering::SeqCst), 3);
        let elapsed = started.elapsed();
        assert!(elapsed >= INTERVAL * 2, "{elapsed:?}");
        assert!(elapsed <= INTERVAL * 3, "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out() {
        let cancel = CancellationToken::new();
        let err = wait_until(
            || async { Ok::<_, ContainerError>(false) },
            INTERVAL,
            Some(Duration::from_secs(5)),
            &cancel,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ContainerError::Timeout(d) if d == Duration::from_secs(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_first_poll_never_evaluates() {
        let polls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = wait_until(
            || async {
                polls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ContainerError>(true)
            },
            INTERVAL,
            None,
            &cancel,
        )
        .await
        .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(polls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_sleep() {
        let polls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            trigger.cancel();
        });

        let counter = Arc::clone(&polls);
        let err = wait_until(
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ContainerError>(false)
                }
            },
            INTERVAL,
            None,
            &cancel,
        )
        .await
        .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_predicate_error_aborts() {
        let cancel = CancellationToken::new();
        let err = wait_until(
            || async {
                Err::<bool, _>(ContainerError::WaitStrategy {
                    strategy: "test",
                    reason: "boom".to_string(),
                })
            },
            INTERVAL,
            None,
            &cancel,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ContainerError::WaitStrategy { .. }));
    }
}
