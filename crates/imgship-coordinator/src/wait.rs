//! Clock, retry policy and resource waiting.
//!
//! Every delay in the pipeline goes through a [`Clock`] so tests can record
//! waits instead of sleeping. Delay sequences are produced by `backon`
//! builders and consumed by the manual loops below, which need per-attempt
//! control (error classification, cancellation, attempt counting) that a
//! closure-based retry combinator does not give.

use crate::aws::is_transient;
use anyhow::Result;
use backon::{BackoffBuilder, ConstantBuilder, ExponentialBuilder};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Source of time for delays and deadlines
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// Real time, via tokio
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

/// Sleep for `duration`, returning `false` if `cancel` fired first.
pub async fn sleep_or_cancel<C: Clock>(
    clock: &C,
    duration: Duration,
    cancel: Option<&CancellationToken>,
) -> bool {
    match cancel {
        Some(token) if token.is_cancelled() => false,
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => false,
                _ = clock.sleep(duration) => true,
            }
        }
        None => {
            clock.sleep(duration).await;
            true
        }
    }
}

/// Shape of the delay between attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Same delay every time
    Fixed(Duration),
    /// Doubling delay from `min`, capped at `max`
    Exponential { min: Duration, max: Duration },
}

/// Bounded attempts with a delay between them
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed(delay),
        }
    }

    pub fn exponential(max_attempts: u32, min: Duration, max: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential { min, max },
        }
    }

    /// The delays between consecutive attempts (`max_attempts - 1` of them)
    pub fn delays(&self) -> Box<dyn Iterator<Item = Duration> + Send> {
        let gaps = self.max_attempts.saturating_sub(1) as usize;
        match self.backoff {
            Backoff::Fixed(delay) => Box::new(
                ConstantBuilder::default()
                    .with_delay(delay)
                    .with_max_times(gaps)
                    .build(),
            ),
            Backoff::Exponential { min, max } => Box::new(
                ExponentialBuilder::default()
                    .with_min_delay(min)
                    .with_max_delay(max)
                    .with_factor(2.0)
                    .with_max_times(gaps)
                    .build(),
            ),
        }
    }
}

/// What ended a retried operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStop {
    /// A non-transient error
    Permanent,
    /// Every attempt failed transiently
    Exhausted,
    /// The cancellation token fired while waiting to retry
    Cancelled,
}

/// Why a retried operation gave up
#[derive(Debug)]
pub struct RetryFailure {
    /// Attempts made, including the failing one
    pub attempts: u32,
    pub stop: RetryStop,
    /// The last error
    pub source: anyhow::Error,
}

/// Run `op` until it succeeds, retrying only transient AWS errors.
///
/// `op` receives the 1-based attempt number. Non-transient errors are
/// returned immediately; transient ones are retried until the policy's
/// attempts are used up or `cancel` fires during a delay.
pub async fn retry_transient<C, T, F, Fut>(
    clock: &C,
    policy: &RetryPolicy,
    cancel: Option<&CancellationToken>,
    operation: &str,
    mut op: F,
) -> std::result::Result<T, RetryFailure>
where
    C: Clock,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delays = policy.delays();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let error = match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = %operation, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !is_transient(&error) {
            warn!(operation = %operation, attempt, error = %error, "Non-transient failure");
            return Err(RetryFailure {
                attempts: attempt,
                stop: RetryStop::Permanent,
                source: error,
            });
        }

        match delays.next() {
            Some(delay) if attempt < policy.max_attempts => {
                warn!(
                    operation = %operation,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_secs = delay.as_secs_f64(),
                    error = %error,
                    "Transient failure, retrying"
                );
                if !sleep_or_cancel(clock, delay, cancel).await {
                    warn!(operation = %operation, attempts = attempt, "Cancelled while waiting to retry");
                    return Err(RetryFailure {
                        attempts: attempt,
                        stop: RetryStop::Cancelled,
                        source: error,
                    });
                }
            }
            _ => {
                warn!(operation = %operation, attempts = attempt, error = %error, "Retries exhausted");
                return Err(RetryFailure {
                    attempts: attempt,
                    stop: RetryStop::Exhausted,
                    source: error,
                });
            }
        }
    }
}

/// How a [`wait_for_resource`] call ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome<T> {
    /// The check returned `value` on this attempt
    Ready { attempts: u32, value: T },
    /// The check never reported ready
    Exhausted { attempts: u32 },
    /// The cancellation token fired
    Cancelled,
}

/// Wait for a resource to become ready.
///
/// Calls `check` once per attempt with the policy's delay in between,
/// until it returns `Some`. Transient errors from `check` count as "not
/// ready"; other errors are returned.
///
/// # Example
/// ```ignore
/// let outcome = wait_for_resource(
///     &clock,
///     &RetryPolicy::fixed(3, Duration::from_secs(10)),
///     Some(&cancel),
///     || async { lambda.get_function(&name).await },
///     "function",
/// ).await?;
/// ```
pub async fn wait_for_resource<C, T, F, Fut>(
    clock: &C,
    policy: &RetryPolicy,
    cancel: Option<&CancellationToken>,
    mut check: F,
    resource_name: &str,
) -> Result<WaitOutcome<T>>
where
    C: Clock,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let mut delays = policy.delays();
    let mut attempts = 0u32;

    loop {
        if cancel.is_some_and(|t| t.is_cancelled()) {
            return Ok(WaitOutcome::Cancelled);
        }

        attempts += 1;
        match check().await {
            Ok(Some(value)) => {
                debug!(resource = %resource_name, attempts, "Resource ready");
                return Ok(WaitOutcome::Ready { attempts, value });
            }
            Ok(None) => {
                debug!(resource = %resource_name, attempt = attempts, "Resource not ready");
            }
            Err(e) if is_transient(&e) => {
                warn!(resource = %resource_name, error = %e, "Transient error checking resource");
            }
            Err(e) => {
                warn!(resource = %resource_name, error = ?e, "Resource check failed");
                return Err(e);
            }
        }

        let Some(delay) = delays.next().filter(|_| attempts < policy.max_attempts) else {
            return Ok(WaitOutcome::Exhausted { attempts });
        };

        if !sleep_or_cancel(clock, delay, cancel).await {
            return Ok(WaitOutcome::Cancelled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::AwsError;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Records requested sleeps and returns immediately
    #[derive(Default)]
    struct InstantClock {
        slept: Mutex<Vec<Duration>>,
    }

    impl Clock for InstantClock {
        fn now(&self) -> Instant {
            Instant::now()
        }

        fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
            self.slept.lock().unwrap().push(duration);
            std::future::ready(())
        }
    }

    fn throttled() -> anyhow::Error {
        anyhow::Error::new(AwsError::Throttled)
    }

    #[test]
    fn fixed_policy_yields_attempts_minus_one_delays() {
        let policy = RetryPolicy::fixed(3, Duration::from_secs(10));
        let delays: Vec<_> = policy.delays().collect();
        assert_eq!(delays, vec![Duration::from_secs(10); 2]);
    }

    #[test]
    fn exponential_policy_grows_and_caps() {
        let policy =
            RetryPolicy::exponential(5, Duration::from_secs(1), Duration::from_secs(3));
        let delays: Vec<_> = policy.delays().collect();
        assert_eq!(delays.len(), 4);
        assert_eq!(delays[0], Duration::from_secs(1));
        assert_eq!(delays[1], Duration::from_secs(2));
        assert!(delays.iter().all(|d| *d <= Duration::from_secs(3)));
    }

    #[tokio::test]
    async fn retry_stops_after_max_attempts() {
        let clock = InstantClock::default();
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(3, Duration::from_secs(10));

        let result: std::result::Result<(), _> = retry_transient(&clock, &policy, None, "op", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(throttled()) }
        })
        .await;

        let failure = result.unwrap_err();
        assert_eq!(failure.attempts, 3);
        assert_eq!(failure.stop, RetryStop::Exhausted);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(clock.slept.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn retry_does_not_retry_permanent_errors() {
        let clock = InstantClock::default();
        let policy = RetryPolicy::fixed(3, Duration::from_secs(10));

        let result: std::result::Result<(), _> =
            retry_transient(&clock, &policy, None, "op", |_| async {
                Err(anyhow::anyhow!("access denied"))
            })
            .await;

        let failure = result.unwrap_err();
        assert_eq!(failure.attempts, 1);
        assert_eq!(failure.stop, RetryStop::Permanent);
        assert!(clock.slept.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn retry_returns_first_success() {
        let clock = InstantClock::default();
        let policy = RetryPolicy::fixed(3, Duration::from_secs(10));

        let value = retry_transient(&clock, &policy, None, "op", |attempt| async move {
            if attempt < 2 { Err(throttled()) } else { Ok(attempt) }
        })
        .await
        .unwrap();

        assert_eq!(value, 2);
        assert_eq!(*clock.slept.lock().unwrap(), vec![Duration::from_secs(10)]);
    }

    #[tokio::test]
    async fn retry_stops_waiting_when_cancelled() {
        let clock = InstantClock::default();
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(3, Duration::from_secs(10));
        let cancel = CancellationToken::new();

        let result: std::result::Result<(), _> =
            retry_transient(&clock, &policy, Some(&cancel), "op", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                cancel.cancel();
                async { Err(throttled()) }
            })
            .await;

        let failure = result.unwrap_err();
        assert_eq!(failure.stop, RetryStop::Cancelled);
        assert_eq!(failure.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(clock.slept.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn wait_reports_ready_attempt() {
        let clock = InstantClock::default();
        let policy = RetryPolicy::fixed(3, Duration::from_secs(10));
        let calls = AtomicU32::new(0);

        let outcome = wait_for_resource(
            &clock,
            &policy,
            None,
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Ok((n == 3).then_some(n)) }
            },
            "thing",
        )
        .await
        .unwrap();

        assert_eq!(
            outcome,
            WaitOutcome::Ready {
                attempts: 3,
                value: 3
            }
        );
    }

    #[tokio::test]
    async fn wait_exhausts_after_max_attempts() {
        let clock = InstantClock::default();
        let policy = RetryPolicy::fixed(3, Duration::from_secs(10));

        let outcome = wait_for_resource(&clock, &policy, None, || async { Ok(None::<()>) }, "thing")
            .await
            .unwrap();

        assert_eq!(outcome, WaitOutcome::Exhausted { attempts: 3 });
        assert_eq!(clock.slept.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn wait_honours_cancellation() {
        let clock = InstantClock::default();
        let policy = RetryPolicy::fixed(3, Duration::from_secs(10));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = wait_for_resource(
            &clock,
            &policy,
            Some(&cancel),
            || async { Ok(None::<()>) },
            "thing",
        )
        .await
        .unwrap();

        assert_eq!(outcome, WaitOutcome::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_clock_sleep_advances_paused_time() {
        let clock = TokioClock;
        let start = clock.now();
        clock.sleep(Duration::from_secs(10)).await;
        assert!(clock.now() - start >= Duration::from_secs(10));
    }
}
