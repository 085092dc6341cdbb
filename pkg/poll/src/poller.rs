use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use rand::Rng;
use tracing::{debug, warn};

use crate::error::{ConditionError, ConditionResult, PollError};
use crate::spec::PollSpec;

/// What the loop does after one evaluation.
#[derive(Debug)]
enum Step<T> {
    Done(T),
    Fail(PollError),
    Sleep(Duration),
}

/// Tick bookkeeping shared by the async and blocking loops.
struct Ticker<'a> {
    condition: &'a str,
    spec: &'a PollSpec,
    start: Instant,
    attempts: u32,
    next_interval: Duration,
    last_error: Option<anyhow::Error>,
}

impl<'a> Ticker<'a> {
    fn new(condition: &'a str, spec: &'a PollSpec) -> Self {
        Self {
            condition,
            spec,
            start: Instant::now(),
            attempts: 0,
            next_interval: spec.interval,
            last_error: None,
        }
    }

    fn observe<T>(&mut self, outcome: Result<Option<T>, ConditionError>) -> Step<T> {
        self.attempts += 1;
        match outcome {
            Ok(Some(value)) => {
                debug!(
                    condition = %self.condition,
                    attempts = self.attempts,
                    elapsed_ms = self.start.elapsed().as_millis() as u64,
                    "Condition met"
                );
                return Step::Done(value);
            }
            Ok(None) => {
                debug!(condition = %self.condition, attempt = self.attempts, "Condition not met yet");
            }
            Err(ConditionError::Fatal(source)) => {
                warn!(condition = %self.condition, error = %source, "Condition failed, giving up");
                return Step::Fail(PollError::Fatal {
                    condition: self.condition.to_string(),
                    source,
                });
            }
            Err(ConditionError::Retryable(e)) => {
                debug!(condition = %self.condition, attempt = self.attempts, error = %e, "Retryable error");
                self.last_error = Some(e);
            }
        }

        let elapsed = self.start.elapsed();
        if elapsed >= self.spec.timeout {
            warn!(
                condition = %self.condition,
                attempts = self.attempts,
                elapsed_ms = elapsed.as_millis() as u64,
                "Timed out waiting for condition"
            );
            return Step::Fail(PollError::Timeout {
                condition: self.condition.to_string(),
                elapsed,
                attempts: self.attempts,
                last_error: self.last_error.take(),
            });
        }

        Step::Sleep(self.advance())
    }

    /// Sleep before the next tick, growing the interval when backoff is set.
    fn advance(&mut self) -> Duration {
        let Some(backoff) = &self.spec.backoff else {
            return self.spec.interval;
        };
        let current = self.next_interval;
        self.next_interval = current.mul_f64(backoff.factor).min(backoff.max_interval);
        if backoff.jitter {
            current.mul_f64(rand::rng().random_range(1.0..1.5))
        } else {
            current
        }
    }

    fn panicked(&self, payload: Box<dyn Any + Send>) -> PollError {
        let message = panic_message(payload.as_ref());
        warn!(condition = %self.condition, panic = %message, "Condition panicked");
        PollError::Panicked {
            condition: self.condition.to_string(),
            message,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn bool_to_option(outcome: ConditionResult) -> Result<Option<()>, ConditionError> {
    outcome.map(|done| done.then_some(()))
}

/// Evaluate `check` every `spec.interval` until it yields a value, fails
/// fatally, panics, or `spec.timeout` elapses.
///
/// At least one evaluation always happens, even with a zero timeout. Without
/// `immediate` the first evaluation waits one interval.
pub async fn poll_value<T, F, Fut>(
    condition: &str,
    spec: &PollSpec,
    mut check: F,
) -> Result<T, PollError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, ConditionError>>,
{
    spec.validate()?;
    let mut ticker = Ticker::new(condition, spec);
    if !spec.immediate {
        tokio::time::sleep(spec.interval).await;
    }
    loop {
        let outcome = match AssertUnwindSafe(async { check().await })
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(payload) => return Err(ticker.panicked(payload)),
        };
        match ticker.observe(outcome) {
            Step::Done(value) => return Ok(value),
            Step::Fail(err) => return Err(err),
            Step::Sleep(d) => tokio::time::sleep(d).await,
        }
    }
}

/// Poll a boolean condition. See [`poll_value`].
pub async fn poll_until<F, Fut>(condition: &str, spec: &PollSpec, mut check: F) -> Result<(), PollError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ConditionResult>,
{
    poll_value(condition, spec, || check().map(bool_to_option)).await
}

/// Blocking form of [`poll_value`] for callers outside a runtime.
pub fn poll_value_blocking<T, F>(condition: &str, spec: &PollSpec, mut check: F) -> Result<T, PollError>
where
    F: FnMut() -> Result<Option<T>, ConditionError>,
{
    spec.validate()?;
    let mut ticker = Ticker::new(condition, spec);
    if !spec.immediate {
        std::thread::sleep(spec.interval);
    }
    loop {
        let outcome = match std::panic::catch_unwind(AssertUnwindSafe(&mut check)) {
            Ok(outcome) => outcome,
            Err(payload) => return Err(ticker.panicked(payload)),
        };
        match ticker.observe(outcome) {
            Step::Done(value) => return Ok(value),
            Step::Fail(err) => return Err(err),
            Step::Sleep(d) => std::thread::sleep(d),
        }
    }
}

/// Blocking form of [`poll_until`].
pub fn poll_until_blocking<F>(condition: &str, spec: &PollSpec, mut check: F) -> Result<(), PollError>
where
    F: FnMut() -> ConditionResult,
{
    poll_value_blocking(condition, spec, || bool_to_option(check()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::Backoff;
    use anyhow::anyhow;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[tokio::test]
    async fn immediate_success_does_not_sleep() {
        let spec = PollSpec::new(Duration::from_secs(5), Duration::from_secs(60)).immediate(true);
        let start = Instant::now();
        poll_until("already true", &spec, || async { Ok(true) })
            .await
            .unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn first_check_waits_one_interval_without_immediate() {
        let spec = PollSpec::new(ms(50), Duration::from_secs(5));
        let start = Instant::now();
        poll_until("true after first sleep", &spec, || async { Ok(true) })
            .await
            .unwrap();
        assert!(start.elapsed() >= ms(50));
    }

    #[tokio::test]
    async fn never_true_times_out_within_bounds() {
        let spec = PollSpec::new(ms(20), ms(100)).immediate(true);
        let start = Instant::now();
        let err = poll_until("never", &spec, || async { Ok(false) })
            .await
            .unwrap_err();
        let elapsed = start.elapsed();
        assert!(err.is_timeout());
        assert!(elapsed >= ms(100));
        assert!(elapsed < Duration::from_secs(1));
        assert!(err.last_error().is_none());
    }

    #[tokio::test]
    async fn fatal_error_short_circuits() {
        let calls = Arc::new(AtomicU32::new(0));
        let spec = PollSpec::new(ms(10), Duration::from_secs(30)).immediate(true);
        let start = Instant::now();
        let c = calls.clone();
        let err = poll_until("fatal", &spec, move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(ConditionError::fatal(anyhow!("malformed object")))
            }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, PollError::Fatal { .. }));
        assert!(err.to_string().contains("malformed object"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn retryable_errors_then_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let spec = PollSpec::new(ms(5), Duration::from_secs(5)).immediate(true);
        let c = calls.clone();
        poll_until("third time", &spec, move || {
            let c = c.clone();
            async move {
                let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(ConditionError::retryable(anyhow!("conflict #{n}")))
                } else {
                    Ok(true)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn timeout_carries_last_retryable_error() {
        let spec = PollSpec::new(ms(10), ms(50)).immediate(true);
        let err = poll_until("object to appear", &spec, || async {
            Err(ConditionError::retryable(anyhow!("object not found")))
        })
        .await
        .unwrap_err();
        let last = err.last_error().expect("last error kept");
        assert_eq!(last.to_string(), "object not found");
        assert!(err.to_string().contains("waiting for object to appear"));
    }

    #[tokio::test]
    async fn zero_timeout_is_single_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let spec = PollSpec::new(ms(10), Duration::ZERO).immediate(true);
        let c = calls.clone();
        let err = poll_until("once", &spec, move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(false)
            }
        })
        .await
        .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    async fn explode() -> ConditionResult {
        panic!("boom")
    }

    #[tokio::test]
    async fn panic_becomes_error() {
        let spec = PollSpec::new(ms(10), Duration::from_secs(5)).immediate(true);
        let err = poll_until("panicky", &spec, explode).await.unwrap_err();
        match err {
            PollError::Panicked { message, .. } => assert_eq!(message, "boom"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn zero_interval_is_rejected() {
        let spec = PollSpec::new(Duration::ZERO, Duration::from_secs(1));
        let err = poll_until("bad", &spec, || async { Ok(true) })
            .await
            .unwrap_err();
        assert!(matches!(err, PollError::InvalidSpec(_)));
    }

    #[tokio::test]
    async fn poll_value_returns_found_item() {
        let calls = Arc::new(AtomicU32::new(0));
        let spec = PollSpec::new(ms(5), Duration::from_secs(5)).immediate(true);
        let c = calls.clone();
        let found = poll_value("value", &spec, move || {
            let c = c.clone();
            async move {
                let n = c.fetch_add(1, Ordering::SeqCst);
                Ok((n >= 1).then(|| format!("item-{n}")))
            }
        })
        .await
        .unwrap();
        assert_eq!(found, "item-1");
    }

    #[test]
    fn backoff_grows_until_cap() {
        let spec = PollSpec::new(ms(10), Duration::from_secs(60)).with_backoff(Backoff {
            factor: 2.0,
            max_interval: ms(40),
            jitter: false,
        });
        let mut ticker = Ticker::new("growing", &spec);
        let sleeps: Vec<Duration> = (0..4).map(|_| ticker.advance()).collect();
        assert_eq!(sleeps, vec![ms(10), ms(20), ms(40), ms(40)]);
    }

    #[test]
    fn jitter_never_undercuts_interval() {
        let spec = PollSpec::new(ms(10), Duration::from_secs(60)).with_backoff(Backoff {
            factor: 1.0,
            max_interval: ms(10),
            jitter: true,
        });
        let mut ticker = Ticker::new("jittered", &spec);
        for _ in 0..20 {
            let d = ticker.advance();
            assert!(d >= ms(10) && d < ms(15));
        }
    }

    #[test]
    fn blocking_variant_times_out() {
        let spec = PollSpec::new(ms(5), ms(30)).immediate(true);
        let mut calls = 0;
        let err = poll_until_blocking("blocking never", &spec, || {
            calls += 1;
            Ok(false)
        })
        .unwrap_err();
        assert!(err.is_timeout());
        assert!(calls >= 2);
    }

    #[test]
    fn blocking_variant_catches_panic() {
        let spec = PollSpec::new(ms(5), ms(30)).immediate(true);
        let err = poll_until_blocking("blocking panic", &spec, || -> ConditionResult {
            panic!("{}", String::from("owned message"))
        })
        .unwrap_err();
        match err {
            PollError::Panicked { message, .. } => assert_eq!(message, "owned message"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
