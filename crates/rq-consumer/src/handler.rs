//! Handler capability and the adapter that runs it under a hard timeout
//! (spec §4.4, §5 "Chosen preemption contract").

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

/// The tagged-union outcome of one handler invocation attempt, used
/// internally to avoid threading exception state through the decision tree
/// (spec §9 "Exception-based control flow in the handler").
pub enum HandlerOutcome {
    Ok,
    Raised(HandlerError),
    TimedOut,
}

/// An error raised by user handler code, or synthesized for a timeout.
#[derive(Debug)]
pub struct HandlerError(pub String);

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for HandlerError {}

/// The user-supplied processing capability (spec §4.4).
///
/// Because a timed-out handler can be taken over by another consumer, a
/// `call` implementation may run concurrently with another execution of
/// itself for the same logical message. This trait does not — and cannot —
/// make that safe; idempotency is the implementor's responsibility.
#[async_trait]
pub trait Handler: Send + Sync {
    /// The primary processing call. May return an error; panics are treated
    /// specially (see `HandlerAdapter::run`), not folded into this path.
    async fn call(&self, payload: &[u8]) -> Result<(), HandlerError>;

    /// Invoked once after each execution that ended in an error (raised or
    /// timed out).
    async fn on_exception(&self, _error: &HandlerError) {}

    /// Invoked once when the state machine has definitively given up
    /// (`ResultCode::failure() == true`).
    async fn on_failure(&self, _code: crate::result::ResultCode) {}
}

/// Runs a [`Handler`] under a hard wall-clock timeout.
///
/// Handlers must be `async` and yield at their I/O boundaries for the
/// timeout to actually interrupt them — see spec §5's "Chosen preemption
/// contract" for why this is the stated requirement rather than a silently
/// broken promise of true preemption.
pub struct HandlerAdapter;

impl HandlerAdapter {
    /// Invoke `call_fut` (already bound to one handler + payload) with a
    /// timeout. On expiry, aborts the task and reports `TimedOut`. A panic
    /// inside the task — e.g. a test assertion failure — is resumed on this
    /// thread rather than folded into `Raised` (spec §7's testing hook).
    pub async fn run<F>(call_fut: F, timeout: Duration) -> HandlerOutcome
    where
        F: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let boxed: Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send>> = Box::pin(call_fut);
        let task = tokio::spawn(boxed);
        let abort_handle = task.abort_handle();

        tokio::select! {
            result = task => {
                match result {
                    Ok(Ok(())) => HandlerOutcome::Ok,
                    Ok(Err(e)) => HandlerOutcome::Raised(e),
                    Err(join_err) if join_err.is_panic() => {
                        std::panic::resume_unwind(join_err.into_panic());
                    }
                    Err(join_err) => {
                        // Task was cancelled out from under us (shouldn't
                        // happen on this path, but don't lose the signal).
                        HandlerOutcome::Raised(HandlerError(join_err.to_string()))
                    }
                }
            }
            _ = tokio::time::sleep(timeout) => {
                abort_handle.abort();
                warn!(timeout_secs = timeout.as_secs(), "handler timed out, aborting task");
                HandlerOutcome::TimedOut
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn successful_call_reports_ok() {
        let outcome = HandlerAdapter::run(async { Ok(()) }, Duration::from_secs(1)).await;
        assert!(matches!(outcome, HandlerOutcome::Ok));
    }

    #[tokio::test]
    async fn raising_call_reports_raised() {
        let outcome = HandlerAdapter::run(
            async { Err(HandlerError("boom".to_string())) },
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(outcome, HandlerOutcome::Raised(_)));
    }

    #[tokio::test]
    async fn slow_call_times_out() {
        let outcome = HandlerAdapter::run(
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
            Duration::from_millis(20),
        )
        .await;
        assert!(matches!(outcome, HandlerOutcome::TimedOut));
    }

    #[tokio::test]
    async fn timed_out_task_is_aborted_not_left_running() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let reached_past_sleep = Arc::new(AtomicBool::new(false));
        let flag = reached_past_sleep.clone();

        let outcome = HandlerAdapter::run(
            async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                flag.store(true, Ordering::SeqCst);
                Ok(())
            },
            Duration::from_millis(20),
        )
        .await;
        assert!(matches!(outcome, HandlerOutcome::TimedOut));

        // Give the aborted task a chance to run if it hadn't actually been
        // cancelled; it must never reach the line past its sleep.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!reached_past_sleep.load(Ordering::SeqCst));
    }
}
