//! The processing state machine (spec §4.3) — the core decision tree that
//! turns one delivery into exactly one handler execution across the whole
//! fleet, despite duplicate deliveries, crashes, and concurrent consumers.

use std::sync::Arc;
use std::time::Duration;

use rq_common::Clock;
use tracing::{error, info, warn};

use crate::dedup::{
    DedupStore, STATUS_COMPLETED, STATUS_INCOMPLETE, SUB_ACK_COUNT, SUB_ATTEMPTS, SUB_DELAY,
    SUB_EXCEPTIONS, SUB_EXPIRES, SUB_MUTEX, SUB_STATUS, SUB_TIMEOUT,
};
use crate::handler::{Handler, HandlerAdapter, HandlerError, HandlerOutcome};
use crate::message::MessageState;
use crate::result::ResultCode;

/// Everything one `process` call needs besides the message itself (spec §9:
/// "a re-architected design passes a `ProcessingContext` explicitly to each
/// `process` call" rather than threading a store/logger through instance
/// state).
pub struct ProcessingContext {
    pub store: Arc<dyn DedupStore>,
    pub clock: Arc<dyn Clock>,
}

impl ProcessingContext {
    pub fn new(store: Arc<dyn DedupStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }
}

/// Runs the decision tree from spec §4.3 against one [`MessageState`].
///
/// Never raises: every internal store error is caught and folded into
/// [`ResultCode::InternalError`] (spec §7, §8.1 invariant 1), mirroring the
/// same "ack-nothing, return, do not corrupt state" behavior the original
/// design gives to store failover blips.
pub async fn process(
    state: &MessageState,
    ctx: &ProcessingContext,
    handler: Arc<dyn Handler>,
) -> ResultCode {
    match try_process(state, ctx, handler).await {
        Ok(code) => code,
        Err(err) => {
            error!(error = %err, "processing state machine hit an internal error");
            ResultCode::InternalError
        }
    }
}

async fn try_process(
    state: &MessageState,
    ctx: &ProcessingContext,
    handler: Arc<dyn Handler>,
) -> crate::dedup::DedupResult<ResultCode> {
    // 1. DecodingError
    let envelope = match &state.envelope {
        None => {
            state.delivery.ack().await;
            return Ok(ResultCode::DecodingError);
        }
        Some(e) => e,
    };

    let now = ctx.clock.now();

    // 2. Ancient
    if envelope.is_expired(now) {
        state.delivery.ack().await;
        return Ok(ResultCode::Ancient);
    }

    let msg_id = &envelope.message_id;
    let redundant = envelope.redundant();

    // 3. Simple fast path: no store access at all (spec §8.1 invariant 6).
    if state.is_simple() {
        state.delivery.ack().await;
        let outcome = HandlerAdapter::run(
            run_handler(handler.clone(), state.delivery.payload().to_vec()),
            Duration::from_secs(state.policy.timeout_seconds.max(0) as u64),
        )
        .await;
        return Ok(match outcome {
            HandlerOutcome::Ok => ResultCode::Ok,
            HandlerOutcome::Raised(err) => {
                handler.on_exception(&err).await;
                handler.on_failure(ResultCode::AttemptsLimitReached).await;
                ResultCode::AttemptsLimitReached
            }
            HandlerOutcome::TimedOut => {
                handler.on_exception(&HandlerError("handler timed out".to_string())).await;
                handler.on_failure(ResultCode::AttemptsLimitReached).await;
                ResultCode::AttemptsLimitReached
            }
        });
    }

    let store = ctx.store.as_ref();

    // 4. First sighting
    let first_sighting = store
        .msetnx(
            msg_id,
            &[
                (SUB_STATUS, STATUS_INCOMPLETE),
                (SUB_EXPIRES, &envelope.expires_at.to_string()),
                (SUB_TIMEOUT, &(now + state.policy.timeout_seconds).to_string()),
            ],
        )
        .await?;

    if first_sighting {
        return run_and_record(state, ctx, handler.clone(), redundant, now).await;
    }

    // 5. Completed
    let status = store.get(msg_id, SUB_STATUS).await?;
    if status.as_deref() == Some(STATUS_COMPLETED) {
        ack(state, ctx, redundant).await?;
        return Ok(ResultCode::Ok);
    }

    // 6. Delayed
    if let Some(delay) = store.get(msg_id, SUB_DELAY).await? {
        let delay: i64 = delay.parse().unwrap_or(0);
        if delay > now {
            return Ok(ResultCode::Delayed);
        }
    }

    // 7. Handler not yet timed out
    let timeout: i64 = store
        .get(msg_id, SUB_TIMEOUT)
        .await?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    if timeout > now {
        return Ok(ResultCode::HandlerNotYetTimedOut);
    }

    // 8. Attempts limit reached
    let attempts: i64 = store
        .get(msg_id, SUB_ATTEMPTS)
        .await?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    if state.policy.attempts_limit_reached(attempts) {
        ack(state, ctx, redundant).await?;
        handler.on_failure(ResultCode::AttemptsLimitReached).await;
        return Ok(ResultCode::AttemptsLimitReached);
    }

    // 9. Exceptions limit reached
    let exceptions: i64 = store
        .get(msg_id, SUB_EXCEPTIONS)
        .await?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    if state.policy.exceptions_limit_reached(exceptions) {
        ack(state, ctx, redundant).await?;
        handler.on_failure(ResultCode::ExceptionsLimitReached).await;
        return Ok(ResultCode::ExceptionsLimitReached);
    }

    // 10. Takeover
    store
        .set(msg_id, SUB_TIMEOUT, &(now + state.policy.timeout_seconds).to_string())
        .await?;
    let acquired = store.setnx(msg_id, SUB_MUTEX, &now.to_string()).await?;
    if acquired {
        run_and_record(state, ctx, handler, redundant, now).await
    } else {
        // Conservative cleanup (spec §9): this delete can only ever remove a
        // stale lock left by this exact consumer on a prior crashed attempt,
        // since a live holder refreshes `timeout` before doing real work.
        store.del(msg_id, SUB_MUTEX).await?;
        Ok(ResultCode::MutexLocked)
    }
}

async fn run_and_record(
    state: &MessageState,
    ctx: &ProcessingContext,
    handler: Arc<dyn Handler>,
    redundant: bool,
    now: i64,
) -> crate::dedup::DedupResult<ResultCode> {
    let store = ctx.store.as_ref();
    let msg_id = state.msg_id().expect("run_and_record only reached with a decoded envelope");

    store.incr(msg_id, SUB_ATTEMPTS).await?;

    let outcome = HandlerAdapter::run(
        run_handler(handler.clone(), state.delivery.payload().to_vec()),
        Duration::from_secs(state.policy.timeout_seconds.max(0) as u64),
    )
    .await;

    match outcome {
        HandlerOutcome::Ok => {
            store.set(msg_id, SUB_STATUS, STATUS_COMPLETED).await?;
            store.set(msg_id, SUB_TIMEOUT, "0").await?;
            ack(state, ctx, redundant).await?;
            Ok(ResultCode::Ok)
        }
        HandlerOutcome::Raised(err) => record_failed_attempt(state, ctx, handler, redundant, now, &err).await,
        HandlerOutcome::TimedOut => {
            let err = HandlerError("handler timed out".to_string());
            record_failed_attempt(state, ctx, handler, redundant, now, &err).await
        }
    }
}

async fn record_failed_attempt(
    state: &MessageState,
    ctx: &ProcessingContext,
    handler: Arc<dyn Handler>,
    redundant: bool,
    now: i64,
    err: &HandlerError,
) -> crate::dedup::DedupResult<ResultCode> {
    let store = ctx.store.as_ref();
    let msg_id = state.msg_id().expect("record_failed_attempt only reached with a decoded envelope");

    handler.on_exception(err).await;
    let exceptions = store.incr(msg_id, SUB_EXCEPTIONS).await?;

    let attempts: i64 = store
        .get(msg_id, SUB_ATTEMPTS)
        .await?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    if state.policy.attempts_limit_reached(attempts) {
        ack(state, ctx, redundant).await?;
        handler.on_failure(ResultCode::AttemptsLimitReached).await;
        return Ok(ResultCode::AttemptsLimitReached);
    }

    if state.policy.exceptions_limit_reached(exceptions) {
        ack(state, ctx, redundant).await?;
        handler.on_failure(ResultCode::ExceptionsLimitReached).await;
        return Ok(ResultCode::ExceptionsLimitReached);
    }

    store.del(msg_id, SUB_MUTEX).await?;
    store.set(msg_id, SUB_TIMEOUT, "0").await?;
    store
        .set(msg_id, SUB_DELAY, &(now + state.policy.delay_seconds).to_string())
        .await?;
    warn!(msg_id, error = %err, "handler crashed, retry budget remains");
    Ok(ResultCode::HandlerCrash)
}

/// The `ack!` policy (spec §4.3): always ack the broker delivery, and purge
/// bookkeeping once both redundant deliveries (or the single non-redundant
/// one) have been acked.
async fn ack(state: &MessageState, ctx: &ProcessingContext, redundant: bool) -> crate::dedup::DedupResult<()> {
    state.delivery.ack().await;

    let msg_id = state.msg_id().expect("ack only reached with a decoded envelope");
    let store = ctx.store.as_ref();

    if !redundant {
        store.del_keys(msg_id).await?;
        return Ok(());
    }

    let ack_count = store.incr(msg_id, SUB_ACK_COUNT).await?;
    if ack_count == 2 {
        store.del_keys(msg_id).await?;
        info!(msg_id, "second redundant ack observed, purged bookkeeping");
    }
    Ok(())
}

fn run_handler(
    handler: Arc<dyn Handler>,
    payload: Vec<u8>,
) -> impl std::future::Future<Output = Result<(), HandlerError>> + Send + 'static {
    // `HandlerAdapter::run` spawns this as its own task so a timeout can
    // abort it (spec §5); the task needs an owned, `'static` future, so the
    // handler is held by `Arc` rather than borrowed.
    async move { handler.call(&payload).await }
}
