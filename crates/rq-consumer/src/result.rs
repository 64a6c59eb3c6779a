//! The closed result code taxonomy (spec §4.5).

/// Outcome of one `process` call. `process` never raises; every exit path —
/// including internal bugs — is folded into one of these variants (spec §7,
/// §8.1 invariant 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    /// Handler ran to completion (or no handler needed).
    Ok,
    /// Expired; dropped.
    Ancient,
    /// Unparseable envelope; dropped.
    DecodingError,
    /// Come back later; the broker will redeliver.
    Delayed,
    /// Someone else (or this consumer, earlier) is running it.
    HandlerNotYetTimedOut,
    /// Concurrent takeover lost the mutex race.
    MutexLocked,
    /// Handler raised; retry budget remains.
    HandlerCrash,
    /// Gave up: attempts budget exhausted.
    AttemptsLimitReached,
    /// Gave up: exceptions budget exhausted.
    ExceptionsLimitReached,
    /// Bug in the state machine itself; logged, not re-raised.
    InternalError,
}

impl ResultCode {
    /// `true` means the broker delivery was **not** acked and will return.
    pub fn reject(&self) -> bool {
        matches!(
            self,
            ResultCode::Delayed
                | ResultCode::HandlerNotYetTimedOut
                | ResultCode::MutexLocked
                | ResultCode::HandlerCrash
        )
    }

    /// `true` means the state machine has definitively given up and
    /// `Handler::on_failure` should run.
    pub fn failure(&self) -> bool {
        matches!(self, ResultCode::AttemptsLimitReached | ResultCode::ExceptionsLimitReached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_matches_spec_table() {
        let cases = [
            (ResultCode::Ok, false, false),
            (ResultCode::Ancient, false, false),
            (ResultCode::DecodingError, false, false),
            (ResultCode::Delayed, true, false),
            (ResultCode::HandlerNotYetTimedOut, true, false),
            (ResultCode::MutexLocked, true, false),
            (ResultCode::HandlerCrash, true, false),
            (ResultCode::AttemptsLimitReached, false, true),
            (ResultCode::ExceptionsLimitReached, false, true),
            (ResultCode::InternalError, false, false),
        ];

        for (code, reject, failure) in cases {
            assert_eq!(code.reject(), reject, "{code:?} reject mismatch");
            assert_eq!(code.failure(), failure, "{code:?} failure mismatch");
        }
    }
}
