//! In-process representation of a single delivery (spec §3.3).

use std::sync::Arc;

use crate::delivery::Delivery;
use crate::envelope::{self, Envelope, EnvelopeError};
use crate::policy::HandlerPolicy;

/// Owns everything the processing state machine needs for one delivery:
/// the decoded (or failed-to-decode) envelope, the handler policy in force,
/// and the raw delivery so it can be acked or rejected.
///
/// Created on delivery, mutated only by the state machine, dropped after
/// `process` returns (spec §3.3).
pub struct MessageState {
    pub delivery: Arc<dyn Delivery>,
    pub envelope: Option<Envelope>,
    pub decode_error: Option<EnvelopeError>,
    pub policy: HandlerPolicy,
}

impl MessageState {
    /// Decode best-effort: a malformed envelope still produces a
    /// `MessageState`, with the failure captured in `decode_error` instead
    /// of propagated (spec §4.1).
    pub fn from_delivery(delivery: Arc<dyn Delivery>, policy: HandlerPolicy) -> Self {
        match envelope::decode(delivery.properties()) {
            Ok(envelope) => Self {
                delivery,
                envelope: Some(envelope),
                decode_error: None,
                policy,
            },
            Err(err) => Self {
                delivery,
                envelope: None,
                decode_error: Some(err),
                policy,
            },
        }
    }

    pub fn msg_id(&self) -> Option<&str> {
        self.envelope.as_ref().map(|e| e.message_id.as_str())
    }

    pub fn redundant(&self) -> bool {
        self.envelope.as_ref().map(|e| e.redundant()).unwrap_or(false)
    }

    pub fn is_simple(&self) -> bool {
        !self.redundant() && self.policy.is_simple()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDelivery;

    #[test]
    fn decode_failure_is_captured_not_propagated() {
        let delivery = Arc::new(FakeDelivery::malformed());
        let state = MessageState::from_delivery(delivery, HandlerPolicy::default());
        assert!(state.envelope.is_none());
        assert!(state.decode_error.is_some());
    }

    #[test]
    fn simple_requires_non_redundant_and_single_attempt() {
        let delivery = Arc::new(FakeDelivery::fresh("m1", false, 100));
        let state = MessageState::from_delivery(delivery, HandlerPolicy::new(600, 10, 1, 0));
        assert!(state.is_simple());

        let delivery = Arc::new(FakeDelivery::fresh("m2", true, 100));
        let state = MessageState::from_delivery(delivery, HandlerPolicy::new(600, 10, 1, 0));
        assert!(!state.is_simple());
    }
}
