//! The broker delivery contract the state machine consumes (spec §6.1).
//!
//! This crate never talks to a broker directly — `rq-queue`'s AMQP binding
//! is the thing that implements this trait over a real `lapin::message::Delivery`.
//! Keeping the trait here, rather than in `rq-queue`, is what lets the state
//! machine be tested with a trivial in-memory fake (see `testing`).

use async_trait::async_trait;
use std::collections::HashMap;

/// The header fields the envelope codec reads and writes. All values are
/// strings on the wire (broker header codec constraint, spec §4.1) and
/// coerced to integers on decode.
pub const HEADER_FORMAT_VERSION: &str = "format_version";
pub const HEADER_FLAGS: &str = "flags";
pub const HEADER_EXPIRES_AT: &str = "expires_at";

/// Broker-level message properties, abstracted away from any one broker's
/// SDK types.
#[derive(Debug, Clone, Default)]
pub struct DeliveryProperties {
    pub message_id: String,
    pub headers: HashMap<String, String>,
}

/// A single delivery of a message from the broker.
///
/// Owned exclusively by the processing task for the duration of one
/// `process` call (spec §3.3, §5).
#[async_trait]
pub trait Delivery: Send + Sync {
    fn properties(&self) -> &DeliveryProperties;

    fn payload(&self) -> &[u8];

    /// Mark this delivery consumed. Broker-blocking but fast (spec §5).
    async fn ack(&self);

    /// Reject the delivery. `requeue = true` is equivalent to simply not
    /// acking and letting the broker redeliver; the core only ever calls
    /// this with `requeue = true`, exposed as an explicit broker
    /// optimization where the underlying broker supports it (spec §6.1).
    async fn reject(&self, requeue: bool);
}
