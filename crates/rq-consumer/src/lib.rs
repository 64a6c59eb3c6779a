//! Exactly-once-per-logical-message processing core for a redundant,
//! at-least-once AMQP consumer.
//!
//! This crate has no broker or store dependency of its own — `Delivery` and
//! `DedupStore` are abstract contracts, implemented concretely by `rq-queue`
//! (lapin/AMQP) and `rq-dedup` (Redis) respectively. That split is what lets
//! [`state_machine::process`] be driven entirely by in-memory fakes in this
//! crate's own test suite.

pub mod dedup;
pub mod delivery;
pub mod envelope;
pub mod handler;
pub mod message;
pub mod policy;
pub mod result;
pub mod state_machine;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use dedup::{DedupStore, DedupStoreError};
pub use delivery::{Delivery, DeliveryProperties};
pub use envelope::{Envelope, EnvelopeError};
pub use handler::{Handler, HandlerAdapter, HandlerError, HandlerOutcome};
pub use message::MessageState;
pub use policy::HandlerPolicy;
pub use result::ResultCode;
pub use state_machine::{process, ProcessingContext};
