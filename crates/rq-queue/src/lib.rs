//! AMQP broker binding (spec §6.1).
//!
//! Provides the `Delivery` implementation the processing core consumes
//! (`AmqpDelivery`) and the consumer/publisher pair that drive it
//! (`AmqpConsumer`, `AmqpPublisher`). No other broker binding exists in this
//! workspace — the queue abstraction the processing core depends on lives in
//! `rq_consumer::delivery`, not here.

pub mod amqp;
pub mod error;

pub use error::QueueError;

pub type Result<T> = std::result::Result<T, QueueError>;
