//! Redis-backed deduplication store
//!
//! Implements `rq_consumer::dedup::DedupStore` over Redis, using the
//! connection-manager + atomic-command patterns the workspace's Redis
//! binding has always used for per-key coordination.
//!
//! # Example
//!
//! ```no_run
//! use rq_dedup::RedisDedupStore;
//!
//! async fn example() {
//!     let store = RedisDedupStore::connect("redis://localhost:6379", "orders", 0.01)
//!         .await
//!         .unwrap();
//!     let _ = store;
//! }
//! ```

mod error;
mod store;

pub use error::{RedisDedupError, Result};
pub use store::RedisDedupStore;
