//! The deduplication store contract (spec §4.2, §6.2).
//!
//! The concrete Redis-backed client lives in the `rq-dedup` crate; this
//! trait is the abstract boundary the state machine is written against, the
//! same way `Delivery` abstracts the broker. A store instance is bound to
//! one queue (mirroring the AMQP consumer's own per-queue identity) so every
//! operation signature matches the one-msg-id-at-a-time shape of spec §4.2.

use async_trait::async_trait;
use thiserror::Error;

/// Sub-keys addressable under one logical message id (spec §3.2).
pub const SUB_STATUS: &str = "status";
pub const SUB_EXPIRES: &str = "expires";
pub const SUB_TIMEOUT: &str = "timeout";
pub const SUB_ATTEMPTS: &str = "attempts";
pub const SUB_EXCEPTIONS: &str = "exceptions";
pub const SUB_MUTEX: &str = "mutex";
pub const SUB_DELAY: &str = "delay";
pub const SUB_ACK_COUNT: &str = "ack_count";

pub const STATUS_INCOMPLETE: &str = "incomplete";
pub const STATUS_COMPLETED: &str = "completed";

/// Build the externally-visible compound key `msgid:<queue>:<uuid>:<sub>`
/// (spec §6.2). Exposed so a standalone GC tool can reconstruct it without
/// depending on a concrete store implementation.
pub fn compound_key(queue: &str, msg_id: &str, sub: &str) -> String {
    format!("msgid:{queue}:{msg_id}:{sub}")
}

/// Split a compound key back into `(queue, msg_id, sub)`, the inverse of
/// [`compound_key`] (spec §4.2 `msg_id_from_key`).
pub fn split_compound_key(key: &str) -> Option<(&str, &str, &str)> {
    let rest = key.strip_prefix("msgid:")?;
    let mut parts = rest.splitn(3, ':');
    let queue = parts.next()?;
    let msg_id = parts.next()?;
    let sub = parts.next()?;
    Some((queue, msg_id, sub))
}

#[derive(Debug, Error)]
pub enum DedupStoreError {
    #[error("deduplication store error: {0}")]
    Backend(String),
}

pub type DedupResult<T> = std::result::Result<T, DedupStoreError>;

/// Atomic (per msg-id) key-value operations the processing state machine
/// needs (spec §4.2). Cross-msg-id ordering is irrelevant (spec §5).
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// The queue this store instance is scoped to; part of the externally
    /// visible key naming (spec §6.2).
    fn queue(&self) -> &str;

    async fn get(&self, msg_id: &str, sub: &str) -> DedupResult<Option<String>>;

    async fn set(&self, msg_id: &str, sub: &str, value: &str) -> DedupResult<()>;

    /// Set if absent; returns `true` iff this call created the key.
    async fn setnx(&self, msg_id: &str, sub: &str, value: &str) -> DedupResult<bool>;

    /// Set every sub-key in `fields` iff *none* of them already exist.
    /// Returns `true` on success, `false` if any existed (so nothing was
    /// written).
    async fn msetnx(&self, msg_id: &str, fields: &[(&str, &str)]) -> DedupResult<bool>;

    /// Atomically increment an integer counter, returning the new value.
    async fn incr(&self, msg_id: &str, sub: &str) -> DedupResult<i64>;

    async fn del(&self, msg_id: &str, sub: &str) -> DedupResult<()>;

    /// Delete every sub-key for this msg-id.
    async fn del_keys(&self, msg_id: &str) -> DedupResult<()>;

    async fn exists(&self, msg_id: &str, sub: &str) -> DedupResult<bool>;

    /// Enumerate present sub-keys for this msg-id (for GC).
    async fn keys(&self, msg_id: &str) -> DedupResult<Vec<String>>;

    /// Scan `expires` sub-keys and delete every sub-key of any msg-id whose
    /// `expires` value is `<= older_than_epoch`. Returns the number of
    /// msg-ids collected, or `None` if this round was probabilistically
    /// skipped to bound cost (spec §4.2).
    async fn garbage_collect(&self, older_than_epoch: i64) -> DedupResult<Option<u64>>;
}
