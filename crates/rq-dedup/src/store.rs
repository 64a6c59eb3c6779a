//! Redis-backed [`DedupStore`] (spec §4.2, §6.2).
//!
//! Every sub-key for one logical message id lives at its own Redis key,
//! named by [`rq_consumer::dedup::compound_key`]. `msetnx`'s all-or-nothing
//! semantics map directly onto Redis's own `MSETNX`, which already refuses
//! to write anything if *any* of the given keys exist — no Lua script
//! needed there. Garbage collection uses `SCAN` rather than `KEYS` so a
//! large keyspace doesn't block the server for the scan's duration, the
//! same incremental-cursor shape the standby module's lease renewal used
//! for its own Redis calls.

use async_trait::async_trait;
use rand::Rng;
use redis::aio::ConnectionManager;
use rq_consumer::dedup::{compound_key, split_compound_key, DedupResult, DedupStore, DedupStoreError, SUB_EXPIRES};
use tracing::debug;

use crate::error::{RedisDedupError, Result};

/// How many keys `garbage_collect` deletes per SCAN round before yielding;
/// bounds worst-case latency of one GC call.
const GC_SCAN_COUNT: usize = 200;

pub struct RedisDedupStore {
    queue: String,
    conn: ConnectionManager,
    /// Probability (0.0-1.0) that any given `garbage_collect` call actually
    /// runs the scan, rather than returning `None` immediately (spec §4.2:
    /// "a sampling threshold may skip the scan probabilistically to bound
    /// cost").
    gc_sample_rate: f64,
}

impl RedisDedupStore {
    pub async fn connect(redis_url: &str, queue: impl Into<String>, gc_sample_rate: f64) -> Result<Self> {
        let client = redis::Client::open(redis_url).map_err(|e| RedisDedupError::Connection(e.to_string()))?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            queue: queue.into(),
            conn,
            gc_sample_rate,
        })
    }

    fn key(&self, msg_id: &str, sub: &str) -> String {
        compound_key(&self.queue, msg_id, sub)
    }

    fn map_err(err: redis::RedisError) -> DedupStoreError {
        DedupStoreError::Backend(err.to_string())
    }
}

#[async_trait]
impl DedupStore for RedisDedupStore {
    fn queue(&self) -> &str {
        &self.queue
    }

    async fn get(&self, msg_id: &str, sub: &str) -> DedupResult<Option<String>> {
        let mut conn = self.conn.clone();
        redis::cmd("GET")
            .arg(self.key(msg_id, sub))
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)
    }

    async fn set(&self, msg_id: &str, sub: &str, value: &str) -> DedupResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(self.key(msg_id, sub))
            .arg(value)
            .query_async::<()>(&mut conn)
            .await
            .map_err(Self::map_err)
    }

    async fn setnx(&self, msg_id: &str, sub: &str, value: &str) -> DedupResult<bool> {
        let mut conn = self.conn.clone();
        let created: bool = redis::cmd("SET")
            .arg(self.key(msg_id, sub))
            .arg(value)
            .arg("NX")
            .query_async::<Option<String>>(&mut conn)
            .await
            .map_err(Self::map_err)?
            .is_some();
        Ok(created)
    }

    async fn msetnx(&self, msg_id: &str, fields: &[(&str, &str)]) -> DedupResult<bool> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("MSETNX");
        for (sub, value) in fields {
            cmd.arg(self.key(msg_id, sub)).arg(*value);
        }
        let created: i64 = cmd.query_async(&mut conn).await.map_err(Self::map_err)?;
        Ok(created == 1)
    }

    async fn incr(&self, msg_id: &str, sub: &str) -> DedupResult<i64> {
        let mut conn = self.conn.clone();
        redis::cmd("INCR")
            .arg(self.key(msg_id, sub))
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)
    }

    async fn del(&self, msg_id: &str, sub: &str) -> DedupResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(self.key(msg_id, sub))
            .query_async::<()>(&mut conn)
            .await
            .map_err(Self::map_err)
    }

    async fn del_keys(&self, msg_id: &str) -> DedupResult<()> {
        let subs = self.keys(msg_id).await?;
        if subs.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("DEL");
        for sub in &subs {
            cmd.arg(self.key(msg_id, sub));
        }
        cmd.query_async::<()>(&mut conn).await.map_err(Self::map_err)
    }

    async fn exists(&self, msg_id: &str, sub: &str) -> DedupResult<bool> {
        let mut conn = self.conn.clone();
        let count: i64 = redis::cmd("EXISTS")
            .arg(self.key(msg_id, sub))
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        Ok(count > 0)
    }

    async fn keys(&self, msg_id: &str) -> DedupResult<Vec<String>> {
        let pattern = compound_key(&self.queue, msg_id, "*");
        let keys = scan_keys(&self.conn, &pattern).await.map_err(Self::map_err)?;
        Ok(keys
            .iter()
            .filter_map(|k| split_compound_key(k).map(|(_, _, sub)| sub.to_string()))
            .collect())
    }

    async fn garbage_collect(&self, older_than_epoch: i64) -> DedupResult<Option<u64>> {
        if !rand::thread_rng().gen_bool(self.gc_sample_rate.clamp(0.0, 1.0)) {
            debug!("garbage collection round skipped by sampling");
            return Ok(None);
        }

        let pattern = compound_key(&self.queue, "*", SUB_EXPIRES);
        let expires_keys = scan_keys(&self.conn, &pattern).await.map_err(Self::map_err)?;

        let mut collected = 0u64;
        let mut conn = self.conn.clone();

        for key in expires_keys {
            let Some((_, msg_id, _)) = split_compound_key(&key) else {
                continue;
            };
            let value: Option<String> = redis::cmd("GET")
                .arg(&key)
                .query_async(&mut conn)
                .await
                .map_err(Self::map_err)?;
            let Some(expires) = value.and_then(|v| v.parse::<i64>().ok()) else {
                continue;
            };
            if expires <= older_than_epoch {
                self.del_keys(msg_id).await?;
                collected += 1;
            }
        }

        Ok(Some(collected))
    }
}

/// Incrementally scan for keys matching `pattern` via Redis `SCAN`, avoiding
/// `KEYS`'s whole-keyspace blocking behavior.
async fn scan_keys(conn: &ConnectionManager, pattern: &str) -> std::result::Result<Vec<String>, redis::RedisError> {
    let mut conn = conn.clone();
    let mut cursor: u64 = 0;
    let mut found = Vec::new();

    loop {
        let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(GC_SCAN_COUNT)
            .query_async(&mut conn)
            .await?;

        found.extend(batch);
        cursor = next_cursor;
        if cursor == 0 {
            break;
        }
    }

    Ok(found)
}
