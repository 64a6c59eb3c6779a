//! In-process fakes used to pin the state machine's decision tree without a
//! network dependency (spec §10.5). Exported (not `#[cfg(test)]`-gated) so
//! other crates' integration tests and the `rq-dedup`/`rq-queue` bindings
//! can reuse the same fixtures.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::dedup::{DedupResult, DedupStore};
use crate::delivery::{Delivery, DeliveryProperties, HEADER_EXPIRES_AT, HEADER_FLAGS, HEADER_FORMAT_VERSION};
use crate::envelope::FORMAT_VERSION;
use crate::handler::{Handler, HandlerError};
use crate::result::ResultCode;

/// An in-memory `Delivery` for tests: records whether `ack`/`reject` were
/// called instead of talking to a broker.
pub struct FakeDelivery {
    properties: DeliveryProperties,
    payload: Vec<u8>,
    acked: AtomicBool,
    rejected: AtomicBool,
}

impl FakeDelivery {
    /// `expires_at` is an absolute epoch second, not a relative TTL — callers
    /// pair it with a `FixedClock` set to a `now` before that instant.
    pub fn fresh(msg_id: &str, redundant: bool, expires_at: i64) -> Self {
        Self::with_expiry(msg_id, redundant, expires_at)
    }

    pub fn with_expiry(msg_id: &str, redundant: bool, expires_at: i64) -> Self {
        let mut headers = HashMap::new();
        headers.insert(HEADER_FORMAT_VERSION.to_string(), FORMAT_VERSION.to_string());
        headers.insert(HEADER_FLAGS.to_string(), if redundant { "1" } else { "0" }.to_string());
        headers.insert(HEADER_EXPIRES_AT.to_string(), expires_at.to_string());

        Self {
            properties: DeliveryProperties {
                message_id: msg_id.to_string(),
                headers,
            },
            payload: Vec::new(),
            acked: AtomicBool::new(false),
            rejected: AtomicBool::new(false),
        }
    }

    pub fn malformed() -> Self {
        Self {
            properties: DeliveryProperties {
                message_id: "malformed".to_string(),
                headers: HashMap::new(),
            },
            payload: Vec::new(),
            acked: AtomicBool::new(false),
            rejected: AtomicBool::new(false),
        }
    }

    pub fn acked(&self) -> bool {
        self.acked.load(Ordering::SeqCst)
    }

    pub fn rejected(&self) -> bool {
        self.rejected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Delivery for FakeDelivery {
    fn properties(&self) -> &DeliveryProperties {
        &self.properties
    }

    fn payload(&self) -> &[u8] {
        &self.payload
    }

    async fn ack(&self) {
        self.acked.store(true, Ordering::SeqCst);
    }

    async fn reject(&self, _requeue: bool) {
        self.rejected.store(true, Ordering::SeqCst);
    }
}

/// In-memory `DedupStore`, keyed by `(msg_id, sub)`. Not suitable for
/// production (no persistence, no cross-process sharing) — it exists purely
/// to pin the state machine's behavior in unit tests.
#[derive(Default)]
pub struct InMemoryDedupStore {
    queue: String,
    fields: Mutex<HashMap<(String, String), String>>,
}

impl InMemoryDedupStore {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            fields: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl DedupStore for InMemoryDedupStore {
    fn queue(&self) -> &str {
        &self.queue
    }

    async fn get(&self, msg_id: &str, sub: &str) -> DedupResult<Option<String>> {
        Ok(self.fields.lock().unwrap().get(&(msg_id.to_string(), sub.to_string())).cloned())
    }

    async fn set(&self, msg_id: &str, sub: &str, value: &str) -> DedupResult<()> {
        self.fields
            .lock()
            .unwrap()
            .insert((msg_id.to_string(), sub.to_string()), value.to_string());
        Ok(())
    }

    async fn setnx(&self, msg_id: &str, sub: &str, value: &str) -> DedupResult<bool> {
        let mut fields = self.fields.lock().unwrap();
        let key = (msg_id.to_string(), sub.to_string());
        if fields.contains_key(&key) {
            Ok(false)
        } else {
            fields.insert(key, value.to_string());
            Ok(true)
        }
    }

    async fn msetnx(&self, msg_id: &str, entries: &[(&str, &str)]) -> DedupResult<bool> {
        let mut fields = self.fields.lock().unwrap();
        let any_exists = entries
            .iter()
            .any(|(sub, _)| fields.contains_key(&(msg_id.to_string(), sub.to_string())));
        if any_exists {
            return Ok(false);
        }
        for (sub, value) in entries {
            fields.insert((msg_id.to_string(), sub.to_string()), value.to_string());
        }
        Ok(true)
    }

    async fn incr(&self, msg_id: &str, sub: &str) -> DedupResult<i64> {
        let mut fields = self.fields.lock().unwrap();
        let key = (msg_id.to_string(), sub.to_string());
        let current = fields.get(&key).and_then(|v| v.parse::<i64>().ok()).unwrap_or(0);
        let next = current + 1;
        fields.insert(key, next.to_string());
        Ok(next)
    }

    async fn del(&self, msg_id: &str, sub: &str) -> DedupResult<()> {
        self.fields.lock().unwrap().remove(&(msg_id.to_string(), sub.to_string()));
        Ok(())
    }

    async fn del_keys(&self, msg_id: &str) -> DedupResult<()> {
        self.fields.lock().unwrap().retain(|(id, _), _| id != msg_id);
        Ok(())
    }

    async fn exists(&self, msg_id: &str, sub: &str) -> DedupResult<bool> {
        Ok(self.fields.lock().unwrap().contains_key(&(msg_id.to_string(), sub.to_string())))
    }

    async fn keys(&self, msg_id: &str) -> DedupResult<Vec<String>> {
        Ok(self
            .fields
            .lock()
            .unwrap()
            .keys()
            .filter(|(id, _)| id == msg_id)
            .map(|(_, sub)| sub.clone())
            .collect())
    }

    async fn garbage_collect(&self, older_than_epoch: i64) -> DedupResult<Option<u64>> {
        let mut fields = self.fields.lock().unwrap();
        let stale_ids: Vec<String> = fields
            .iter()
            .filter(|((_, sub), value)| {
                sub == crate::dedup::SUB_EXPIRES
                    && value.parse::<i64>().map(|v| v <= older_than_epoch).unwrap_or(false)
            })
            .map(|((id, _), _)| id.clone())
            .collect();
        let mut collected = 0u64;
        for id in stale_ids {
            let before = fields.len();
            fields.retain(|(mid, _), _| mid != &id);
            if fields.len() < before {
                collected += 1;
            }
        }
        Ok(Some(collected))
    }
}

/// A `Handler` whose behavior is scripted for tests: fails `fail_first_n`
/// times (recording each call), then succeeds.
pub struct ScriptedHandler {
    fail_first_n: u32,
    calls: AtomicU32,
    pub exceptions_seen: Mutex<Vec<String>>,
    pub failures_seen: Mutex<Vec<ResultCode>>,
}

impl ScriptedHandler {
    pub fn always_succeeds() -> Self {
        Self::fails_n_times(0)
    }

    pub fn fails_n_times(n: u32) -> Self {
        Self {
            fail_first_n: n,
            calls: AtomicU32::new(0),
            exceptions_seen: Mutex::new(Vec::new()),
            failures_seen: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Handler for ScriptedHandler {
    async fn call(&self, _payload: &[u8]) -> Result<(), HandlerError> {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_first_n {
            Err(HandlerError(format!("scripted failure #{attempt}")))
        } else {
            Ok(())
        }
    }

    async fn on_exception(&self, error: &HandlerError) {
        self.exceptions_seen.lock().unwrap().push(error.0.clone());
    }

    async fn on_failure(&self, code: ResultCode) {
        self.failures_seen.lock().unwrap().push(code);
    }
}
