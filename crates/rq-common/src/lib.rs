//! Shared primitives used across the redundant-queue consumer crates.
//!
//! The one piece of genuinely shared state is time: every timeout, delay, and
//! TTL comparison in the processing state machine reads the current instant,
//! and that read must be virtualizable so tests can pin it. Everything else
//! (logging, a small top-level error) lives here because it's ambient
//! infrastructure every crate in the workspace wants, not because it's
//! load-bearing for the algorithm.

pub mod logging;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Source of the current Unix epoch second.
///
/// The processing state machine never calls `SystemTime::now()` directly so
/// that tests can drive TTL/timeout/delay comparisons deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

/// Production clock backed by the wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Test clock that never advances on its own but can be stepped explicitly.
///
/// Cheap to clone and share: the counter lives behind an `Arc`, so every
/// handle observes the same instant.
#[derive(Debug, Clone)]
pub struct FixedClock {
    now: Arc<AtomicI64>,
}

impl FixedClock {
    pub fn new(now: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(now)),
        }
    }

    /// Advance the clock by `secs` seconds and return the new instant.
    pub fn advance(&self, secs: i64) -> i64 {
        self.now.fetch_add(secs, Ordering::SeqCst) + secs
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Top-level error for ambient (non-algorithmic) failures: config, connection
/// setup, and the like. The processing state machine itself never returns
/// this — see `rq_consumer::ResultCode::InternalError` for how it reports
/// failures without raising.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("connection error: {0}")]
    Connection(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_advances_monotonically() {
        let clock = FixedClock::new(100);
        assert_eq!(clock.now(), 100);
        assert_eq!(clock.advance(10), 110);
        assert_eq!(clock.now(), 110);
    }

    #[test]
    fn fixed_clock_can_be_set_directly() {
        let clock = FixedClock::new(0);
        clock.set(500);
        assert_eq!(clock.now(), 500);
    }

    #[test]
    fn clones_share_the_same_instant() {
        let clock = FixedClock::new(1);
        let clone = clock.clone();
        clock.advance(5);
        assert_eq!(clone.now(), 6);
    }
}
