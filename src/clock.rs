//! Time as an injected capability.
//!
//! Namespaces stamp `createdAt`/`updatedAt` and history records through a
//! `Clock` handle rather than reading the system time directly, so tests
//! can freeze time and assert exact metadata.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Millisecond-epoch time source.
pub trait Clock: Send + Sync {
    /// Current time as milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64;
}

/// The real wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// A frozen clock for tests. Time only moves when told to.
#[derive(Debug, Default)]
pub struct FixedClock {
    ms: AtomicI64,
}

impl FixedClock {
    pub fn new(ms: i64) -> Self {
        Self { ms: AtomicI64::new(ms) }
    }

    pub fn set(&self, ms: i64) {
        self.ms.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_ms(&self) -> i64 {
        self.ms.load(Ordering::SeqCst)
    }
}

/// Default clock handle used by namespace constructors.
pub fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}
