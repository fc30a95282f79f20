use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Duration;

use crate::clock::Clock;
use crate::error::{SyncError, SyncResult};

pub const RATE_LIMIT_BACKOFF: Duration = Duration::minutes(10);

/// Client-side pause after the backend answers 429. Shared by every call in
/// the backend family.
pub struct RateLimitBackoff {
    clock: Arc<dyn Clock>,
    duration: Duration,
    until_ms: AtomicI64,
}

impl RateLimitBackoff {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            duration: RATE_LIMIT_BACKOFF,
            until_ms: AtomicI64::new(0),
        }
    }

    pub fn record_429(&self) {
        let until = self.clock.now_ms() + self.duration.num_milliseconds();
        self.until_ms.store(until, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.clock.now_ms() < self.until_ms.load(Ordering::SeqCst)
    }

    pub fn remaining_ms(&self) -> i64 {
        (self.until_ms.load(Ordering::SeqCst) - self.clock.now_ms()).max(0)
    }

    /// Fails fast while the backoff window is open.
    pub fn ensure_clear(&self) -> SyncResult<()> {
        if self.is_active() {
            return Err(SyncError::RateLimited {
                retry_in_ms: self.remaining_ms(),
            });
        }
        Ok(())
    }
}
