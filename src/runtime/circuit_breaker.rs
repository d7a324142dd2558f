// =============================================================================
// Circuit breaker — consecutive-failure guard for the runtime loop
// =============================================================================
//
// INVARIANT: after `max_failures` consecutive unhandled cycle failures the
// breaker trips and the loop must halt. Any successful cycle resets the
// counter to zero.
// =============================================================================

use std::sync::atomic::{AtomicU32, Ordering};

/// Trips after `max_failures` consecutive failures without a success.
pub struct ConsecutiveFailureBreaker {
    max_failures: u32,
    count: AtomicU32,
}

impl ConsecutiveFailureBreaker {
    pub fn new(max_failures: u32) -> Self {
        Self {
            max_failures: max_failures.max(1),
            count: AtomicU32::new(0),
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    pub fn is_tripped(&self) -> bool {
        self.failure_count() >= self.max_failures
    }

    pub fn record_failure(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_success(&self) {
        self.count.store(0, Ordering::SeqCst);
    }
}
