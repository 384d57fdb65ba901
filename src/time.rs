//! Clock access for command construction.
//!
//! The pool reads the clock only when it builds a command; the resulting
//! `*_ms` values travel in the log so every replica applies the same instant.
//! Handlers in [`crate::fsm`] never call into this module.
//!
//! # Tiger Style
//!
//! - No `.expect()` or `.unwrap()` - safe fallback to 0
//! - Injectable via [`TimeProvider`] so tests control reuse deadlines

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// Current Unix timestamp in milliseconds, or 0 if the clock is before the epoch.
#[inline]
pub fn current_time_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(duration_ms).unwrap_or(0)
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
#[inline]
pub fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Reuse deadline for a checkout at `now_ms`: `now_ms - reuse_after`, floored at 0.
#[inline]
pub fn reuse_deadline_ms(now_ms: u64, reuse_after: Duration) -> u64 {
    now_ms.saturating_sub(duration_ms(reuse_after))
}

/// Injectable wall clock.
pub trait TimeProvider: Send + Sync {
    /// Current Unix timestamp in milliseconds.
    fn now_unix_ms(&self) -> u64;
}

/// System clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    #[inline]
    fn now_unix_ms(&self) -> u64 {
        current_time_ms()
    }
}

/// Manually driven clock for tests.
///
/// ```ignore
/// let time = SimulatedTimeProvider::new(1_000_000);
/// time.advance(Duration::from_secs(49 * 3600));
/// ```
#[derive(Debug, Clone)]
pub struct SimulatedTimeProvider {
    current_time_ms: Arc<AtomicU64>,
}

impl SimulatedTimeProvider {
    pub fn new(initial_time_ms: u64) -> Self {
        Self {
            current_time_ms: Arc::new(AtomicU64::new(initial_time_ms)),
        }
    }

    pub fn advance_ms(&self, delta_ms: u64) {
        self.current_time_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta: Duration) {
        self.advance_ms(duration_ms(delta));
    }

    pub fn set_ms(&self, time_ms: u64) {
        self.current_time_ms.store(time_ms, Ordering::SeqCst);
    }
}

impl Default for SimulatedTimeProvider {
    fn default() -> Self {
        Self::new(current_time_ms())
    }
}

impl TimeProvider for SimulatedTimeProvider {
    #[inline]
    fn now_unix_ms(&self) -> u64 {
        self.current_time_ms.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reuse_deadline_saturates() {
        assert_eq!(reuse_deadline_ms(1_000, Duration::from_secs(10)), 0);
        assert_eq!(reuse_deadline_ms(20_000, Duration::from_secs(10)), 10_000);
    }

    #[test]
    fn test_huge_reuse_window_never_expires() {
        // u64::MAX / 1000 + 1 seconds overflows u64 milliseconds.
        let reuse_after = Duration::from_secs(u64::MAX / 1000 + 1);
        assert_eq!(duration_ms(reuse_after), u64::MAX);
        assert_eq!(reuse_deadline_ms(1_700_000_000_000, reuse_after), 0);
        assert_eq!(reuse_deadline_ms(1_700_000_000_000, Duration::MAX), 0);
    }

    #[test]
    fn test_simulated_clock_is_shared_between_clones() {
        let time = SimulatedTimeProvider::new(100);
        let clone = time.clone();
        time.advance_ms(50);
        clone.advance(Duration::from_millis(25));
        assert_eq!(time.now_unix_ms(), 175);
        time.set_ms(5);
        assert_eq!(clone.now_unix_ms(), 5);
    }

    #[test]
    fn test_system_clock_is_after_2020() {
        assert!(SystemTimeProvider.now_unix_ms() > 1_577_836_800_000);
    }
}
