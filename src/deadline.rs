//! Per-command soft deadlines.
//!
//! Long-running reads check the deadline every few hundred iterations. When
//! the clock crosses it, the command unwinds with a distinguished panic
//! payload which the command boundary catches and converts into a timeout
//! error, so partially-iterated queries release their locks cleanly without
//! committing anything.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Panic payload used to abort a command that exceeded its deadline.
/// `Server::execute` downcasts for this type when catching unwinds.
pub struct DeadlineHit;

pub struct Deadline {
    at: Option<Instant>,
    hit: AtomicBool,
}

impl Deadline {
    /// A deadline that never fires.
    pub fn none() -> Self {
        Self {
            at: None,
            hit: AtomicBool::new(false),
        }
    }

    pub fn after(dur: Duration) -> Self {
        Self {
            at: Some(Instant::now() + dur),
            hit: AtomicBool::new(false),
        }
    }

    /// Fast path: returns immediately when no deadline is set. Panics with
    /// [`DeadlineHit`] the first time the clock is observed past the mark.
    #[inline]
    pub fn check(&self) {
        if let Some(at) = self.at
            && !self.hit.load(Ordering::Relaxed)
            && Instant::now() >= at
        {
            self.hit.store(true, Ordering::Relaxed);
            std::panic::panic_any(DeadlineHit);
        }
    }

    pub fn hit(&self) -> bool {
        self.hit.load(Ordering::Relaxed)
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_deadline_never_fires() {
        let d = Deadline::none();
        for _ in 0..10_000 {
            d.check();
        }
        assert!(!d.hit());
    }

    #[test]
    fn expired_deadline_unwinds_with_payload() {
        let d = Deadline::after(Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| d.check()));
        let payload = result.expect_err("deadline should have fired");
        assert!(payload.downcast_ref::<DeadlineHit>().is_some());
        assert!(d.hit());
    }

    #[test]
    fn future_deadline_does_not_fire() {
        let d = Deadline::after(Duration::from_secs(60));
        d.check();
        assert!(!d.hit());
    }
}
