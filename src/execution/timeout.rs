//! Request deadlines.
//!
//! Every request carries one [`Deadline`]: an overall budget plus a
//! cooperative cancellation flag. Derived budgets (planning ceiling,
//! per-shard cap, pipeline timeout) are all computed against the remaining
//! budget, so a deadline hit is observable at every suspension point.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Raised when a deadline check fails.
#[derive(Debug, Clone)]
pub struct DeadlineExceeded {
    /// The budget that was exceeded
    pub budget: Duration,
    /// How long the request actually ran
    pub elapsed: Duration,
}

impl std::fmt::Display for DeadlineExceeded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "request exceeded deadline of {:?} (ran for {:?})",
            self.budget, self.elapsed
        )
    }
}

impl std::error::Error for DeadlineExceeded {}

/// Cooperative request deadline, shared across every task working on one
/// request.
#[derive(Clone)]
pub struct Deadline {
    cancelled: Arc<AtomicBool>,
    start: Instant,
    budget: Option<Duration>,
}

impl Deadline {
    /// Deadline with the given overall budget (None = unbounded).
    pub fn new(budget: Option<Duration>) -> Self {
        Deadline {
            cancelled: Arc::new(AtomicBool::new(false)),
            start: Instant::now(),
            budget,
        }
    }

    /// Budget from a millisecond config value; 0 means unbounded.
    pub fn from_millis(ms: u64) -> Self {
        Deadline::new((ms > 0).then(|| Duration::from_millis(ms)))
    }

    /// Unbounded deadline.
    pub fn unbounded() -> Self {
        Deadline::new(None)
    }

    /// Check for cancellation or budget exhaustion. Call at every
    /// suspension point.
    pub fn check(&self) -> Result<(), DeadlineExceeded> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Err(DeadlineExceeded {
                budget: self.budget.unwrap_or(Duration::ZERO),
                elapsed: self.start.elapsed(),
            });
        }
        if let Some(budget) = self.budget {
            let elapsed = self.start.elapsed();
            if elapsed > budget {
                self.cancelled.store(true, Ordering::Relaxed);
                return Err(DeadlineExceeded { budget, elapsed });
            }
        }
        Ok(())
    }

    /// Cancel the request explicitly.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_exceeded(&self) -> bool {
        self.check().is_err()
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Overall budget in milliseconds, when bounded.
    pub fn budget_millis(&self) -> Option<u64> {
        self.budget.map(|b| b.as_millis() as u64)
    }

    /// Remaining overall budget (None = unbounded).
    pub fn remaining(&self) -> Option<Duration> {
        self.budget.map(|budget| {
            let elapsed = self.start.elapsed();
            if elapsed >= budget {
                Duration::ZERO
            } else {
                budget - elapsed
            }
        })
    }

    /// Budget for one derived stage: the smaller of `cap` and the remaining
    /// overall budget. None only when both are unbounded.
    pub fn derived_budget(&self, cap: Option<Duration>) -> Option<Duration> {
        match (self.remaining(), cap) {
            (Some(remaining), Some(cap)) => Some(remaining.min(cap)),
            (Some(remaining), None) => Some(remaining),
            (None, cap) => cap,
        }
    }

    /// Handle for cancelling from another task.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            cancelled: Arc::clone(&self.cancelled),
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Deadline::new(Some(Duration::from_secs(30)))
    }
}

/// Cancels the associated request from anywhere.
#[derive(Clone)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_unbounded_never_fails() {
        let deadline = Deadline::unbounded();
        assert!(deadline.check().is_ok());
        assert_eq!(deadline.remaining(), None);
    }

    #[test]
    fn test_zero_millis_is_unbounded() {
        let deadline = Deadline::from_millis(0);
        assert!(deadline.check().is_ok());
        assert_eq!(deadline.budget_millis(), None);
    }

    #[test]
    fn test_budget_not_exceeded() {
        let deadline = Deadline::new(Some(Duration::from_secs(10)));
        assert!(deadline.check().is_ok());
        assert!(!deadline.is_exceeded());
    }

    #[test]
    fn test_budget_exceeded() {
        let deadline = Deadline::new(Some(Duration::from_millis(10)));
        thread::sleep(Duration::from_millis(50));

        let err = deadline.check().expect_err("deadline must trip");
        assert!(err.elapsed >= Duration::from_millis(10));
    }

    #[test]
    fn test_explicit_cancellation() {
        let deadline = Deadline::new(Some(Duration::from_secs(10)));
        deadline.cancel();
        assert!(deadline.check().is_err());
    }

    #[test]
    fn test_cancel_handle_propagates() {
        let deadline = Deadline::new(Some(Duration::from_secs(10)));
        let handle = deadline.cancel_handle();
        handle.cancel();
        assert!(deadline.is_exceeded());
        assert!(handle.is_cancelled());
    }

    #[test]
    fn test_derived_budget_takes_minimum() {
        let deadline = Deadline::new(Some(Duration::from_secs(10)));

        let capped = deadline
            .derived_budget(Some(Duration::from_secs(2)))
            .expect("bounded");
        assert!(capped <= Duration::from_secs(2));

        let wide = deadline
            .derived_budget(Some(Duration::from_secs(60)))
            .expect("bounded");
        assert!(wide <= Duration::from_secs(10));
    }

    #[test]
    fn test_derived_budget_unbounded_uses_cap() {
        let deadline = Deadline::unbounded();
        assert_eq!(
            deadline.derived_budget(Some(Duration::from_secs(5))),
            Some(Duration::from_secs(5))
        );
        assert_eq!(deadline.derived_budget(None), None);
    }
}
