//! Deadline - a timeout budget shared across several sequential steps
//!
//! A request to the kernel involves many reads (one per frame, one message
//! per output chunk). Giving each read its own timeout would let the total
//! wait grow without bound, so a single `Deadline` is captured when the
//! request starts and every read asks it for the time that is left.
//!
//! ```text
//! start ──────────────── read ── read ──── read ───────────► deadline
//!        remaining() = deadline - now, Err(Elapsed) once <= 0
//! ```

use std::time::{Duration, Instant};

/// Returned by [`Deadline::remaining`] once the budget is used up
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("deadline elapsed after {budget:?}")]
pub struct Elapsed {
    /// The total budget that was exceeded
    pub budget: Duration,
}

/// Point-in-time timeout budget
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Option<Duration>,
}

impl Deadline {
    /// Start a new budget. `None` means no limit.
    pub fn new(budget: Option<Duration>) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    /// A deadline that never expires
    pub fn unbounded() -> Self {
        Self::new(None)
    }

    /// Shorthand for `Deadline::new(Some(budget))`
    pub fn after(budget: Duration) -> Self {
        Self::new(Some(budget))
    }

    /// Time left before the deadline.
    ///
    /// Returns `Ok(None)` when there is no limit, `Ok(Some(left))` while
    /// budget remains and `Err(Elapsed)` once it is exhausted.
    pub fn remaining(&self) -> Result<Option<Duration>, Elapsed> {
        match self.budget {
            None => Ok(None),
            Some(budget) => {
                let spent = self.started.elapsed();
                match budget.checked_sub(spent) {
                    Some(left) if !left.is_zero() => Ok(Some(left)),
                    _ => Err(Elapsed { budget }),
                }
            }
        }
    }

    /// Like [`remaining`](Self::remaining) but clamps to zero instead of failing
    pub fn remaining_or_zero(&self) -> Option<Duration> {
        self.budget
            .map(|budget| budget.saturating_sub(self.started.elapsed()))
    }

    /// Whether the budget has been used up
    pub fn is_expired(&self) -> bool {
        self.remaining().is_err()
    }

    /// The configured total budget
    pub fn budget(&self) -> Option<Duration> {
        self.budget
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::unbounded()
    }
}
