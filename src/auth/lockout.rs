//! Progressive account lockout.
//!
//! The policy is a pure function over an account's `(failed_attempts,
//! lock_time)` pair. Stores call it while holding the row, which keeps the
//! read-modify-write of the counters atomic.

use chrono::{DateTime, Duration, Utc};

/// Lockout counters as persisted on an account row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LockoutState {
    pub failed_attempts: i32,
    /// Instant the lock was applied. The lock window is measured from here.
    pub lock_time: Option<DateTime<Utc>>,
}

/// Result of recording a failed password check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureOutcome {
    pub state: LockoutState,
    /// The account is locked after this failure (newly or already).
    pub locked: bool,
}

/// Result of recording a successful password check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuccessOutcome {
    /// Counters were already clean, nothing to persist.
    Unchanged,
    /// Counters were reset and must be persisted.
    Reset(LockoutState),
    /// A concurrent failure locked the account before this success landed.
    Locked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    max_failed_attempts: u32,
    lock_duration: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self::new(5, Duration::minutes(15))
    }
}

impl LockoutPolicy {
    pub fn new(max_failed_attempts: u32, lock_duration: Duration) -> Self {
        Self {
            max_failed_attempts: max_failed_attempts.max(1),
            lock_duration,
        }
    }

    pub fn max_failed_attempts(&self) -> u32 {
        self.max_failed_attempts
    }

    pub fn lock_duration(&self) -> Duration {
        self.lock_duration
    }

    /// When the current lock (if any) stops rejecting attempts.
    pub fn unlocks_at(&self, state: &LockoutState) -> Option<DateTime<Utc>> {
        state.lock_time.map(|locked_at| locked_at + self.lock_duration)
    }

    /// Gate applied before any password verification.
    pub fn is_locked(&self, state: &LockoutState, now: DateTime<Utc>) -> bool {
        self.unlocks_at(state).map_or(false, |until| now < until)
    }

    pub fn on_failure(&self, state: &LockoutState, now: DateTime<Utc>) -> FailureOutcome {
        let failed_attempts = state.failed_attempts.saturating_add(1);

        // An active lock keeps its original timestamp
        if self.is_locked(state, now) {
            return FailureOutcome {
                state: LockoutState {
                    failed_attempts,
                    lock_time: state.lock_time,
                },
                locked: true,
            };
        }

        if failed_attempts as i64 >= self.max_failed_attempts as i64 {
            FailureOutcome {
                state: LockoutState {
                    failed_attempts,
                    lock_time: Some(now),
                },
                locked: true,
            }
        } else {
            FailureOutcome {
                state: LockoutState {
                    failed_attempts,
                    lock_time: state.lock_time,
                },
                locked: false,
            }
        }
    }

    pub fn on_success(&self, state: &LockoutState, now: DateTime<Utc>) -> SuccessOutcome {
        if self.is_locked(state, now) {
            return SuccessOutcome::Locked;
        }
        if state.failed_attempts == 0 && state.lock_time.is_none() {
            SuccessOutcome::Unchanged
        } else {
            SuccessOutcome::Reset(LockoutState::default())
        }
    }
}
