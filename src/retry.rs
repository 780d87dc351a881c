//! Retry decision logic.
//!
//! [`RetryPolicy`] is pure: given a task's try counters it decides whether
//! the loop may process the task or must reject it, and whether a transient
//! network failure earns another transport attempt. The loop owns all the
//! resulting bookkeeping (re-enqueueing clones, fallback handlers,
//! rejection records).

use serde::Serialize;

use crate::task::Task;

/// Why a task was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RejectReason {
    /// `task_try_count` exceeded the task try limit.
    TaskTryCount,
    /// `network_try_count` exceeded the network try limit.
    NetworkTryCount,
}

impl RejectReason {
    /// Stable kebab-case label used in rejection records.
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::TaskTryCount => "task-try-count",
            RejectReason::NetworkTryCount => "network-try-count",
        }
    }
}

/// Verdict of a limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitVerdict {
    /// Within limits; proceed.
    Ok,
    /// Over a limit; reject with the given reason.
    Reject(RejectReason),
}

/// Try-limit configuration and decisions.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum times a task may be accepted for processing.
    pub task_try_limit: u32,
    /// Maximum times a task may be dispatched to the transport.
    pub network_try_limit: u32,
}

impl RetryPolicy {
    /// Checks both counters against their limits.
    ///
    /// The task-try check wins when both are exceeded, matching the order
    /// the counters are incremented in.
    pub fn check_limits(&self, task: &Task) -> LimitVerdict {
        if task.task_try_count > self.task_try_limit {
            LimitVerdict::Reject(RejectReason::TaskTryCount)
        } else if task.network_try_count > self.network_try_limit {
            LimitVerdict::Reject(RejectReason::NetworkTryCount)
        } else {
            LimitVerdict::Ok
        }
    }

    /// Whether a transient network failure on this task earns another
    /// transport attempt.
    ///
    /// Holds while fewer than `network_try_limit` attempts were made, so a
    /// permanently failing endpoint is dispatched exactly
    /// `network_try_limit` times.
    pub fn wants_network_retry(&self, task: &Task) -> bool {
        self.network_try_limit > 0 && task.network_try_count < self.network_try_limit
    }
}
