//! Cancellation plumbing handed to every running task.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::task::TaskId;

const LIVE: u8 = 0;
const CANCELLED: u8 = 1;
const EXPIRED: u8 = 2;

/// Why a task's context was stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `Scheduler::cancel` or shutdown.
    Cancelled,
    /// The task's end time passed while it was still running.
    DeadlineExceeded,
}

/// Cancel-once guard around a [`CancellationToken`].
///
/// Clones share state: the first `cancel`/`expire` wins and records the
/// reason, every later call is a no-op that returns `false`.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
    state: Arc<AtomicU8>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            state: Arc::new(AtomicU8::new(LIVE)),
        }
    }

    /// Request cancellation. Returns `true` only for the call that fired it.
    pub fn cancel(&self) -> bool {
        self.fire(CANCELLED)
    }

    pub(crate) fn expire(&self) -> bool {
        self.fire(EXPIRED)
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) != LIVE
    }

    pub fn reason(&self) -> Option<StopReason> {
        match self.state.load(Ordering::Acquire) {
            CANCELLED => Some(StopReason::Cancelled),
            EXPIRED => Some(StopReason::DeadlineExceeded),
            _ => None,
        }
    }

    fn fire(&self, reason: u8) -> bool {
        // Reason is stored before the token fires so observers woken by the
        // token always see it.
        let won = self
            .state
            .compare_exchange(LIVE, reason, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            self.token.cancel();
        }
        won
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Execution context for one task run: its cancellation signal and deadline.
///
/// Task functions should race their work against [`TaskContext::cancelled`];
/// the scheduler never aborts a task that ignores it.
#[derive(Debug, Clone)]
pub struct TaskContext {
    task_id: TaskId,
    handle: CancelHandle,
    deadline: Option<DateTime<Utc>>,
}

impl TaskContext {
    pub fn new(task_id: TaskId, handle: CancelHandle, deadline: Option<DateTime<Utc>>) -> Self {
        Self {
            task_id,
            handle,
            deadline,
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// `None` when the task was launched with no time left in its window.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    /// Resolves once the task is cancelled or its deadline passes.
    pub async fn cancelled(&self) {
        self.handle.token.cancelled().await
    }

    pub fn is_cancelled(&self) -> bool {
        self.handle.is_cancelled()
    }

    pub fn reason(&self) -> Option<StopReason> {
        self.handle.reason()
    }

    /// A token tied to this context, for APIs that take one directly.
    pub fn token(&self) -> CancellationToken {
        self.handle.token.child_token()
    }
}
