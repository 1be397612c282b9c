use thiserror::Error;

use crate::task::TaskId;

/// Structural rejections returned by `Scheduler::schedule` and `Scheduler::cancel`.
///
/// Errors raised by a task's own function never appear here; they are handed
/// to the task's post-run hook.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// A task with this ID is running under a different window. Running
    /// tasks cannot be rescheduled; the running task is left untouched.
    #[error("Task {id} is running; its schedule cannot change")]
    RunningConflict { id: TaskId },

    /// The task's window overlaps an accepted task that holds one of the
    /// same exclusive resources.
    ///
    /// `stale_dropped` is set when the submission was an update of a queued
    /// task: the previously queued entry has been removed and will not run.
    #[error("Task {id} conflicts with {conflicting} over an exclusive resource{}", dropped_suffix(.stale_dropped))]
    ResourceConflict {
        id: TaskId,
        conflicting: TaskId,
        stale_dropped: bool,
    },

    /// No queued or running task has this ID.
    #[error("Task not found: {id}")]
    NotFound { id: TaskId },

    /// `shutdown` has been called; no further tasks are accepted.
    #[error("Scheduler is shut down")]
    ShutDown,
}

fn dropped_suffix(dropped: &bool) -> &'static str {
    if *dropped {
        " (previously queued entry dropped)"
    } else {
        ""
    }
}

/// Index-based queue operations on a position the queue does not hold.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("Queue index {index} out of bounds (len {len})")]
    OutOfBounds { index: usize, len: usize },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
