//! `station-scheduler` — run-once task scheduler with exclusive resources.
//!
//! # Overview
//!
//! Tasks carry a `[start, end]` window, a set of exclusive [`Resource`]s and
//! an async function. [`Scheduler::schedule`] accepts a task only if no
//! accepted (queued or running) task with an overlapping window holds one of
//! the same resources. A dispatch loop ticks every `tick_ms`, promoting due
//! tasks into a bounded pool of workers. Each run gets a [`TaskContext`] that
//! is cancelled by [`Scheduler::cancel`], by shutdown, or when `end` passes.
//!
//! # Outcomes
//!
//! | Submission                              | Result                           |
//! |-----------------------------------------|----------------------------------|
//! | New ID, no conflict                     | `Ok(Accepted)`                   |
//! | Queued ID, new window, no conflict      | `Ok(Updated)`                    |
//! | Same ID and window as a queued task     | `Ok(AlreadyExists)`              |
//! | Same ID and window as a running task    | `Ok(AlreadyRunning)`             |
//! | Running ID, different window            | `Err(RunningConflict)`           |
//! | Overlap on a shared resource            | `Err(ResourceConflict)`          |

pub mod context;
pub mod engine;
pub mod error;
pub mod queue;
pub mod task;
mod worker;

pub use context::{CancelHandle, StopReason, TaskContext};
pub use engine::{Cancelled, Scheduled, Scheduler};
pub use error::{QueueError, Result, SchedulerError};
pub use queue::TaskQueue;
pub use task::{Reservation, Resource, Task, TaskId, Window};
