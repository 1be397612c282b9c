use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::Utc;
use station_core::SchedulerConfig;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::{
    context::CancelHandle,
    error::{Result, SchedulerError},
    queue::TaskQueue,
    task::{Reservation, Resource, Task, TaskId, Window},
    worker,
};

/// Non-error outcomes of [`Scheduler::schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheduled {
    /// Queued as a new task.
    Accepted,
    /// Replaced the queued task with the same ID.
    Updated,
    /// An identical task (same ID and window) is already running. No change.
    AlreadyRunning,
    /// An identical task is already queued. No change.
    AlreadyExists,
}

/// Where a cancelled task was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cancelled {
    /// Removed before it started; it will never run.
    Queued,
    /// Signalled to stop. Its worker exits on its own once the task returns.
    Running,
}

/// Bookkeeping for a task handed to a worker. The task itself moved into
/// the worker; only what conflict checks and cancellation need stays here.
struct RunningTask {
    id: TaskId,
    window: Window,
    resources: BTreeSet<Resource>,
    cancel: CancelHandle,
    run: u64,
}

impl Reservation for RunningTask {
    fn window(&self) -> Window {
        self.window
    }

    fn resources(&self) -> &BTreeSet<Resource> {
        &self.resources
    }
}

struct State {
    queue: TaskQueue,
    running: Vec<RunningTask>,
    free_slots: usize,
    next_run: u64,
    shut_down: bool,
}

pub(crate) struct Shared {
    state: Mutex<State>,
    tracker: TaskTracker,
    stop: CancellationToken,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        // Nothing panics while the lock is held; recover rather than cascade.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Worker cleanup: drop the running entry (if cancel has not already
    /// dropped it) and give the slot back.
    pub(crate) fn release(&self, id: &TaskId, run: u64) {
        let mut state = self.lock();
        if let Some(pos) = state.running.iter().position(|r| r.run == run) {
            state.running.remove(pos);
        }
        state.free_slots += 1;
        debug!(task_id = %id, free_slots = state.free_slots, "worker slot released");
    }
}

/// Time-windowed task scheduler with exclusive-resource conflict checks and
/// a bounded worker pool.
///
/// Cheap to clone; every clone drives the same state. Must be created inside
/// a Tokio runtime because [`Scheduler::start`] spawns the dispatch loop.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    /// Build a scheduler and spawn its dispatch loop.
    pub fn start(config: &SchedulerConfig) -> Self {
        let workers = config.workers.max(1);
        let tick = Duration::from_millis(config.tick_ms.max(1));

        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                queue: TaskQueue::new(),
                running: Vec::new(),
                free_slots: workers,
                next_run: 0,
                shut_down: false,
            }),
            tracker: TaskTracker::new(),
            stop: CancellationToken::new(),
        });

        shared.tracker.spawn(dispatch_loop(
            Arc::downgrade(&shared),
            shared.stop.clone(),
            tick,
        ));
        info!(workers, tick_ms = tick.as_millis() as u64, "scheduler started");

        Self { shared }
    }

    /// Submit a new task or update a queued one.
    ///
    /// Checks, in order: running tasks (same ID, then resource conflicts),
    /// then queued tasks (same ID means update, then resource conflicts).
    /// A failed update drops the previously queued entry; see
    /// [`SchedulerError::ResourceConflict`].
    pub fn schedule(&self, task: Task) -> Result<Scheduled> {
        let mut state = self.shared.lock();
        if state.shut_down {
            return Err(SchedulerError::ShutDown);
        }

        if let Some(running) = state.running.iter().find(|r| r.id == task.id) {
            if running.window == task.window {
                debug!(task_id = %task.id, "identical task already running");
                return Ok(Scheduled::AlreadyRunning);
            }
            warn!(task_id = %task.id, "rejecting change to a running task");
            return Err(SchedulerError::RunningConflict { id: task.id });
        }

        if let Some(running) = state.running.iter().find(|r| task.conflicts_with(*r)) {
            warn!(task_id = %task.id, conflicting = %running.id, "resource conflict with running task");
            return Err(SchedulerError::ResourceConflict {
                conflicting: running.id.clone(),
                id: task.id,
                stale_dropped: false,
            });
        }

        if let Some(index) = state.queue.position(&task.id) {
            let identical = state
                .queue
                .get(index)
                .is_some_and(|queued| queued.same_schedule(&task));
            if identical {
                debug!(task_id = %task.id, "identical task already queued");
                return Ok(Scheduled::AlreadyExists);
            }

            let conflicting = state
                .queue
                .iter()
                .find(|q| q.id != task.id && task.conflicts_with(*q))
                .map(|q| q.id.clone());
            if let Some(conflicting) = conflicting {
                // The old entry is stale now; the next poll resubmits if needed.
                if let Ok(stale) = state.queue.remove_at(index) {
                    stale.cancel.cancel();
                }
                warn!(task_id = %task.id, %conflicting, "update conflicts; queued entry dropped");
                return Err(SchedulerError::ResourceConflict {
                    id: task.id,
                    conflicting,
                    stale_dropped: true,
                });
            }

            let id = task.id.clone();
            let start = task.window.start;
            if let Ok(old) = state.queue.replace_at(index, task) {
                old.cancel.cancel();
            }
            info!(task_id = %id, %start, "queued task updated");
            return Ok(Scheduled::Updated);
        }

        if let Some(queued) = state.queue.iter().find(|q| task.conflicts_with(*q)) {
            warn!(task_id = %task.id, conflicting = %queued.id, "resource conflict with queued task");
            return Err(SchedulerError::ResourceConflict {
                conflicting: queued.id.clone(),
                id: task.id,
                stale_dropped: false,
            });
        }

        info!(task_id = %task.id, start = %task.window.start, end = %task.window.end, "task accepted");
        state.queue.insert(task);
        Ok(Scheduled::Accepted)
    }

    /// Cancel a queued or running task by ID.
    ///
    /// A running task is only signalled; it keeps its worker slot until its
    /// function returns.
    pub fn cancel(&self, id: &TaskId) -> Result<Cancelled> {
        let mut state = self.shared.lock();

        if let Some(index) = state.queue.position(id) {
            if let Ok(task) = state.queue.remove_at(index) {
                task.cancel.cancel();
                info!(task_id = %id, "queued task cancelled");
                return Ok(Cancelled::Queued);
            }
        }

        if let Some(pos) = state.running.iter().position(|r| &r.id == id) {
            let running = state.running.remove(pos);
            running.cancel.cancel();
            info!(task_id = %id, "running task cancelled");
            return Ok(Cancelled::Running);
        }

        Err(SchedulerError::NotFound { id: id.clone() })
    }

    /// Whether any task is currently executing.
    pub fn has_running_job(&self) -> bool {
        !self.shared.lock().running.is_empty()
    }

    pub fn queued_len(&self) -> usize {
        self.shared.lock().queue.len()
    }

    pub fn running_len(&self) -> usize {
        self.shared.lock().running.len()
    }

    /// Snapshot of queued IDs in heap order.
    pub fn queued_ids(&self) -> Vec<TaskId> {
        self.shared.lock().queue.iter().map(|t| t.id.clone()).collect()
    }

    pub fn running_ids(&self) -> Vec<TaskId> {
        self.shared.lock().running.iter().map(|r| r.id.clone()).collect()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.lock().shut_down
    }

    /// Stop accepting work, cancel running tasks, discard queued ones and
    /// wait until the dispatch loop and every worker have exited.
    ///
    /// Safe to call more than once; later calls just wait.
    pub async fn shutdown(&self) {
        let dropped = {
            let mut state = self.shared.lock();
            if state.shut_down {
                None
            } else {
                state.shut_down = true;
                let running = state.running.len();
                for r in state.running.drain(..) {
                    r.cancel.cancel();
                }
                Some((running, state.queue.drain()))
            }
        };

        if let Some((running, queued)) = dropped {
            for task in &queued {
                task.cancel.cancel();
            }
            info!(running, queued = queued.len(), "scheduler shutting down");
        }

        self.shared.stop.cancel();
        self.shared.tracker.close();
        self.shared.tracker.wait().await;
        debug!("scheduler drained");
    }
}

/// Promote due tasks to workers once per tick until shutdown.
///
/// Holds only a weak reference so dropping every `Scheduler` handle ends the
/// loop even without an explicit shutdown.
async fn dispatch_loop(shared: Weak<Shared>, stop: CancellationToken, tick: Duration) {
    debug!("dispatch loop started");
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let Some(shared) = shared.upgrade() else { break };
                dispatch_due(&shared);
            }
            _ = stop.cancelled() => break,
        }
    }
    debug!("dispatch loop stopped");
}

fn dispatch_due(shared: &Arc<Shared>) {
    loop {
        let (task, run) = {
            let mut state = shared.lock();
            if state.shut_down || state.free_slots == 0 {
                return;
            }
            let now = Utc::now();
            if !state.queue.peek_min().is_some_and(|head| head.window.start <= now) {
                return;
            }
            let Some(task) = state.queue.pop_min() else {
                return;
            };
            let run = state.next_run;
            state.next_run += 1;
            state.free_slots -= 1;
            state.running.push(RunningTask {
                id: task.id.clone(),
                window: task.window,
                resources: task.resources.clone(),
                cancel: task.cancel.clone(),
                run,
            });
            (task, run)
        };

        // Lock released: spawning must not block submissions.
        debug!(task_id = %task.id, run, "dispatching task");
        shared
            .tracker
            .spawn(worker::execute(Arc::clone(shared), task, run));
    }
}
