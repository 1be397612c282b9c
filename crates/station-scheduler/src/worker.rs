//! Per-task execution: pre-check, deadline, invocation, post-hook, cleanup.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures_util::FutureExt;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::context::TaskContext;
use crate::engine::Shared;
use crate::task::{Task, TaskId};

/// Gives the worker slot back however the run ends, including unwinding
/// out of a hook.
struct SlotGuard {
    shared: Arc<Shared>,
    id: TaskId,
    run: u64,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.shared.release(&self.id, self.run);
    }
}

pub(crate) async fn execute(shared: Arc<Shared>, task: Task, run: u64) {
    let Task {
        id,
        window,
        arg,
        func,
        pre_run,
        post_run,
        cancel,
        ..
    } = task;
    let _slot = SlotGuard {
        shared,
        id: id.clone(),
        run,
    };

    // Pinned to `end` once, so time spent in the pre-run hook counts
    // against the window.
    let budget = (window.end - Utc::now()).to_std().ok().filter(|d| !d.is_zero());
    let expires_at = budget.map(|b| Instant::now() + b);
    let deadline = budget.map(|_| window.end);
    let ctx = TaskContext::new(id.clone(), cancel.clone(), deadline);

    if ctx.is_cancelled() {
        debug!(task_id = %id, "task cancelled before it started");
        return;
    }

    if let Some(pre_run) = &pre_run {
        let proceed = tokio::select! {
            proceed = pre_run() => proceed,
            _ = ctx.cancelled() => false,
            _ = sleep_until(expires_at) => {
                cancel.expire();
                false
            }
        };
        if !proceed {
            if ctx.is_cancelled() {
                debug!(task_id = %id, reason = ?ctx.reason(), "task stopped during pre-run check");
            } else {
                info!(task_id = %id, "pre-run check declined; skipping task");
            }
            return;
        }
    }

    // A cancel can land between the hook returning and this point.
    if ctx.is_cancelled() {
        debug!(task_id = %id, reason = ?ctx.reason(), "task cancelled before it started");
        return;
    }

    info!(task_id = %id, deadline = ?deadline, "task started");
    let started = Instant::now();
    let mut fut = AssertUnwindSafe(func(ctx, arg)).catch_unwind();

    let outcome = match expires_at {
        Some(at) => match tokio::time::timeout_at(at, &mut fut).await {
            Ok(outcome) => outcome,
            Err(_elapsed) => {
                if cancel.expire() {
                    warn!(task_id = %id, "deadline reached; cancelling task");
                }
                // Cooperative: the function decides when to return.
                fut.await
            }
        },
        None => fut.await,
    };

    let result = match outcome {
        Ok(result) => result,
        Err(panic) => Err(anyhow::anyhow!("task panicked: {}", panic_message(&*panic))),
    };

    let elapsed_ms = started.elapsed().as_millis() as u64;
    if result.is_ok() {
        info!(task_id = %id, elapsed_ms, "task finished");
    }

    match post_run {
        Some(post_run) => post_run(result.err()).await,
        None => {
            if let Err(e) = result {
                error!(task_id = %id, elapsed_ms, "task failed: {e:#}");
            }
        }
    }
}

/// Never resolves without a deadline.
async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
