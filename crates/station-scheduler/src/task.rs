use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::{CancelHandle, TaskContext};

// ---------------------------------------------------------------------------
// TaskId
// ---------------------------------------------------------------------------

/// Opaque identifier for a task, unique among queued and running tasks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    /// Generate a fresh random task ID (UUIDv4).
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Resource
// ---------------------------------------------------------------------------

/// A named piece of hardware (or logical capability) that at most one
/// accepted task may hold during its window.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Resource(Cow<'static, str>);

impl Resource {
    /// The software-defined radio receiver.
    pub const SDR: Resource = Resource(Cow::Borrowed("sdr"));

    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Window + conflict predicate
// ---------------------------------------------------------------------------

/// Closed time interval `[start, end]` in UTC.
///
/// `start <= end` is not enforced; a window whose end has already passed
/// simply runs without a deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Closed-interval overlap: touching boundaries count.
    pub fn overlaps(&self, other: &Window) -> bool {
        self.start <= other.end && self.end >= other.start
    }
}

/// Anything that occupies a time window and a set of exclusive resources.
///
/// Implemented by queued [`Task`]s and by the scheduler's running entries so
/// both can be checked against a candidate with the same predicate.
pub trait Reservation {
    fn window(&self) -> Window;
    fn resources(&self) -> &BTreeSet<Resource>;

    fn overlaps<R: Reservation + ?Sized>(&self, other: &R) -> bool {
        self.window().overlaps(&other.window())
    }

    /// True when the windows overlap and at least one resource is shared.
    fn conflicts_with<R: Reservation + ?Sized>(&self, other: &R) -> bool {
        self.overlaps(other) && !self.resources().is_disjoint(other.resources())
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// The unit of work: receives the execution context and the task argument.
pub type TaskFn =
    Arc<dyn Fn(TaskContext, serde_json::Value) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Runs right before the task function; returning `false` skips the run.
pub type PreRunHook = Arc<dyn Fn() -> BoxFuture<'static, bool> + Send + Sync>;

/// Receives the task function's error (`None` on success) after every run.
pub type PostRunHook = Arc<dyn Fn(Option<anyhow::Error>) -> BoxFuture<'static, ()> + Send + Sync>;

/// A schedulable unit of work with a time window and exclusive resources.
pub struct Task {
    pub(crate) id: TaskId,
    pub(crate) window: Window,
    pub(crate) resources: BTreeSet<Resource>,
    pub(crate) arg: serde_json::Value,
    pub(crate) func: TaskFn,
    pub(crate) pre_run: Option<PreRunHook>,
    pub(crate) post_run: Option<PostRunHook>,
    pub(crate) cancel: CancelHandle,
}

impl Task {
    /// Create a task with a generated ID, no argument and no resources.
    pub fn new<F, Fut>(start: DateTime<Utc>, end: DateTime<Utc>, func: F) -> Self
    where
        F: Fn(TaskContext, serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            id: TaskId::new(),
            window: Window::new(start, end),
            resources: BTreeSet::new(),
            arg: serde_json::Value::Null,
            func: Arc::new(move |ctx, arg| func(ctx, arg).boxed()),
            pre_run: None,
            post_run: None,
            cancel: CancelHandle::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_arg(mut self, arg: serde_json::Value) -> Self {
        self.arg = arg;
        self
    }

    pub fn with_resources(mut self, resources: impl IntoIterator<Item = Resource>) -> Self {
        self.resources = resources.into_iter().collect();
        self
    }

    pub fn with_pre_run<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.pre_run = Some(Arc::new(move || hook().boxed()));
        self
    }

    pub fn with_post_run<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Option<anyhow::Error>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.post_run = Some(Arc::new(move |err| hook(err).boxed()));
        self
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.window.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.window.end
    }

    pub fn arg(&self) -> &serde_json::Value {
        &self.arg
    }

    /// Same identifier and same window. Payload equality is not required.
    pub fn same_schedule(&self, other: &Task) -> bool {
        self.id == other.id && self.window == other.window
    }
}

impl Reservation for Task {
    fn window(&self) -> Window {
        self.window
    }

    fn resources(&self) -> &BTreeSet<Resource> {
        &self.resources
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("window", &self.window)
            .field("resources", &self.resources)
            .field("has_pre_run", &self.pre_run.is_some())
            .field("has_post_run", &self.post_run.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn task(start: i64, end: i64, resources: &[Resource]) -> Task {
        Task::new(at(start), at(end), |_, _| async { Ok(()) })
            .with_resources(resources.iter().cloned())
    }

    #[test]
    fn touching_windows_overlap() {
        let a = Window::new(at(0), at(10));
        let b = Window::new(at(10), at(20));
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
    }

    #[test]
    fn disjoint_windows_do_not_overlap() {
        let a = Window::new(at(0), at(10));
        let b = Window::new(at(11), at(20));
        assert!(!a.overlaps(&b));
    }

    #[test]
    fn conflict_requires_shared_resource() {
        let radio = task(0, 10, &[Resource::SDR]);
        let plain = task(5, 15, &[]);
        let other = task(5, 15, &[Resource::new("modem")]);
        assert!(!radio.conflicts_with(&plain));
        assert!(!radio.conflicts_with(&other));

        let radio_again = task(5, 15, &[Resource::SDR, Resource::new("modem")]);
        assert!(radio.conflicts_with(&radio_again));
    }

    #[test]
    fn conflict_is_symmetric() {
        let sets: [&[Resource]; 3] = [&[], &[Resource::SDR], &[Resource::SDR, Resource::new("gps")]];
        let windows = [(0, 10), (10, 20), (5, 7), (11, 30), (-5, -1)];
        let mut tasks = Vec::new();
        for set in sets {
            for (s, e) in windows {
                tasks.push(task(s, e, set));
            }
        }
        for a in &tasks {
            for b in &tasks {
                assert_eq!(a.conflicts_with(b), b.conflicts_with(a), "{a:?} vs {b:?}");
            }
        }
    }

    #[test]
    fn same_schedule_ignores_payload() {
        let a = task(0, 10, &[]).with_id("job-1").with_arg(serde_json::json!({"x": 1}));
        let b = task(0, 10, &[]).with_id("job-1").with_arg(serde_json::json!({"x": 2}));
        assert!(a.same_schedule(&b));

        let shifted = Task::new(at(0) + Duration::seconds(1), at(10), |_, _| async { Ok(()) })
            .with_id("job-1");
        assert!(!a.same_schedule(&shifted));
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(task(0, 1, &[]).id(), task(0, 1, &[]).id());
    }

    #[test]
    fn sdr_constant_matches_named_resource() {
        assert_eq!(Resource::SDR, Resource::new("sdr"));
    }
}
