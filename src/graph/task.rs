use std::fmt::Debug;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::notify::Notifier;

/// Result from a single executed task.
pub type TaskResult = anyhow::Result<()>;

type TaskFnPtr = Arc<dyn Fn() -> BoxFuture<'static, TaskResult> + Send + Sync>;

/// A named unit of work. Every call of [`Task::run`] starts a fresh execution
/// of the wrapped function; nothing is retained between runs, so the same task
/// can sit in a graph and in a watch binding at once.
#[derive(Clone)]
pub struct Task {
    name: Arc<str>,
    func: TaskFnPtr,
    notifier: Option<Arc<dyn Notifier>>,
}

impl Task {
    pub fn new<F, Fut>(name: impl AsRef<str>, func: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        Self {
            name: Arc::from(name.as_ref()),
            func: Arc::new(move || func().boxed()),
            notifier: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_arc(&self) -> Arc<str> {
        self.name.clone()
    }

    /// Catch failures at the leaf boundary: when run as part of a graph, an
    /// error or a panic is handed to `notifier` and the task reports success,
    /// so the surrounding graph keeps going.
    pub fn recover(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Run the task once and return its own outcome, recovered or not. A
    /// recovering task has its panics turned into errors here.
    pub fn attempt(&self) -> BoxFuture<'static, TaskResult> {
        let run = (self.func)();
        if self.notifier.is_none() {
            return run;
        }

        async move {
            AssertUnwindSafe(run)
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(anyhow::anyhow!("panicked: {}", panic_message(&*panic))))
        }
        .boxed()
    }

    /// Hand `error` to the notifier. Returns `false` when the task does not
    /// recover, leaving the error to the caller.
    pub fn notify(&self, error: &anyhow::Error) -> bool {
        match &self.notifier {
            Some(notifier) => {
                notifier.notify(&self.name, error);
                true
            }
            None => false,
        }
    }

    /// Run the task once. Failures of a recovering task are notified and
    /// reported as success.
    pub fn run(&self) -> BoxFuture<'static, TaskResult> {
        let run = self.attempt();
        if self.notifier.is_none() {
            return run;
        }

        let task = self.clone();
        async move {
            if let Err(error) = run.await {
                task.notify(&error);
            }
            Ok(())
        }
        .boxed()
    }
}

/// Text of a panic payload.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        String::from("unknown payload")
    }
}

impl Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Task({})", self.name)
    }
}
