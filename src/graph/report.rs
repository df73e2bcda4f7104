use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Timing of a single leaf execution.
#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub name: Arc<str>,
    /// Offset from the start of the graph run.
    pub start: Duration,
    pub duration: Duration,
    pub ok: bool,
}

/// Leaf executions of a graph run, in completion order.
#[derive(Debug, Clone, Default)]
pub struct Report {
    pub executions: Vec<TaskExecution>,
}

impl Report {
    pub fn names(&self) -> Vec<&str> {
        self.executions.iter().map(|e| &*e.name).collect()
    }

    pub fn get(&self, name: &str) -> Option<&TaskExecution> {
        self.executions.iter().find(|e| &*e.name == name)
    }
}

impl Display for Report {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut executions = self.executions.clone();
        executions.sort_by_key(|e| e.start);

        for e in executions {
            let mark = if e.ok { "ok" } else { "failed" };
            writeln!(
                f,
                "{:>8.2?} {:>10.2?}  {:<6} {}",
                e.start, e.duration, mark, e.name
            )?;
        }

        Ok(())
    }
}

/// Shared sink the interpreter records into. Leaves that outlive a failed
/// parallel group keep a handle and still record.
#[derive(Clone)]
pub(crate) struct Recorder {
    origin: Instant,
    executions: Arc<Mutex<Vec<TaskExecution>>>,
}

impl Recorder {
    pub(crate) fn new() -> Self {
        Self {
            origin: Instant::now(),
            executions: Arc::default(),
        }
    }

    pub(crate) fn record(&self, name: Arc<str>, start: Instant, ok: bool) {
        let execution = TaskExecution {
            name,
            start: start.duration_since(self.origin),
            duration: start.elapsed(),
            ok,
        };

        self.executions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(execution);
    }

    pub(crate) fn snapshot(&self) -> Report {
        Report {
            executions: self
                .executions
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }
}
