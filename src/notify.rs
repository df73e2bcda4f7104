//! Developer-facing notifications for errors caught at a leaf boundary.

use console::style;

use crate::watch::{Reload, Reloader};

/// Receives errors that were recovered instead of failing the graph.
pub trait Notifier: Send + Sync {
    fn notify(&self, task: &str, error: &anyhow::Error);
}

/// Prints a highlighted banner to the log and, when a live-reload channel is
/// attached, forwards the message to connected browsers which print it to
/// their console.
#[derive(Default, Clone)]
pub struct ConsoleNotifier {
    reloader: Option<Reloader>,
}

impl ConsoleNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reloader(mut self, reloader: Reloader) -> Self {
        self.reloader = Some(reloader);
        self
    }
}

impl Notifier for ConsoleNotifier {
    fn notify(&self, task: &str, error: &anyhow::Error) {
        tracing::error!(
            "{} {}\n{error:#}",
            style("Error in").red().bold(),
            style(task).yellow()
        );

        if let Some(reloader) = &self.reloader {
            reloader.send(Reload::Error {
                task: task.to_string(),
                message: format!("{error:#}"),
            });
        }
    }
}
