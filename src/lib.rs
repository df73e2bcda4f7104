#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod config;
pub mod error;
pub mod graph;
pub mod io;
pub mod logging;
pub mod notify;
pub mod pipeline;
pub mod transform;
pub mod watch;

pub use crate::config::Config;
pub use crate::error::*;
pub use crate::graph::{Node, Report, Task, TaskResult, parallel, sequence};
pub use crate::notify::{ConsoleNotifier, Notifier};
pub use crate::watch::{Binding, Reload, Reloader, Supervisor};

/// Controls which of the two pipelines is being assembled. In `Build` mode
/// every task runs once, without source maps, with image compression and
/// with errors aborting the whole graph. In `Dev` mode the output is built
/// with source maps and lint, the output directory is served over HTTP and
/// the source tree is watched for changes until the process is terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// One-shot production build.
    Build,
    /// Live development build.
    Dev,
}

impl Mode {
    pub fn is_dev(self) -> bool {
        matches!(self, Mode::Dev)
    }
}
