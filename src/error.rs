use thiserror::Error;

#[derive(Debug, Error)]
pub enum KumitateError {
    #[error("Error while loading the configuration:\n{0}")]
    Config(#[from] ConfigError),

    #[error("Error while running the task graph.\n{0}")]
    Graph(#[from] GraphError),

    #[error("Error while watching for file changes:\n{0}")]
    Watch(#[from] WatchError),

    #[error("Failed to build runtime")]
    RuntimeBuild(#[source] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read config file '{0}'.\n{1}")]
    Read(String, std::io::Error),

    #[error("Couldn't parse config file '{0}'.\n{1}")]
    Parse(String, toml::de::Error),

    #[error("Couldn't resolve project root '{0}'.\n{1}")]
    Root(String, std::io::Error),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),
}

#[derive(Debug, Error)]
pub enum CleanError {
    #[error("Couldn't remove '{0}'.\n{1}")]
    Remove(String, std::io::Error),

    #[error("Couldn't create '{0}'.\n{1}")]
    Create(String, std::io::Error),
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Task '{0}':\n{1:#}")]
    Task(String, anyhow::Error),

    #[error("Task '{0}' panicked: {1}")]
    Panic(String, String),
}

impl GraphError {
    /// Name of the leaf that failed.
    pub fn task(&self) -> &str {
        match self {
            GraphError::Task(name, _) => name,
            GraphError::Panic(name, _) => name,
        }
    }
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    GlobPattern(#[from] glob::PatternError),

    #[cfg(feature = "live")]
    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error("Couldn't bind live reload port {0}.\n{1}")]
    Bind(u16, std::io::Error),

    #[error("Watcher channel closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum GlobError {
    #[error("Couldn't compile glob pattern.\n{0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    Walk(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),
}
