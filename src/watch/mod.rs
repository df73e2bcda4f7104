//! Watch mode is implemented as a three-part system:
//!
//! 1. **File watcher**: uses the `notify` crate to monitor the source tree
//!    recursively. Events are coalesced by the debouncer and every changed
//!    path is handed to [`Supervisor::dispatch`].
//! 2. **Bindings**: each [`Binding`] pairs a glob with the [`Task`] that must
//!    re-run when a matching file changes. Bindings fire independently of
//!    each other on their own tokio task; there is no global lock and no
//!    queue, so a file saved twice in quick succession may run its task twice
//!    concurrently.
//! 3. **Live reload**: after a bound task succeeds, its [`Reload`] message is
//!    broadcast over WebSocket to every open browser tab. A failed rebuild
//!    sends nothing but its notification, so the error stays on screen. Stylesheet changes
//!    are injected in place, everything else reloads the page.
//!
//! The output directory itself is served over HTTP next to the WebSocket
//! endpoint.

#[cfg(feature = "server")]
mod http;
mod patterns;
mod reload;

use std::collections::BTreeSet;
use std::sync::mpsc::Receiver;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::WatchError;
use crate::graph::Task;
use crate::io::as_overhead;

pub use reload::{Reload, Reloader, client_script};

/// A glob pattern bound to the task that rebuilds its files.
#[derive(Debug, Clone)]
pub struct Binding {
    glob: Utf8PathBuf,
    dir: Utf8PathBuf,
    pattern: Pattern,
    task: Task,
    reload: Option<Reload>,
}

impl Binding {
    pub fn glob(&self) -> &Utf8Path {
        &self.glob
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn matches(&self, path: &Utf8Path) -> bool {
        self.pattern.matches_with(path.as_str(), patterns::MATCH_OPTIONS)
    }
}

/// Registry of watch bindings plus the live-reload channel. Built once during
/// startup, then shared behind an `Arc`.
pub struct Supervisor {
    root: Utf8PathBuf,
    out: Utf8PathBuf,
    http_port: u16,
    reload_port: u16,
    bindings: Vec<Binding>,
    reloader: Reloader,
    receiver: Mutex<Option<Receiver<Reload>>>,
    #[cfg(feature = "live")]
    listener: Mutex<Option<std::net::TcpListener>>,
}

impl Supervisor {
    /// Create an empty registry for the project described by `config`. With
    /// the `live` feature this reserves the live-reload port right away, so
    /// the port can be embedded into pages before the server starts.
    pub fn new(config: &Config) -> Result<Self, WatchError> {
        let root = absolute(&config.src());
        let out = absolute(&config.out());
        let (reloader, receiver) = Reloader::channel();

        #[cfg(feature = "live")]
        let (listener, reload_port) = reload::reserve_port(config.server.reload_port)
            .map_err(|e| WatchError::Bind(config.server.reload_port, e))?;

        #[cfg(not(feature = "live"))]
        let reload_port = config.server.reload_port;

        Ok(Self {
            root,
            out,
            http_port: config.server.port,
            reload_port,
            bindings: Vec::new(),
            reloader,
            receiver: Mutex::new(Some(receiver)),
            #[cfg(feature = "live")]
            listener: Mutex::new(Some(listener)),
        })
    }

    /// Absolute source root all binding globs are relative to.
    pub fn source_root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn reload_port(&self) -> u16 {
        self.reload_port
    }

    pub fn reloader(&self) -> Reloader {
        self.reloader.clone()
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    /// Take the receiving end of the live-reload channel. Only the first call
    /// gets it; [`Supervisor::attach`] serves it over WebSocket if nobody took
    /// it before.
    pub fn take_receiver(&self) -> Option<Receiver<Reload>> {
        self.receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Re-run `task` whenever a file matching `glob` (relative to the source
    /// root) changes, then broadcast `reload` if the task succeeded.
    pub fn bind(&mut self, glob: &str, task: Task, reload: Option<Reload>) -> Result<(), WatchError> {
        let pattern = patterns::compile(&self.root, glob)?;
        let glob = Utf8Path::new(glob.trim_start_matches("./"));

        self.bindings.push(Binding {
            glob: self.root.join(glob),
            dir: self.root.components().chain(patterns::static_root(glob).components()).collect(),
            pattern,
            task,
            reload,
        });

        Ok(())
    }

    /// Fire every binding matching at least one of `paths`. Each binding runs
    /// at most once per call, on its own tokio task. Paths matching nothing
    /// are ignored. The returned handles can be awaited but need not be.
    pub fn dispatch(&self, paths: &[Utf8PathBuf]) -> Vec<JoinHandle<()>> {
        let matched: BTreeSet<usize> = paths
            .iter()
            .flat_map(|path| {
                self.bindings
                    .iter()
                    .enumerate()
                    .filter(|(_, binding)| binding.matches(path))
                    .map(|(i, _)| i)
            })
            .collect();

        matched
            .into_iter()
            .map(|i| {
                let binding = &self.bindings[i];
                let task = binding.task.clone();
                let reload = binding.reload.clone();
                let reloader = self.reloader.clone();

                tokio::spawn(async move {
                    let start = Instant::now();
                    match task.attempt().await {
                        Ok(()) => {
                            tracing::info!("rebuilt '{}' {}", task.name(), as_overhead(start));
                            if let Some(reload) = reload {
                                reloader.send(reload);
                            }
                        }
                        Err(e) => {
                            if !task.notify(&e) {
                                tracing::error!("'{}' failed:\n{e:#}", task.name());
                            }
                        }
                    }
                })
            })
            .collect()
    }

    /// Directories that have to be watched for the bindings to ever fire.
    pub fn watch_roots(&self) -> Vec<Utf8PathBuf> {
        let roots = self
            .bindings
            .iter()
            .map(|binding| binding.dir.clone())
            .filter(|root| {
                let exists = root.exists();
                if !exists {
                    tracing::warn!("not watching {root}, it does not exist");
                }
                exists
            });

        patterns::collapse_watch_paths(roots)
    }

    /// Start serving the output directory, the live-reload endpoint and the
    /// file watcher. Runs until the process is terminated.
    #[cfg(feature = "live")]
    pub async fn attach(&self) -> Result<(), WatchError> {
        use notify::{EventKind, RecursiveMode};
        use notify_debouncer_full::{DebounceEventResult, new_debouncer};
        use std::time::Duration;

        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let (Some(listener), Some(receiver)) = (listener, self.take_receiver()) {
            reload::spawn(listener, receiver);
            tracing::info!(port = self.reload_port, "live reload listening");
        }

        #[cfg(feature = "server")]
        {
            let out = self.out.clone();
            let port = self.http_port;
            tokio::spawn(async move {
                if let Err(e) = http::serve(out, port).await {
                    tracing::error!("HTTP server stopped: {e:#}");
                }
            });
        }

        #[cfg(not(feature = "server"))]
        tracing::debug!(dir = %self.out, port = self.http_port, "built without the HTTP server");

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<DebounceEventResult>();
        let mut debouncer = new_debouncer(Duration::from_millis(100), None, move |result: DebounceEventResult| {
            let _ = tx.send(result);
        })?;

        for path in self.watch_roots() {
            tracing::info!("watching {path}");
            debouncer.watch(path.as_std_path(), RecursiveMode::Recursive)?;
        }

        while let Some(result) = rx.recv().await {
            match result {
                Ok(events) => {
                    let paths: Vec<Utf8PathBuf> = events
                        .iter()
                        .filter(|de| {
                            matches!(
                                de.event.kind,
                                EventKind::Create(..) | EventKind::Modify(..) | EventKind::Remove(..)
                            )
                        })
                        .flat_map(|de| &de.event.paths)
                        .filter_map(|path| Utf8Path::from_path(path.as_path()))
                        .map(Utf8Path::to_path_buf)
                        .collect();

                    if paths.is_empty() {
                        continue;
                    }

                    let fired = self.dispatch(&paths);
                    tracing::debug!(paths = paths.len(), tasks = fired.len(), "change detected");
                }
                Err(errors) => {
                    for e in errors {
                        tracing::warn!("watch error: {e}");
                    }
                }
            }
        }

        Err(WatchError::Closed)
    }
}

/// Canonical form of `path` when it exists, otherwise joined onto the
/// working directory.
fn absolute(path: &Utf8Path) -> Utf8PathBuf {
    if let Ok(path) = path.canonicalize_utf8() {
        return path;
    }

    if path.is_absolute() {
        return path.to_path_buf();
    }

    match std::env::current_dir()
        .ok()
        .and_then(|cwd| Utf8PathBuf::try_from(cwd).ok())
    {
        Some(cwd) => cwd.join(path),
        None => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::notify::ConsoleNotifier;

    fn counter(name: &str, count: &Arc<AtomicUsize>) -> Task {
        let count = count.clone();
        Task::new(name, move || {
            let count = count.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    fn supervisor() -> (tempfile::TempDir, Supervisor) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        std::fs::create_dir_all(root.join("src/scss")).unwrap();

        let mut config = Config::with_root(root);
        // avoid clashing with a running dev server
        config.server.reload_port = 0;

        (dir, Supervisor::new(&config).unwrap())
    }

    #[tokio::test]
    async fn test_unbound_path_runs_nothing() {
        let (_guard, mut sup) = supervisor();
        let count = Arc::new(AtomicUsize::new(0));
        sup.bind("scss/**/*.scss", counter("styles", &count), Some(Reload::styles()))
            .unwrap();

        let fired = sup.dispatch(&[sup.source_root().join("js/main.js")]);
        assert!(fired.is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_matching_binding_runs_and_reloads() {
        let (_guard, mut sup) = supervisor();
        let styles = Arc::new(AtomicUsize::new(0));
        let markup = Arc::new(AtomicUsize::new(0));
        sup.bind("scss/**/*.scss", counter("styles", &styles), Some(Reload::styles()))
            .unwrap();
        sup.bind("**/*.html", counter("markup", &markup), Some(Reload::Page))
            .unwrap();
        let rx = sup.take_receiver().unwrap();

        let changed = sup.source_root().join("scss/blocks/_header.scss");
        for handle in sup.dispatch(&[changed]) {
            handle.await.unwrap();
        }

        assert_eq!(styles.load(Ordering::SeqCst), 1);
        assert_eq!(markup.load(Ordering::SeqCst), 0);
        assert_eq!(rx.try_recv().unwrap(), Reload::styles());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_binding_fires_once_per_batch() {
        let (_guard, mut sup) = supervisor();
        let count = Arc::new(AtomicUsize::new(0));
        sup.bind("**/*.html", counter("markup", &count), Some(Reload::Page))
            .unwrap();

        let root = sup.source_root().to_path_buf();
        let handles = sup.dispatch(&[root.join("index.html"), root.join("partials/nav.html")]);
        assert_eq!(handles.len(), 1);

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_task_sends_no_reload() {
        let (_guard, mut sup) = supervisor();
        let failing = Task::new("scripts", || async { anyhow::bail!("syntax error") });
        sup.bind("js/**/*.js", failing, Some(Reload::Page)).unwrap();
        let rx = sup.take_receiver().unwrap();

        for handle in sup.dispatch(&[sup.source_root().join("js/main.js")]) {
            handle.await.unwrap();
        }

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_recovered_failure_sends_only_the_error() {
        let (_guard, mut sup) = supervisor();
        let notifier = Arc::new(ConsoleNotifier::new().with_reloader(sup.reloader()));
        let failing = Task::new("scripts", || async { anyhow::bail!("syntax error") }).recover(notifier);
        sup.bind("js/**/*.js", failing, Some(Reload::Page)).unwrap();
        let rx = sup.take_receiver().unwrap();

        for handle in sup.dispatch(&[sup.source_root().join("js/main.js")]) {
            handle.await.unwrap();
        }

        assert_eq!(
            rx.try_recv().unwrap(),
            Reload::Error {
                task: "scripts".to_string(),
                message: "syntax error".to_string(),
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_bindings_are_independent() {
        let (_guard, mut sup) = supervisor();

        // a binding whose task never finishes must not hold up the others
        let stuck = Task::new("stuck", || futures::future::pending());
        let count = Arc::new(AtomicUsize::new(0));
        sup.bind("images/**/*", stuck, None).unwrap();
        sup.bind("images/**/*", counter("copy", &count), None).unwrap();

        let handles = sup.dispatch(&[sup.source_root().join("images/a.png")]);
        assert_eq!(handles.len(), 2);

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while count.load(Ordering::SeqCst) == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[test]
    fn test_root_with_glob_characters() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().join("site [v2]")).unwrap();
        std::fs::create_dir_all(root.join("src/scss")).unwrap();

        let mut config = Config::with_root(root);
        config.server.reload_port = 0;
        let mut sup = Supervisor::new(&config).unwrap();
        sup.bind("scss/**/*.scss", Task::new("noop", || async { Ok(()) }), None)
            .unwrap();

        assert_eq!(sup.watch_roots(), vec![sup.source_root().join("scss")]);
        assert!(sup.bindings()[0].matches(&sup.source_root().join("scss/main.scss")));
    }

    #[test]
    fn test_watch_roots_skip_missing_and_collapse() {
        let (_guard, mut sup) = supervisor();
        let noop = || Task::new("noop", || async { Ok(()) });
        sup.bind("scss/**/*.scss", noop(), None).unwrap();
        sup.bind("fonts/**/*.ttf", noop(), None).unwrap();

        assert_eq!(sup.watch_roots(), vec![sup.source_root().join("scss")]);

        sup.bind("**/*.html", noop(), None).unwrap();
        assert_eq!(sup.watch_roots(), vec![sup.source_root().to_path_buf()]);
    }
}
