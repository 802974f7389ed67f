//! Hot reload of the mapping set.
//!
//! One task owns the file watcher. When a contributing file changes it
//! stops watching, recompiles from the root file, publishes the result,
//! and watches the new file list. A failed compile is logged and the
//! previous set stays live.

use crate::mapping::{Loader, MappingSet};
use crate::matcher::RequestMatcher;
use crate::server::MockServer;
use globset::{Glob, GlobSet, GlobSetBuilder};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Quiet period after a change before reloading.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(50);

/// Called with every successfully published set.
pub type ChangeCallback = Box<dyn Fn(&MappingSet) + Send + Sync>;

/// How one reload ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadOutcome {
    Published { generation: u64 },
    /// Compile failed; the previous set is still live
    Failed(String),
}

enum Control {
    Subscribe(oneshot::Sender<ReloadOutcome>),
    Trigger,
    Stop,
}

/// Configures and starts the reload task.
pub struct Reloader {
    loader: Loader,
    server: MockServer,
    debounce: Duration,
    on_change: Option<ChangeCallback>,
}

impl Reloader {
    pub fn new(loader: Loader, server: MockServer) -> Self {
        Self {
            loader,
            server,
            debounce: DEFAULT_DEBOUNCE,
            on_change: None,
        }
    }

    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn on_change(mut self, callback: impl Fn(&MappingSet) + Send + Sync + 'static) -> Self {
        self.on_change = Some(Box::new(callback));
        self
    }

    /// Start watching the files of the live set.
    pub fn spawn(self) -> ReloadHandle {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run(control_rx));
        ReloadHandle {
            control: control_tx,
            task,
        }
    }

    async fn run(self, mut control: mpsc::UnboundedReceiver<Control>) {
        let (event_tx, mut events) = mpsc::unbounded_channel::<()>();
        let mut filenames = self.server.current().mapping_set().filenames.clone();
        let mut watcher = self.arm(&filenames, &event_tx);
        let mut waiters: Vec<oneshot::Sender<ReloadOutcome>> = Vec::new();

        loop {
            tokio::select! {
                biased;

                message = control.recv() => match message {
                    Some(Control::Subscribe(waiter)) => waiters.push(waiter),
                    Some(Control::Trigger) => {
                        let _ = event_tx.send(());
                    }
                    Some(Control::Stop) | None => break,
                },
                Some(()) = events.recv() => {
                    tokio::time::sleep(self.debounce).await;
                    while events.try_recv().is_ok() {}

                    drop(watcher.take());
                    let outcome = self.reload(&mut filenames).await;
                    while events.try_recv().is_ok() {}
                    watcher = self.arm(&filenames, &event_tx);

                    let mut stop = false;
                    while let Ok(message) = control.try_recv() {
                        match message {
                            Control::Subscribe(waiter) => waiters.push(waiter),
                            Control::Trigger => {
                                let _ = event_tx.send(());
                            }
                            Control::Stop => stop = true,
                        }
                    }
                    for waiter in waiters.drain(..) {
                        let _ = waiter.send(outcome.clone());
                    }
                    if stop {
                        break;
                    }
                }
            }
        }

        debug!("Reloader stopped");
    }

    /// Compile and publish. On success `filenames` becomes the new file list.
    async fn reload(&self, filenames: &mut Vec<PathBuf>) -> ReloadOutcome {
        info!(root = %self.loader.root().display(), "Mapping files changed, reloading");

        let loader = self.loader.clone();
        let compiled = tokio::task::spawn_blocking(move || {
            let set = Arc::new(loader.load()?);
            RequestMatcher::new(set)
        })
        .await;

        match compiled {
            Ok(Ok(matcher)) => {
                let set = Arc::clone(matcher.mapping_set());
                let generation = self.server.publish(matcher);
                *filenames = set.filenames.clone();
                if let Some(callback) = &self.on_change {
                    callback(&set);
                }
                ReloadOutcome::Published { generation }
            }
            Ok(Err(e)) => {
                error!(error = %e, "Failed to reload mappings, keeping the current set");
                ReloadOutcome::Failed(e.to_string())
            }
            Err(e) => {
                error!(error = %e, "Reload task failed, keeping the current set");
                ReloadOutcome::Failed(e.to_string())
            }
        }
    }

    fn arm(
        &self,
        filenames: &[PathBuf],
        events: &mpsc::UnboundedSender<()>,
    ) -> Option<RecommendedWatcher> {
        let list = match WatchList::new(self.loader.base_dir(), filenames) {
            Ok(list) => Arc::new(list),
            Err(e) => {
                error!(error = %e, "Invalid watch pattern, hot reload disabled");
                return None;
            }
        };
        match watch(Arc::clone(&list), events.clone()) {
            Ok(watcher) => {
                debug!(files = filenames.len(), dirs = list.dirs.len(), "Watching mapping files");
                Some(watcher)
            }
            Err(e) => {
                error!(error = %e, "Failed to start file watcher, hot reload disabled");
                None
            }
        }
    }
}

/// Control over a running reload task.
pub struct ReloadHandle {
    control: mpsc::UnboundedSender<Control>,
    task: JoinHandle<()>,
}

impl ReloadHandle {
    /// Resolves with the outcome of the next completed reload.
    pub fn subscribe(&self) -> oneshot::Receiver<ReloadOutcome> {
        let (tx, rx) = oneshot::channel();
        let _ = self.control.send(Control::Subscribe(tx));
        rx
    }

    /// Reload now, as if a watched file had changed.
    pub fn trigger(&self) {
        let _ = self.control.send(Control::Trigger);
    }

    pub async fn stop(self) {
        let _ = self.control.send(Control::Stop);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Reloader task ended abnormally");
        }
    }
}

/// Files and glob patterns whose changes trigger a reload.
#[derive(Debug)]
struct WatchList {
    files: HashSet<PathBuf>,
    globs: GlobSet,
    dirs: Vec<PathBuf>,
}

impl WatchList {
    fn new(base_dir: &Path, filenames: &[PathBuf]) -> Result<Self, globset::Error> {
        let mut files = HashSet::new();
        let mut globs = GlobSetBuilder::new();
        let mut dirs: Vec<PathBuf> = Vec::new();

        for name in filenames {
            let path = base_dir.join(name);
            if crate::source::is_glob(&path) {
                globs.add(Glob::new(&path.to_string_lossy())?);
            } else {
                files.insert(path.clone());
            }
            if let Some(dir) = path.parent() {
                if !dirs.iter().any(|d| d == dir) {
                    dirs.push(dir.to_path_buf());
                }
            }
        }

        Ok(Self {
            files,
            globs: globs.build()?,
            dirs,
        })
    }

    fn matches(&self, path: &Path) -> bool {
        self.files.contains(path) || self.globs.is_match(path)
    }
}

fn is_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// Directories are watched rather than files so that editors replacing a
/// file by rename are still seen.
fn watch(list: Arc<WatchList>, events: mpsc::UnboundedSender<()>) -> notify::Result<RecommendedWatcher> {
    let filter = Arc::clone(&list);
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if is_change(&event.kind) && event.paths.iter().any(|p| filter.matches(p)) {
                    let _ = events.send(());
                }
            }
            Err(e) => warn!(error = %e, "Watch error"),
        },
        Config::default(),
    )?;

    for dir in &list.dirs {
        if let Err(e) = watcher.watch(dir, RecursiveMode::NonRecursive) {
            debug!(dir = %dir.display(), error = %e, "Cannot watch directory");
        }
    }
    Ok(watcher)
}
