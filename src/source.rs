use crate::event::{DuplicateFilter, Event, EventKind};
use notify::{Config as NotifyConfig, EventKind as NotifyKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Supplies candidate paths to the main loop.
pub trait EventSource: Send {
    /// Paths observed since the previous call, in arrival order, each at most once.
    fn observe(&mut self) -> Vec<PathBuf>;

    fn describe(&self) -> String;
}

/// Regular files directly inside `dir`, sorted by name.
pub fn list_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

fn list_or_warn(dir: &Path) -> Vec<PathBuf> {
    match list_files(dir) {
        Ok(files) => files,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "cannot list watched directory");
            Vec::new()
        }
    }
}

/// Lists the whole directory on every call.
pub struct PollingSource {
    dir: PathBuf,
}

impl PollingSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl EventSource for PollingSource {
    fn observe(&mut self) -> Vec<PathBuf> {
        list_or_warn(&self.dir)
    }

    fn describe(&self) -> String {
        format!("polling {}", self.dir.display())
    }
}

/// OS change notifications for one directory (non-recursive).
///
/// notify delivers events on its own thread; that thread runs the duplicate
/// filter and forwards surviving paths over a channel that `observe` drains.
/// The first `observe` also lists the directory so files dropped while the
/// process was down are picked up.
pub struct NotifySource {
    dir: PathBuf,
    rx: mpsc::UnboundedReceiver<PathBuf>,
    filter: Arc<DuplicateFilter>,
    initial_scan_pending: bool,
    _watcher: RecommendedWatcher,
}

impl NotifySource {
    pub fn start(dir: &Path, dedupe_window: Duration) -> Result<Self, notify::Error> {
        let (tx, rx) = mpsc::unbounded_channel::<PathBuf>();
        let filter = Arc::new(DuplicateFilter::new(dedupe_window));
        let callback_filter = filter.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    let Some(kind) = convert_kind(&event.kind) else {
                        return;
                    };
                    for path in event.paths {
                        let ev = Event::new(kind, path);
                        if callback_filter.is_duplicate(&ev) {
                            debug!(path = %ev.path.display(), "duplicate event suppressed");
                            continue;
                        }
                        if tx.send(ev.path).is_err() {
                            // Receiver dropped: the source is shutting down
                            return;
                        }
                    }
                }
                Err(e) => error!("watch error: {:?}", e),
            },
            NotifyConfig::default(),
        )?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        info!(path = %dir.display(), "watching");

        Ok(Self {
            dir: dir.to_path_buf(),
            rx,
            filter,
            initial_scan_pending: true,
            _watcher: watcher,
        })
    }

    pub fn filter(&self) -> &DuplicateFilter {
        &self.filter
    }
}

fn convert_kind(kind: &NotifyKind) -> Option<EventKind> {
    match kind {
        NotifyKind::Create(_) => Some(EventKind::Created),
        NotifyKind::Modify(_) => Some(EventKind::Modified),
        _ => None,
    }
}

impl EventSource for NotifySource {
    fn observe(&mut self) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if self.initial_scan_pending {
            paths.extend(list_or_warn(&self.dir));
            self.initial_scan_pending = false;
        }
        while let Ok(path) = self.rx.try_recv() {
            paths.push(path);
        }

        let mut seen = HashSet::new();
        paths.retain(|p| seen.insert(p.clone()));
        paths
    }

    fn describe(&self) -> String {
        format!("notify {} (dedupe window {:?})", self.dir.display(), self.filter.window())
    }
}
