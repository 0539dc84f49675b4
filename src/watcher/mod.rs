pub mod event;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::RecvTimeoutError;
use std::time::{Duration, Instant};

use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc as tokio_mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use event::{EventKind, WatchedEvent};

/// How long a rename "from" half waits for its "to" partner before it is
/// treated as a file moved out of the tree.
const RENAME_PAIRING_WINDOW: Duration = Duration::from_millis(100);

/// How often the bridge wakes up to expire unpaired rename halves.
const BRIDGE_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Handle to a running watcher. Dropping it stops the OS watch, which in turn
/// ends the bridge task and closes the event channel.
pub struct WatcherHandle {
    _watcher: RecommendedWatcher,
    _bridge_task: JoinHandle<()>,
}

/// Paths the watcher never reports: anything under the backup root (so a backup
/// root nested inside the watch root does not feed back into itself) and
/// anything matching a configured exclude pattern.
#[derive(Debug, Clone)]
pub struct WatchFilter {
    backup_root: PathBuf,
    exclude: Vec<glob::Pattern>,
}

impl WatchFilter {
    pub fn new(backup_root: &Path, patterns: &[String]) -> Self {
        let exclude = patterns
            .iter()
            .filter_map(|raw| match glob::Pattern::new(raw) {
                Ok(pattern) => Some(pattern),
                Err(err) => {
                    warn!(pattern = %raw, error = %err, "ignoring invalid exclude pattern");
                    None
                }
            })
            .collect();
        Self {
            backup_root: backup_root.to_path_buf(),
            exclude,
        }
    }

    pub fn should_ignore(&self, path: &Path) -> bool {
        if path.starts_with(&self.backup_root) {
            return true;
        }

        let path_str = path.to_string_lossy();
        self.exclude.iter().any(|pattern| {
            pattern.matches(&path_str)
                || path
                    .components()
                    .filter_map(|c| c.as_os_str().to_str())
                    .any(|component| pattern.matches(component))
        })
    }

    /// Decide what, if anything, of `event` reaches the engine.
    ///
    /// A rename that crosses the filter boundary is reported by the side that
    /// stays visible: leaving the watched set is a deletion of the old path,
    /// entering it is a creation of the new one.
    pub fn admit(&self, event: WatchedEvent) -> Option<WatchedEvent> {
        let new_ignored = self.should_ignore(&event.source_path);
        let old_ignored = match (event.kind, event.previous_path.as_deref()) {
            (EventKind::Renamed, Some(previous)) => Some(self.should_ignore(previous)),
            _ => None,
        };

        match (old_ignored, new_ignored) {
            (None | Some(true), true) => None,
            (None | Some(false), false) => Some(event),
            (Some(false), true) => event.previous_path.map(WatchedEvent::deleted),
            (Some(true), false) => Some(WatchedEvent::created(event.source_path)),
        }
    }
}

/// Start a recursive watcher on `watch_root`.
///
/// Returns a `WatcherHandle` (must be kept alive) and a tokio mpsc receiver
/// that yields classified `WatchedEvent`s. Raw notify events travel over a std
/// channel into a blocking bridge task, which classifies them, pairs rename
/// halves, applies `filter` and forwards the result.
pub fn start_watcher(
    watch_root: &Path,
    filter: WatchFilter,
    capacity: usize,
) -> anyhow::Result<(WatcherHandle, tokio_mpsc::Receiver<WatchedEvent>)> {
    let (std_tx, std_rx) = std::sync::mpsc::channel::<notify::Result<notify::Event>>();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        let _ = std_tx.send(res);
    })?;
    watcher.watch(watch_root, RecursiveMode::Recursive)?;

    let (tokio_tx, tokio_rx) = tokio_mpsc::channel::<WatchedEvent>(capacity.max(1));

    let bridge_task = tokio::task::spawn_blocking(move || {
        let mut classifier = EventClassifier::new(RENAME_PAIRING_WINDOW);
        loop {
            let classified = match std_rx.recv_timeout(BRIDGE_POLL_INTERVAL) {
                Ok(Ok(raw)) => {
                    trace!(?raw, "raw notify event");
                    classifier.classify(raw, Instant::now())
                }
                Ok(Err(err)) => {
                    warn!(error = %err, "watcher error");
                    Vec::new()
                }
                Err(RecvTimeoutError::Timeout) => Vec::new(),
                Err(RecvTimeoutError::Disconnected) => return,
            };
            let expired = classifier.expire(Instant::now());

            for event in classified.into_iter().chain(expired) {
                let Some(event) = filter.admit(event) else {
                    continue;
                };
                if tokio_tx.blocking_send(event).is_err() {
                    return; // receiver dropped, shutdown
                }
            }
        }
    });

    Ok((
        WatcherHandle {
            _watcher: watcher,
            _bridge_task: bridge_task,
        },
        tokio_rx,
    ))
}

/// Turns raw notify events into `WatchedEvent`s.
///
/// Backends report renames differently: inotify sends `From`, `To` and then
/// `Both` sharing one tracker cookie, Windows sends only the two halves, and
/// some backends send only `Both`. Halves are paired by cookie, and a `Both`
/// for an already paired cookie is dropped so each rename surfaces once.
#[derive(Debug)]
pub struct EventClassifier {
    window: Duration,
    pending_from: HashMap<usize, (PathBuf, Instant)>,
    paired: HashMap<usize, Instant>,
}

impl EventClassifier {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending_from: HashMap::new(),
            paired: HashMap::new(),
        }
    }

    pub fn classify(&mut self, raw: notify::Event, now: Instant) -> Vec<WatchedEvent> {
        let tracker = raw.attrs.tracker();
        let paths = raw.paths;

        match raw.kind {
            notify::EventKind::Create(_) => {
                paths.into_iter().map(WatchedEvent::created).collect()
            }
            notify::EventKind::Remove(_) => {
                paths.into_iter().map(WatchedEvent::deleted).collect()
            }
            notify::EventKind::Modify(ModifyKind::Name(mode)) => {
                self.classify_rename(mode, paths, tracker, now)
            }
            notify::EventKind::Modify(_)
            | notify::EventKind::Access(AccessKind::Close(AccessMode::Write)) => {
                paths.into_iter().map(WatchedEvent::modified).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Release rename halves whose partner never arrived: a lone `From` means
    /// the file left the watched tree.
    pub fn expire(&mut self, now: Instant) -> Vec<WatchedEvent> {
        let window = self.window;
        self.paired
            .retain(|_, at| now.saturating_duration_since(*at) < window);

        let stale: Vec<usize> = self
            .pending_from
            .iter()
            .filter(|(_, (_, at))| now.saturating_duration_since(*at) >= window)
            .map(|(cookie, _)| *cookie)
            .collect();

        stale
            .into_iter()
            .filter_map(|cookie| self.pending_from.remove(&cookie))
            .map(|(path, _)| WatchedEvent::deleted(path))
            .collect()
    }

    fn classify_rename(
        &mut self,
        mode: RenameMode,
        mut paths: Vec<PathBuf>,
        tracker: Option<usize>,
        now: Instant,
    ) -> Vec<WatchedEvent> {
        match mode {
            RenameMode::Both => {
                if let Some(cookie) = tracker
                    && self.paired.remove(&cookie).is_some()
                {
                    return Vec::new();
                }
                if paths.len() != 2 {
                    warn!(?paths, "dropping rename event without exactly two paths");
                    return Vec::new();
                }
                let to = paths.pop();
                let from = paths.pop();
                match (from, to) {
                    (Some(from), Some(to)) => {
                        if let Some(cookie) = tracker {
                            self.pending_from.remove(&cookie);
                        }
                        vec![WatchedEvent::renamed(from, to)]
                    }
                    _ => Vec::new(),
                }
            }
            RenameMode::From => match tracker {
                Some(cookie) => {
                    for path in paths {
                        self.pending_from.insert(cookie, (path, now));
                    }
                    Vec::new()
                }
                None => paths.into_iter().map(WatchedEvent::deleted).collect(),
            },
            RenameMode::To => {
                let pending = tracker.and_then(|cookie| {
                    self.pending_from
                        .remove(&cookie)
                        .map(|(from, _)| (cookie, from))
                });
                match (pending, paths.pop()) {
                    (Some((cookie, from)), Some(to)) => {
                        self.paired.insert(cookie, now);
                        vec![WatchedEvent::renamed(from, to)]
                    }
                    (None, Some(to)) => {
                        debug!(
                            path = %to.display(),
                            "rename target without source, treating as created"
                        );
                        vec![WatchedEvent::created(to)]
                    }
                    _ => Vec::new(),
                }
            }
            RenameMode::Any | RenameMode::Other => paths
                .into_iter()
                .map(|path| {
                    if path.exists() {
                        WatchedEvent::created(path)
                    } else {
                        WatchedEvent::deleted(path)
                    }
                })
                .collect(),
        }
    }
}
