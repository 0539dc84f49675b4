pub mod handlers;
pub mod locks;
pub mod target;

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::MirrorSettings;
use crate::error::{MirrorError, Result};
use crate::output::{MirrorStats, StatsSnapshot};
use crate::watcher::event::{EventKind, WatchedEvent};

use handlers::{Outcome, RenamePolicy, SkipReason};
use locks::TargetLocks;
use target::{MirrorTargets, TargetLayout};

/// How long a file the engine moved out of the watched tree stays eligible
/// for echo suppression of its own deletion event.
const ECHO_WINDOW: Duration = Duration::from_secs(5);

/// Stateless per-event dispatcher. The backup directory is the only state;
/// each event is handled on its own task with no ordering between events
/// unless per-target serialization is enabled.
#[derive(Debug)]
pub struct MirrorEngine {
    targets: MirrorTargets,
    rename: RenamePolicy,
    locks: Option<TargetLocks>,
    /// Source paths moved into the backup root by a rename, awaiting the
    /// deletion event that move itself produces.
    moved_out: Mutex<HashMap<PathBuf, Instant>>,
    stats: MirrorStats,
}

impl MirrorEngine {
    pub fn new(settings: &MirrorSettings) -> Self {
        Self {
            targets: MirrorTargets::new(
                &settings.watch_root,
                &settings.backup_root,
                settings.layout,
            ),
            rename: settings.rename,
            locks: settings.serialize_per_path.then(TargetLocks::new),
            moved_out: Mutex::new(HashMap::new()),
            stats: MirrorStats::default(),
        }
    }

    pub fn targets(&self) -> &MirrorTargets {
        &self.targets
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Apply one event to the backup tree, blocking on the filesystem primitive.
    pub fn apply(&self, event: &WatchedEvent) -> Result<Outcome> {
        let create_parents = self.targets.layout() == TargetLayout::Nested;
        let source = event.source_path.as_path();

        match event.kind {
            EventKind::Created => {
                let target = self.targets.resolve(source)?;
                handlers::on_created(source, &target, create_parents)
            }
            EventKind::Modified => {
                let target = self.targets.resolve(source)?;
                handlers::on_modified(source, &target, create_parents)
            }
            EventKind::Deleted => {
                // Consume the echo entry first so it is cleared even when the
                // path cannot be resolved.
                if self.take_moved_out(source) {
                    return Ok(Outcome::Skipped(SkipReason::SelfInduced));
                }
                handlers::on_deleted(&self.targets.resolve(source)?)
            }
            EventKind::Renamed => {
                let previous = event
                    .previous_path
                    .as_deref()
                    .ok_or_else(|| MirrorError::malformed("rename without a previous path"))?;
                let new_target = self.targets.resolve(source)?;

                match self.rename {
                    RenamePolicy::MoveSource => {
                        self.remember_moved_out(source);
                        let result =
                            handlers::on_renamed_move_source(source, &new_target, create_parents);
                        if !matches!(result, Ok(Outcome::Moved { .. })) {
                            self.take_moved_out(source);
                        }
                        result
                    }
                    RenamePolicy::Relocate => {
                        let old_target = self.targets.resolve(previous)?;
                        handlers::on_renamed_relocate(
                            source,
                            &new_target,
                            &old_target,
                            create_parents,
                        )
                    }
                }
            }
        }
    }

    /// Handle one event to completion: take the target slots if serialization
    /// is on, run the primitive on the blocking pool, log and count the result.
    ///
    /// Never fails: errors become a warning line and a failure count.
    pub async fn handle(self: Arc<Self>, event: WatchedEvent) -> Option<Outcome> {
        self.stats.record_event(event.kind);

        let _guards = match &self.locks {
            Some(locks) => locks.acquire(&self.lock_keys(&event)).await,
            None => Vec::new(),
        };

        let description = event.to_string();
        let engine = Arc::clone(&self);
        let joined = tokio::task::spawn_blocking(move || engine.apply(&event)).await;

        match joined {
            Ok(Ok(outcome)) => {
                if outcome.is_applied() {
                    info!("{description}: {outcome}");
                } else {
                    debug!("{description}: {outcome}");
                }
                self.stats.record_outcome(&outcome);
                Some(outcome)
            }
            Ok(Err(err)) => {
                warn!(event = %description, error = %err, "failed to mirror event");
                self.stats.record_failure();
                None
            }
            Err(err) => {
                error!(event = %description, error = %err, "mirror handler panicked");
                self.stats.record_failure();
                None
            }
        }
    }

    /// Dispatch events from `events` until `stop` resolves or the source closes.
    ///
    /// Each event gets its own task, so a slow copy never holds up intake.
    /// After stop no new handler is launched; the ones already running are
    /// allowed to finish. Returns the session counters.
    pub async fn run<S>(
        self: Arc<Self>,
        mut events: mpsc::Receiver<WatchedEvent>,
        stop: S,
    ) -> StatsSnapshot
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(stop);
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                _ = &mut stop => {
                    info!("stop requested");
                    break;
                }
                received = events.recv() => match received {
                    Some(event) => {
                        in_flight.spawn(Arc::clone(&self).handle(event));
                    }
                    None => {
                        debug!("event source closed");
                        break;
                    }
                },
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(err) = joined {
                        error!(error = %err, "mirror task aborted");
                    }
                }
            }
        }

        if !in_flight.is_empty() {
            debug!(count = in_flight.len(), "waiting for in-flight handlers");
        }
        while let Some(joined) = in_flight.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "mirror task aborted");
            }
        }

        self.stats()
    }

    fn lock_keys(&self, event: &WatchedEvent) -> Vec<PathBuf> {
        let mut keys: Vec<PathBuf> =
            self.targets.resolve(&event.source_path).into_iter().collect();
        if event.kind == EventKind::Renamed
            && self.rename == RenamePolicy::Relocate
            && let Some(previous) = event.previous_path.as_deref()
            && let Ok(old_target) = self.targets.resolve(previous)
        {
            keys.push(old_target);
        }
        keys
    }

    fn remember_moved_out(&self, source: &Path) {
        let mut moved = self.moved_out.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        moved.retain(|_, at| now.duration_since(*at) < ECHO_WINDOW);
        moved.insert(source.to_path_buf(), now);
    }

    fn take_moved_out(&self, source: &Path) -> bool {
        let mut moved = self.moved_out.lock().unwrap_or_else(|e| e.into_inner());
        match moved.remove(source) {
            Some(at) => at.elapsed() < ECHO_WINDOW,
            None => false,
        }
    }
}
