use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::mirror::handlers::Outcome;
use crate::watcher::event::EventKind;

/// Live counters for a mirroring session, shared by all in-flight handlers.
#[derive(Debug, Default)]
pub struct MirrorStats {
    created: AtomicU64,
    modified: AtomicU64,
    deleted: AtomicU64,
    renamed: AtomicU64,
    applied: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

impl MirrorStats {
    pub fn record_event(&self, kind: EventKind) {
        let counter = match kind {
            EventKind::Created => &self.created,
            EventKind::Modified => &self.modified,
            EventKind::Deleted => &self.deleted,
            EventKind::Renamed => &self.renamed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outcome(&self, outcome: &Outcome) {
        if outcome.is_applied() {
            self.applied.fetch_add(1, Ordering::Relaxed);
        } else {
            self.skipped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            created: self.created.load(Ordering::Relaxed),
            modified: self.modified.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            renamed: self.renamed.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`MirrorStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub created: u64,
    pub modified: u64,
    pub deleted: u64,
    pub renamed: u64,
    /// Events that changed the backup tree.
    pub applied: u64,
    /// Events that needed no change (source gone, target already consistent).
    pub skipped: u64,
    /// Events whose filesystem primitive failed.
    pub failed: u64,
}

impl StatsSnapshot {
    pub fn total(&self) -> u64 {
        self.created + self.modified + self.deleted + self.renamed
    }
}

/// Print a summary of the mirroring session.
///
/// - `json = true`: emit a pretty-printed JSON object to stdout.
/// - `json = false`: emit a short human-readable summary to stdout.
///
/// Failures are repeated on **stderr** so stdout stays clean for JSON consumers.
pub fn print_summary(stats: &StatsSnapshot, json: bool) {
    if json {
        match serde_json::to_string_pretty(stats) {
            Ok(s) => println!("{}", s),
            Err(e) => eprintln!("error serialising stats: {}", e),
        }
    } else {
        println!("Handled {} events", stats.total());
        println!(
            "  {} created, {} modified, {} deleted, {} renamed",
            stats.created, stats.modified, stats.deleted, stats.renamed,
        );
        println!("  {} applied, {} skipped", stats.applied, stats.skipped);
    }

    if stats.failed > 0 {
        eprintln!("  {} events failed (see log)", stats.failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::handlers::SkipReason;
    use std::path::PathBuf;

    #[test]
    fn test_counters_feed_snapshot() {
        let stats = MirrorStats::default();
        stats.record_event(EventKind::Created);
        stats.record_event(EventKind::Renamed);
        stats.record_outcome(&Outcome::Copied {
            target: PathBuf::from("/b/a.txt"),
        });
        stats.record_outcome(&Outcome::Skipped(SkipReason::TargetExists));
        stats.record_failure();

        let snap = stats.snapshot();
        assert_eq!(snap.total(), 2);
        assert_eq!((snap.applied, snap.skipped, snap.failed), (1, 1, 1));
    }

    #[test]
    fn test_snapshot_serialises_field_names() {
        let value = serde_json::to_value(StatsSnapshot::default()).unwrap();
        for key in ["created", "modified", "deleted", "renamed", "applied", "skipped", "failed"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
    }
}
