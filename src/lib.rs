pub mod config;
pub mod error;
pub mod mirror;
pub mod output;
pub mod watcher;

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, bail};
use tracing::info;

use config::MirrorSettings;
use mirror::MirrorEngine;
use output::StatsSnapshot;
use watcher::{WatchFilter, start_watcher};

/// Watch `settings.watch_root` and mirror every change into `settings.backup_root`
/// until `stop` resolves.
///
/// Both roots must already exist; they are never created or removed here.
pub async fn run<S>(settings: MirrorSettings, stop: S) -> anyhow::Result<StatsSnapshot>
where
    S: Future<Output = ()>,
{
    for (label, root) in [
        ("watch", &settings.watch_root),
        ("backup", &settings.backup_root),
    ] {
        if !root.is_dir() {
            bail!("{label} root {} is not a directory", root.display());
        }
    }

    let filter = WatchFilter::new(&settings.backup_root, &settings.exclude);
    let (handle, events) = start_watcher(&settings.watch_root, filter, settings.queue_capacity)
        .with_context(|| format!("failed to watch {}", settings.watch_root.display()))?;

    info!(
        watch = %settings.watch_root.display(),
        backup = %settings.backup_root.display(),
        layout = ?settings.layout,
        rename = ?settings.rename,
        serialize = settings.serialize_per_path,
        "mirror started"
    );

    let engine = Arc::new(MirrorEngine::new(&settings));
    let stats = engine.run(events, stop).await;
    drop(handle);

    info!("mirror stopped");
    Ok(stats)
}
