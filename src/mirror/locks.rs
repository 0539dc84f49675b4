use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Single-flight slots keyed by mirror target.
///
/// Holding the guards returned by [`TargetLocks::acquire`] gives exclusive use
/// of those targets. Slots live only while someone holds or waits on them; the
/// map keeps weak references and prunes dead ones on every acquisition.
#[derive(Debug, Default)]
pub struct TargetLocks {
    slots: Mutex<HashMap<PathBuf, Weak<AsyncMutex<()>>>>,
}

impl TargetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock every key, in sorted order so two multi-key callers cannot deadlock.
    pub async fn acquire(&self, keys: &[PathBuf]) -> Vec<OwnedMutexGuard<()>> {
        let mut keys = keys.to_vec();
        keys.sort();
        keys.dedup();

        let slots: Vec<Arc<AsyncMutex<()>>> = {
            let mut map = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            map.retain(|_, slot| slot.strong_count() > 0);
            keys.into_iter()
                .map(|key| {
                    if let Some(slot) = map.get(&key).and_then(Weak::upgrade) {
                        return slot;
                    }
                    let slot = Arc::new(AsyncMutex::new(()));
                    map.insert(key, Arc::downgrade(&slot));
                    slot
                })
                .collect()
        };

        let mut guards = Vec::with_capacity(slots.len());
        for slot in slots {
            guards.push(slot.lock_owned().await);
        }
        guards
    }

    /// Number of live slots.
    pub fn active(&self) -> usize {
        let map = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        map.values().filter(|slot| slot.strong_count() > 0).count()
    }
}
