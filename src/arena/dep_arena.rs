// Dep arena - storage for dependency metadata
//
// A dependency only knows who subscribes to it. The reverse direction (which
// deps a watcher holds) lives in the watcher arena, and the two are kept in
// sync by WatcherId::add_dep / cleanup_deps / teardown.
//
// Lock discipline: every helper here takes the arena lock plus the per-dep
// subscriber lock for the duration of a copy or a single insert/remove, and
// never calls into the watcher arena while holding them.

use crate::hash::FastHashBuilder;
use indexmap::IndexSet;
use parking_lot::{Mutex, RwLock};
use slab::Slab;

use super::{WatcherId, active_watcher};

/// Global dep arena - stores all dependency metadata
static DEP_ARENA: RwLock<Slab<DepMetadata>> = RwLock::new(Slab::new());

/// Unique identifier for a dependency node in the arena.
///
/// The owning [`Dep`](crate::dep::Dep) removes the slot on drop and scrubs the
/// id from every subscriber first, so a recycled index is never confused with
/// the dependency that used to live there.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, PartialOrd, Ord)]
pub struct DepId(u32);

impl DepId {
    /// Create a new DepId from a raw index
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Convert to usize for slab indexing
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Access the dependency metadata with a closure (read-only)
    ///
    /// Returns None if the dependency has been removed (stale access).
    pub fn with<F, R>(self, f: F) -> Option<R>
    where
        F: FnOnce(&DepMetadata) -> R,
    {
        let arena = DEP_ARENA.read();
        arena.get(self.index()).map(f)
    }

    /// Link the active watcher (if any) to this dependency.
    ///
    /// This is the read-tracking hook: the watcher records the dep in its
    /// next dependency set and subscribes itself if it was not already
    /// subscribed from a previous run.
    pub fn depend(self) {
        if let Some(watcher) = active_watcher() {
            watcher.add_dep(self);
        }
    }

    /// Register a subscriber. Duplicates collapse in the set.
    pub fn add_subscriber(self, watcher: WatcherId) {
        self.with(|metadata| {
            metadata.subscribers.lock().insert(watcher);
        });
    }

    /// Unregister a subscriber.
    pub fn remove_subscriber(self, watcher: WatcherId) {
        self.with(|metadata| {
            metadata.subscribers.lock().shift_remove(&watcher);
        });
    }

    /// Copy the current subscribers, ordered by watcher creation sequence.
    ///
    /// Notification iterates this snapshot, so subscriptions added or dropped
    /// while subscribers re-evaluate never affect the pass in progress.
    pub fn subscribers_snapshot(self) -> Vec<WatcherId> {
        let mut snapshot: Vec<WatcherId> = self
            .with(|metadata| metadata.subscribers.lock().iter().copied().collect())
            .unwrap_or_default();
        snapshot.sort_unstable();
        snapshot
    }

    /// Number of current subscribers (0 for a stale id).
    pub fn subscriber_count(self) -> usize {
        self.with(|metadata| metadata.subscribers.lock().len())
            .unwrap_or(0)
    }

    /// Whether `watcher` currently subscribes to this dependency.
    pub fn has_subscriber(self, watcher: WatcherId) -> bool {
        self.with(|metadata| metadata.subscribers.lock().contains(&watcher))
            .unwrap_or(false)
    }
}

/// Metadata for one dependency stored in the arena.
#[derive(Debug, Default)]
pub struct DepMetadata {
    /// Watchers subscribed to this dependency.
    pub(crate) subscribers: Mutex<IndexSet<WatcherId, FastHashBuilder>>,
}

impl DepMetadata {
    /// Create empty dependency metadata
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(IndexSet::with_hasher(FastHashBuilder)),
        }
    }
}

/// Insert a dependency into the arena and return its ID
pub fn dep_arena_insert(metadata: DepMetadata) -> DepId {
    let mut arena = DEP_ARENA.write();
    let entry = arena.vacant_entry();
    let key = entry.key();
    entry.insert(metadata);
    DepId::new(key as u32)
}

/// Remove a dependency from the arena
pub fn dep_arena_remove(id: DepId) -> Option<DepMetadata> {
    let mut arena = DEP_ARENA.write();
    arena.try_remove(id.index())
}
