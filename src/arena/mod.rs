// Arena-based storage for the dependency graph
//
// Two process-wide arenas hold the graph metadata:
// - Dep arena: stores DepMetadata (the subscriber set of one observable cell)
// - Watcher arena: stores WatcherMetadata (getter, callback, flags and the
//   double-buffered dependency sets of one computation)
//
// DepId and WatcherId are lightweight copyable handles that index into the
// slabs. Values themselves never live here; they stay in the observed
// containers (see value.rs) and in the watcher's cached value.

// Note: watcher_arena comes first because dep_arena stores WatcherIds
pub mod watcher_arena;
pub mod dep_arena;

pub use watcher_arena::{
    TargetGuard, WatcherFlags, WatcherId, WatcherMetadata, active_watcher, next_watcher_seq,
    untracked, watcher_arena_insert, watcher_arena_remove,
};

pub use dep_arena::{DepId, DepMetadata, dep_arena_insert, dep_arena_remove};
