// Watcher arena - storage for computation metadata
//
// A WatcherMetadata holds everything a computation needs between runs:
// - the getter and optional callback (shared closures, cloned out before
//   they are invoked so no arena lock is held while user code runs)
// - configuration flags (lazy / sync / user / deep / render)
// - the mutable state: active flag, dirty flag, cached value and the
//   double-buffered dependency sets
//
// DOUBLE-BUFFERED DEPENDENCIES:
// - `deps` is the set collected by the previous run
// - `new_deps` is the set being collected by the current run
// After each run cleanup_deps() unsubscribes from everything in `deps` that
// is missing from `new_deps`, then swaps the two. This keeps a watcher's
// subscriptions equal to exactly what its last evaluation read.
//
// The active-computation stack also lives here: a thread-local stack of
// Option<WatcherId>, where None entries suspend tracking.

use crate::hash::FastHashBuilder;
use crate::instance::{Instance, WeakInstance};
use crate::value::Value;
use crate::watcher::{Callback, Getter};
use indexmap::IndexSet;
use parking_lot::{Mutex, RwLock};
use slab::Slab;
use std::cell::RefCell;
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicU64, Ordering};

use super::DepId;

/// Global watcher arena - stores all watcher metadata
static WATCHER_ARENA: RwLock<Slab<WatcherMetadata>> = RwLock::new(Slab::new());

/// Monotonic creation sequence shared by all watchers.
static NEXT_WATCHER_SEQ: AtomicU64 = AtomicU64::new(1);

/// Allocate the next watcher creation sequence number.
pub fn next_watcher_seq() -> u64 {
    NEXT_WATCHER_SEQ.fetch_add(1, Ordering::Relaxed)
}

// Thread-local stack of computations currently being evaluated.
thread_local! {
    static TARGET_STACK: RefCell<Vec<Option<WatcherId>>> = const { RefCell::new(Vec::new()) };
}

/// The computation reads should currently be attributed to (if any).
pub fn active_watcher() -> Option<WatcherId> {
    TARGET_STACK.with(|stack| stack.borrow().last().copied().flatten())
}

/// Current depth of the active-computation stack (test-only)
#[cfg(test)]
pub(crate) fn target_depth() -> usize {
    TARGET_STACK.with(|stack| stack.borrow().len())
}

/// RAII guard for one entry of the active-computation stack.
///
/// `push` makes the given watcher (or nothing) the tracking target; dropping
/// the guard pops it again, on normal return as well as during unwinding, so
/// push/pop stay balanced on every exit path.
#[must_use = "dropping the guard immediately pops the tracking target"]
pub struct TargetGuard {
    depth: usize,
}

impl TargetGuard {
    /// Push `target` as the active computation.
    pub fn push(target: Option<WatcherId>) -> Self {
        let depth = TARGET_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(target);
            stack.len()
        });
        Self { depth }
    }
}

impl Drop for TargetGuard {
    fn drop(&mut self) {
        TARGET_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            debug_assert_eq!(stack.len(), self.depth, "unbalanced tracking stack");
            stack.pop();
        });
    }
}

/// Run a closure with dependency tracking suspended.
pub fn untracked<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = TargetGuard::push(None);
    f()
}

/// Unique identifier for a watcher in the arena.
///
/// Besides the slab slot, the id carries the watcher's creation sequence.
/// The sequence acts as a generation (a handle to a removed watcher never
/// resolves to whatever reuses its slot) and as the flush ordering key:
/// ids compare by creation order.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct WatcherId {
    index: u32,
    seq: u64,
}

impl Ord for WatcherId {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.seq.cmp(&other.seq)
    }
}

impl PartialOrd for WatcherId {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl WatcherId {
    /// Convert to usize for slab indexing
    pub fn index(self) -> usize {
        self.index as usize
    }

    /// Creation sequence number of this watcher.
    pub fn seq(self) -> u64 {
        self.seq
    }

    /// Access the watcher metadata with a closure (read-only)
    ///
    /// Returns None if the watcher has been removed (stale access).
    pub fn with<F, R>(self, f: F) -> Option<R>
    where
        F: FnOnce(&WatcherMetadata) -> R,
    {
        let arena = WATCHER_ARENA.read();
        arena
            .get(self.index())
            .filter(|metadata| metadata.seq == self.seq)
            .map(f)
    }

    /// Whether the arena still holds this watcher.
    pub fn exists(self) -> bool {
        self.with(|_| ()).is_some()
    }

    /// Configuration flags (empty for a stale id).
    pub fn flags(self) -> WatcherFlags {
        self.with(|metadata| metadata.flags)
            .unwrap_or_default()
    }

    /// The source expression, used in diagnostics.
    pub fn expression(self) -> String {
        self.with(|metadata| metadata.expression.clone())
            .unwrap_or_default()
    }

    /// The owning instance, if it is still alive.
    pub fn owner(self) -> Option<Instance> {
        self.with(|metadata| metadata.owner.upgrade()).flatten()
    }

    pub(crate) fn getter(self) -> Option<Getter> {
        self.with(|metadata| metadata.getter.clone())
    }

    pub(crate) fn callback(self) -> Option<Callback> {
        self.with(|metadata| metadata.callback.clone()).flatten()
    }

    pub(crate) fn before(self) -> Option<crate::options::Hook> {
        self.with(|metadata| metadata.before.clone()).flatten()
    }

    /// Whether the watcher has not been torn down.
    pub fn is_active(self) -> bool {
        self.with(|metadata| metadata.state.lock().active)
            .unwrap_or(false)
    }

    /// Mark inactive. Returns whether the watcher was active before.
    pub(crate) fn deactivate(self) -> bool {
        self.with(|metadata| std::mem::replace(&mut metadata.state.lock().active, false))
            .unwrap_or(false)
    }

    /// Whether a lazy watcher's cached value is stale.
    pub fn is_dirty(self) -> bool {
        self.with(|metadata| metadata.state.lock().dirty)
            .unwrap_or(false)
    }

    pub(crate) fn set_dirty(self, dirty: bool) {
        self.with(|metadata| metadata.state.lock().dirty = dirty);
    }

    /// The cached value (`Undefined` for a stale id).
    pub fn value(self) -> Value {
        self.with(|metadata| metadata.state.lock().value.clone())
            .unwrap_or_default()
    }

    /// Store a new cached value and return the previous one.
    pub(crate) fn replace_value(self, value: Value) -> Value {
        self.with(|metadata| std::mem::replace(&mut metadata.state.lock().value, value))
            .unwrap_or_default()
    }

    // =========================================================================
    // Dependency bookkeeping
    // =========================================================================

    /// Record `dep` as read during the current run.
    ///
    /// The dep is subscribed to only when it was not already held from the
    /// previous run; reading the same dep twice in one run is deduplicated by
    /// the `new_deps` set.
    pub fn add_dep(self, dep: DepId) {
        let subscribe = self
            .with(|metadata| {
                let mut state = metadata.state.lock();
                state.new_deps.insert(dep) && !state.deps.contains(&dep)
            })
            .unwrap_or(false);

        if subscribe {
            dep.add_subscriber(self);
        }
    }

    /// Drop subscriptions not renewed by the latest run and swap dep sets.
    pub fn cleanup_deps(self) {
        let stale: Vec<DepId> = self
            .with(|metadata| {
                let mut guard = metadata.state.lock();
                let state = &mut *guard;
                let stale = state
                    .deps
                    .iter()
                    .filter(|dep| !state.new_deps.contains(*dep))
                    .copied()
                    .collect();
                std::mem::swap(&mut state.deps, &mut state.new_deps);
                state.new_deps.clear();
                stale
            })
            .unwrap_or_default();

        if !stale.is_empty() {
            cov_mark::hit!(stale_dependency_dropped);
        }
        for dep in stale {
            dep.remove_subscriber(self);
        }
    }

    /// Copy of the dependencies collected by the last completed run.
    pub fn deps_snapshot(self) -> Vec<DepId> {
        self.with(|metadata| metadata.state.lock().deps.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Empty both dependency sets (teardown).
    pub(crate) fn clear_deps(self) {
        self.with(|metadata| {
            let mut state = metadata.state.lock();
            state.deps.clear();
            state.new_deps.clear();
        });
    }

    /// Forget a dependency whose owner is being dropped.
    pub(crate) fn forget_dep(self, dep: DepId) {
        self.with(|metadata| {
            let mut state = metadata.state.lock();
            state.deps.shift_remove(&dep);
            state.new_deps.shift_remove(&dep);
        });
    }
}

/// Watcher configuration bitset.
#[derive(Copy, Clone, Default, Debug, PartialEq, Eq)]
pub struct WatcherFlags(u8);

impl WatcherFlags {
    /// Computed-property watcher: evaluated on read.
    pub const LAZY: Self = Self(1 << 0);
    /// Runs inside the notifying write.
    pub const SYNC: Self = Self(1 << 1);
    /// Created through `Instance::watch` or a `watch` declaration.
    pub const USER: Self = Self(1 << 2);
    /// Traverses its value.
    pub const DEEP: Self = Self(1 << 3);
    /// Render watcher of an instance.
    pub const RENDER: Self = Self(1 << 4);

    /// Set `flag` when `on` is true.
    pub fn with(self, flag: Self, on: bool) -> Self {
        if on { Self(self.0 | flag.0) } else { self }
    }

    /// Whether every bit of `flag` is set.
    pub fn contains(self, flag: Self) -> bool {
        self.0 & flag.0 == flag.0
    }

    /// See [`WatcherFlags::LAZY`].
    pub fn lazy(self) -> bool {
        self.contains(Self::LAZY)
    }

    /// See [`WatcherFlags::SYNC`].
    pub fn sync(self) -> bool {
        self.contains(Self::SYNC)
    }

    /// See [`WatcherFlags::USER`].
    pub fn user(self) -> bool {
        self.contains(Self::USER)
    }

    /// See [`WatcherFlags::DEEP`].
    pub fn deep(self) -> bool {
        self.contains(Self::DEEP)
    }

    /// See [`WatcherFlags::RENDER`].
    pub fn render(self) -> bool {
        self.contains(Self::RENDER)
    }
}

/// Mutable per-run state of a watcher.
#[derive(Default)]
pub(crate) struct WatcherState {
    pub(crate) active: bool,
    pub(crate) dirty: bool,
    pub(crate) value: Value,
    pub(crate) deps: IndexSet<DepId, FastHashBuilder>,
    pub(crate) new_deps: IndexSet<DepId, FastHashBuilder>,
}

/// Metadata for one watcher stored in the arena.
pub struct WatcherMetadata {
    pub(crate) seq: u64,
    pub(crate) flags: WatcherFlags,
    pub(crate) expression: String,
    pub(crate) owner: WeakInstance,
    pub(crate) getter: Getter,
    pub(crate) callback: Option<Callback>,
    /// Runs before a queued run during a flush.
    pub(crate) before: Option<crate::options::Hook>,
    pub(crate) state: Mutex<WatcherState>,
}

impl WatcherMetadata {
    /// Build metadata for a fresh, active watcher. Lazy watchers start dirty.
    pub fn new(
        seq: u64,
        flags: WatcherFlags,
        expression: String,
        owner: WeakInstance,
        getter: Getter,
        callback: Option<Callback>,
        before: Option<crate::options::Hook>,
    ) -> Self {
        Self {
            seq,
            flags,
            expression,
            owner,
            getter,
            callback,
            before,
            state: Mutex::new(WatcherState {
                active: true,
                dirty: flags.lazy(),
                ..WatcherState::default()
            }),
        }
    }
}

/// Insert watcher metadata into the arena and return its ID
pub fn watcher_arena_insert(metadata: WatcherMetadata) -> WatcherId {
    let seq = metadata.seq;
    let mut arena = WATCHER_ARENA.write();
    let entry = arena.vacant_entry();
    let key = entry.key();
    entry.insert(metadata);
    WatcherId {
        index: key as u32,
        seq,
    }
}

/// Remove a watcher from the arena
pub fn watcher_arena_remove(id: WatcherId) -> Option<WatcherMetadata> {
    let mut arena = WATCHER_ARENA.write();
    match arena.get(id.index()) {
        Some(metadata) if metadata.seq == id.seq => Some(arena.remove(id.index())),
        _ => None,
    }
}
