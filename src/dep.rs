use crate::arena::{DepId, DepMetadata, WatcherId, dep_arena_insert, dep_arena_remove};

/// Publish node for one observable cell.
///
/// A `Dep` is owned by whatever it describes: a reactive property owns one,
/// and every [`Observer`](crate::Observer) owns one for structural changes
/// (keys added through [`set`](crate::set), array mutations). The metadata
/// itself lives in the dep arena; dropping the owner scrubs it from every
/// subscriber and frees the slot.
///
/// # Usage
/// ```ignore
/// let dep = Dep::new();
/// dep.depend();   // subscribe the active watcher, if any
/// dep.notify();   // re-evaluate (or schedule) every subscriber
/// ```
#[derive(Debug)]
pub struct Dep {
    id: DepId,
}

impl Dep {
    /// Allocate a new dependency in the arena
    pub fn new() -> Self {
        Self {
            id: dep_arena_insert(DepMetadata::new()),
        }
    }

    /// Arena id of this dependency
    pub fn id(&self) -> DepId {
        self.id
    }

    /// Link the active watcher to this dependency (both directions).
    pub fn depend(&self) {
        self.id.depend();
    }

    /// Notify every current subscriber.
    ///
    /// Subscribers are captured up front, so a subscriber that re-subscribes,
    /// unsubscribes or tears another watcher down while it runs does not
    /// change who gets notified in this pass. Lazy subscribers are all marked
    /// dirty before any other subscriber runs: a sync watcher reading a
    /// computed property always sees the write that triggered it. The rest
    /// are visited in creation order.
    pub fn notify(&self) {
        let subscribers = self.id.subscribers_snapshot();
        tracing::trace!(dep = ?self.id, subscribers = subscribers.len(), "notify");
        let (lazy, eager): (Vec<WatcherId>, Vec<WatcherId>) = subscribers
            .into_iter()
            .partition(|watcher| watcher.flags().lazy());
        for watcher in lazy {
            watcher.set_dirty(true);
        }
        for watcher in eager {
            watcher.update();
        }
    }
}

impl Drop for Dep {
    fn drop(&mut self) {
        // Subscribers must stop referring to this id before the slot is reused
        for watcher in self.id.subscribers_snapshot() {
            watcher.forget_dep(self.id);
        }
        dep_arena_remove(self.id);
    }
}

// NOTE: Dep intentionally does NOT implement Clone. Sharing goes through the
// owning container (a reactive property cell or an Arc<Observer>).

impl Default for Dep {
    fn default() -> Self {
        Self::new()
    }
}
