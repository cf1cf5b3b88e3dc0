//! Deferred watcher queue.
//!
//! Notified watchers that are neither lazy nor sync land here. The queue is
//! deduplicated per flush cycle and flushed in creation order, so a parent's
//! render watcher always runs before its children's. Watchers queued while
//! a flush is in progress are spliced in after the current position and run
//! in the same cycle.

use crate::arena::WatcherId;
use crate::config::config;
use crate::error::{ReactiveError, invoke_with_error_handling, warn};
use crate::hash::FastHashBuilder;
use crate::options::LifecycleHook;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

/// Runs of one watcher within a single flush before it is considered an
/// infinite update loop.
pub const MAX_UPDATE_COUNT: usize = 100;

#[derive(Default)]
struct SchedulerState {
    queue: Vec<WatcherId>,
    has: HashSet<WatcherId, FastHashBuilder>,
    circular: HashMap<WatcherId, usize, FastHashBuilder>,
    /// A flush has been scheduled (or started) for the current cycle.
    waiting: bool,
    flushing: bool,
    index: usize,
}

impl SchedulerState {
    fn reset(&mut self) -> Vec<WatcherId> {
        let flushed = std::mem::take(&mut self.queue);
        self.has.clear();
        self.circular.clear();
        self.index = 0;
        self.waiting = false;
        self.flushing = false;
        flushed
    }
}

thread_local! {
    static SCHEDULER: RefCell<SchedulerState> = RefCell::new(SchedulerState::default());
}

/// Queue a watcher for the next flush. Already-queued watchers are skipped.
pub fn queue_watcher(watcher: WatcherId) {
    let schedule = SCHEDULER.with(|state| {
        let mut state = state.borrow_mut();
        if !state.has.insert(watcher) {
            return false;
        }
        if state.flushing {
            cov_mark::hit!(requeued_during_flush);
            // Keep the unflushed tail sorted: insert after the last queued
            // watcher that is older, but never before the current position.
            let mut position = state.queue.len();
            while position > state.index + 1 && state.queue[position - 1] > watcher {
                position -= 1;
            }
            state.queue.insert(position, watcher);
        } else {
            state.queue.push(watcher);
        }
        !std::mem::replace(&mut state.waiting, true)
    });

    if schedule {
        let config = config();
        if !config.async_flush {
            flush_watchers();
        } else if let Some(hook) = config.on_flush_scheduled {
            hook();
        }
    }
}

/// Whether watchers are waiting for a flush.
pub fn is_flush_pending() -> bool {
    SCHEDULER.with(|state| {
        let state = state.borrow();
        state.waiting && !state.flushing
    })
}

/// Run every queued watcher, in creation order.
///
/// Afterwards the `updated` hooks of the flushed render watchers' instances
/// run. A no-op when called from inside a flush.
pub fn flush_watchers() {
    let started = SCHEDULER.with(|state| {
        let mut state = state.borrow_mut();
        if state.flushing {
            return false;
        }
        state.flushing = true;
        state.queue.sort_unstable();
        true
    });
    if !started {
        return;
    }

    // Reset the cycle on every exit path, including a panicking watcher
    struct ResetOnExit;
    impl Drop for ResetOnExit {
        fn drop(&mut self) {
            SCHEDULER.with(|state| state.borrow_mut().reset());
        }
    }

    let flushed = {
        let _reset = ResetOnExit;
        run_queue();
        SCHEDULER.with(|state| state.borrow_mut().reset())
    };
    tracing::trace!(watchers = flushed.len(), "flushed watcher queue");

    call_updated_hooks(&flushed);
}

fn run_queue() {
    loop {
        let next = SCHEDULER.with(|state| {
            let state = state.borrow();
            state.queue.get(state.index).copied()
        });
        let Some(watcher) = next else {
            break;
        };

        if let (Some(before), Some(owner)) = (watcher.before(), watcher.owner()) {
            let info = format!("before hook for watcher \"{}\"", watcher.expression());
            invoke_with_error_handling(|| before(&owner), Some(&owner), &info);
        }
        SCHEDULER.with(|state| state.borrow_mut().has.remove(&watcher));
        watcher.run();

        let looping = SCHEDULER.with(|state| {
            let mut state = state.borrow_mut();
            if state.has.contains(&watcher) {
                let count = state.circular.entry(watcher).or_default();
                *count += 1;
                *count > MAX_UPDATE_COUNT
            } else {
                false
            }
        });
        if looping {
            let warning = if watcher.flags().render() {
                ReactiveError::InfiniteRenderLoop
            } else {
                ReactiveError::InfiniteUpdateLoop(watcher.expression())
            };
            warn(warning, watcher.owner().as_ref());
            break;
        }

        SCHEDULER.with(|state| state.borrow_mut().index += 1);
    }
}

fn call_updated_hooks(flushed: &[WatcherId]) {
    for watcher in flushed.iter().rev() {
        let Some(owner) = watcher.owner() else {
            continue;
        };
        if owner.render_watcher() == Some(*watcher) && owner.is_mounted() && !owner.is_destroyed() {
            owner.call_hook(LifecycleHook::Updated);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, with_config};
    use crate::error::testing::Recorder;
    use crate::instance::Instance;
    use crate::options::ComponentOptions;
    use crate::value::{Object, Value};
    use crate::watcher::{Callback, WatchSource, Watcher, WatcherOptions};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn instance(data: &[(&str, Value)]) -> Instance {
        let data: Object = data.iter().cloned().collect();
        Instance::new(ComponentOptions::new().data_value(data))
    }

    fn logging_watcher(vm: &Instance, key: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) {
        let log = log.clone();
        Watcher::create(
            vm,
            WatchSource::named(key, move |vm: &Instance| {
                log.lock().push(key);
                Ok(vm.get(key))
            }),
            None,
            WatcherOptions::default(),
        );
    }

    #[test]
    fn flush_runs_each_watcher_once_in_creation_order() {
        let vm = instance(&[("a", Value::from(0)), ("b", Value::from(0))]);
        let log = Arc::new(Mutex::new(Vec::new()));
        logging_watcher(&vm, "a", &log);
        logging_watcher(&vm, "b", &log);
        log.lock().clear();

        vm.set("b", Value::from(1));
        vm.set("a", Value::from(1));
        vm.set("b", Value::from(2));
        assert!(is_flush_pending());

        flush_watchers();

        assert_eq!(*log.lock(), vec!["a", "b"]);
        assert!(!is_flush_pending());
    }

    #[test]
    fn watchers_queued_during_flush_run_in_the_same_cycle() {
        cov_mark::check!(requeued_during_flush);
        let vm = instance(&[("a", Value::from(0)), ("b", Value::from(0))]);
        let b_runs = Arc::new(AtomicUsize::new(0));

        let forward: Callback = Arc::new(|vm: &Instance, new: &Value, _: &Value| -> anyhow::Result<()> {
            vm.set("b", new.clone());
            Ok(())
        });
        Watcher::create(&vm, WatchSource::from("a"), Some(forward), WatcherOptions::default());

        let counter = b_runs.clone();
        let count: Callback = Arc::new(move |_: &Instance, _: &Value, _: &Value| -> anyhow::Result<()> {
            counter.fetch_add(1, Ordering::Relaxed);
            Ok(())
        });
        Watcher::create(&vm, WatchSource::from("b"), Some(count), WatcherOptions::default());

        vm.set("a", Value::from(5));
        flush_watchers();

        assert_eq!(b_runs.load(Ordering::Relaxed), 1);
        assert_eq!(vm.get("b"), Value::from(5));
        assert!(!is_flush_pending());
    }

    #[test]
    fn self_triggering_watcher_is_cut_off() {
        let recorder = Recorder::default();
        let runs = Arc::new(AtomicUsize::new(0));

        recorder.capture(Config::default(), || {
            let vm = instance(&[("n", Value::from(0))]);
            let counter = runs.clone();
            let bump: Callback = Arc::new(move |vm: &Instance, new: &Value, _: &Value| -> anyhow::Result<()> {
                counter.fetch_add(1, Ordering::Relaxed);
                vm.set("n", Value::from(new.as_f64().unwrap_or_default() + 1.0));
                Ok(())
            });
            Watcher::create(&vm, WatchSource::from("n"), Some(bump), WatcherOptions::default());

            vm.set("n", Value::from(1));
            flush_watchers();
        });

        assert!(recorder.contains("You may have an infinite update loop in watcher with expression \"n\""));
        assert_eq!(runs.load(Ordering::Relaxed), MAX_UPDATE_COUNT + 1);
        assert!(!is_flush_pending());
    }

    #[test]
    fn synchronous_configuration_flushes_at_enqueue() {
        let runs = Arc::new(AtomicUsize::new(0));

        with_config(Config::default().with_async_flush(false), || {
            let vm = instance(&[("a", Value::from(0))]);
            let counter = runs.clone();
            Watcher::create(
                &vm,
                WatchSource::named("a", move |vm: &Instance| {
                    counter.fetch_add(1, Ordering::Relaxed);
                    Ok(vm.get("a"))
                }),
                None,
                WatcherOptions::default(),
            );

            vm.set("a", Value::from(1));
            assert_eq!(runs.load(Ordering::Relaxed), 2);
        });
    }

    #[test]
    fn host_hook_fires_once_per_cycle() {
        let scheduled = Arc::new(AtomicUsize::new(0));
        let counter = scheduled.clone();
        let config = Config::default().with_flush_hook(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        with_config(config, || {
            let vm = instance(&[("a", Value::from(0)), ("b", Value::from(0))]);
            Watcher::create(&vm, WatchSource::from("a"), None, WatcherOptions::default());
            Watcher::create(&vm, WatchSource::from("b"), None, WatcherOptions::default());

            vm.set("a", Value::from(1));
            vm.set("b", Value::from(1));
            assert_eq!(scheduled.load(Ordering::Relaxed), 1);

            flush_watchers();
            vm.set("a", Value::from(2));
            assert_eq!(scheduled.load(Ordering::Relaxed), 2);
            flush_watchers();
        });
    }
}
