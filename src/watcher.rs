use crate::arena::{
    TargetGuard, WatcherFlags, WatcherId, WatcherMetadata, next_watcher_seq, untracked,
    watcher_arena_insert, watcher_arena_remove,
};
use crate::error::{ReactiveError, handle_error, invoke_with_error_handling, warn};
use crate::instance::Instance;
use crate::options::Hook;
use crate::path::parse_path;
use crate::scheduler::queue_watcher;
use crate::traverse::traverse;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

/// Evaluation function of a watcher. Receives the owning instance.
pub type Getter = Arc<dyn Fn(&Instance) -> anyhow::Result<Value> + Send + Sync>;

/// Commit callback of a watcher: `(instance, new value, old value)`.
pub type Callback = Arc<dyn Fn(&Instance, &Value, &Value) -> anyhow::Result<()> + Send + Sync>;

/// What a watcher evaluates.
#[derive(Clone)]
pub enum WatchSource {
    /// Dot-delimited path read from the instance (`"a.b.c"`).
    Path(String),
    /// Arbitrary getter. `expression` names it in diagnostics.
    Getter {
        /// Name used in diagnostics.
        expression: String,
        /// Evaluation function.
        getter: Getter,
    },
}

impl WatchSource {
    /// An anonymous getter.
    pub fn getter<F>(getter: F) -> Self
    where
        F: Fn(&Instance) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::named("function", getter)
    }

    /// A getter with a diagnostic name.
    pub fn named<F>(expression: impl Into<String>, getter: F) -> Self
    where
        F: Fn(&Instance) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::Getter {
            expression: expression.into(),
            getter: Arc::new(getter),
        }
    }

    /// Expression used in diagnostics.
    pub fn expression(&self) -> &str {
        match self {
            WatchSource::Path(path) => path,
            WatchSource::Getter { expression, .. } => expression,
        }
    }
}

impl From<&str> for WatchSource {
    fn from(path: &str) -> Self {
        WatchSource::Path(path.to_owned())
    }
}

impl From<String> for WatchSource {
    fn from(path: String) -> Self {
        WatchSource::Path(path)
    }
}

impl fmt::Debug for WatchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchSource::Path(path) => f.debug_tuple("Path").field(path).finish(),
            WatchSource::Getter { expression, .. } => {
                f.debug_tuple("Getter").field(expression).finish()
            }
        }
    }
}

/// Watcher configuration.
#[derive(Clone, Default)]
pub struct WatcherOptions {
    /// Subscribe to every nested property of the value.
    pub deep: bool,
    /// User watcher: getter and callback failures are reported with context.
    pub user: bool,
    /// Computed-property kind: evaluate on demand, only mark dirty on change.
    pub lazy: bool,
    /// Run on notification instead of going through the scheduler queue.
    pub sync: bool,
    /// Invoke the callback once with the initial value (`Instance::watch`).
    pub immediate: bool,
    /// Runs before each queued run during a flush.
    pub before: Option<Hook>,
    pub(crate) render: bool,
}

impl WatcherOptions {
    /// Set [`WatcherOptions::deep`].
    pub fn deep(mut self, deep: bool) -> Self {
        self.deep = deep;
        self
    }

    /// Set [`WatcherOptions::user`].
    pub fn user(mut self, user: bool) -> Self {
        self.user = user;
        self
    }

    /// Set [`WatcherOptions::lazy`].
    pub fn lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    /// Set [`WatcherOptions::sync`].
    pub fn sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    /// Set [`WatcherOptions::immediate`].
    pub fn immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }

    /// Set [`WatcherOptions::before`].
    pub fn before<F>(mut self, before: F) -> Self
    where
        F: Fn(&Instance) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.before = Some(Arc::new(before));
        self
    }

    fn flags(&self) -> WatcherFlags {
        WatcherFlags::default()
            .with(WatcherFlags::LAZY, self.lazy)
            .with(WatcherFlags::SYNC, self.sync)
            .with(WatcherFlags::USER, self.user)
            .with(WatcherFlags::DEEP, self.deep)
            .with(WatcherFlags::RENDER, self.render)
    }
}

impl fmt::Debug for WatcherOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatcherOptions")
            .field("deep", &self.deep)
            .field("user", &self.user)
            .field("lazy", &self.lazy)
            .field("sync", &self.sync)
            .field("immediate", &self.immediate)
            .field("before", &self.before.is_some())
            .finish()
    }
}

/// Owning handle of a watcher.
///
/// Owners keep these in their watcher list; dropping one tears the watcher
/// down and frees its arena slot. Everything else refers to watchers by the
/// copyable [`WatcherId`].
#[derive(Debug)]
pub struct Watcher {
    id: WatcherId,
}

impl Watcher {
    /// Create a watcher owned by `owner` and return its id.
    ///
    /// Unless `lazy`, the getter runs once right away to capture the initial
    /// value and dependencies. An invalid path warns and yields a watcher
    /// whose getter always returns `Undefined`.
    pub fn create(
        owner: &Instance,
        source: WatchSource,
        callback: Option<Callback>,
        options: WatcherOptions,
    ) -> WatcherId {
        let expression = source.expression().to_owned();
        let getter = match source {
            WatchSource::Getter { getter, .. } => getter,
            WatchSource::Path(path) => path_getter(&path, owner),
        };
        let flags = options.flags();
        let id = watcher_arena_insert(WatcherMetadata::new(
            next_watcher_seq(),
            flags,
            expression,
            owner.downgrade(),
            getter,
            callback,
            options.before,
        ));
        tracing::trace!(watcher = id.seq(), expression = %id.expression(), "watcher created");

        if flags.render() {
            owner.set_render_watcher(id);
        }
        owner.push_watcher(Watcher { id });

        if !flags.lazy() {
            let value = id.get();
            id.replace_value(value);
        }
        id
    }

    /// Arena id of the watcher.
    pub fn id(&self) -> WatcherId {
        self.id
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.id.teardown();
        watcher_arena_remove(self.id);
    }
}

fn path_getter(path: &str, owner: &Instance) -> Getter {
    match parse_path(path) {
        Some(segments) => Arc::new(move |vm: &Instance| -> anyhow::Result<Value> {
            let mut segments = segments.iter();
            let Some(first) = segments.next() else {
                return Ok(Value::Undefined);
            };
            Ok(segments.fold(vm.get(first), |value, segment| value.get(segment)))
        }),
        None => {
            warn(ReactiveError::InvalidWatchPath(path.to_owned()), Some(owner));
            Arc::new(|_: &Instance| -> anyhow::Result<Value> { Ok(Value::Undefined) })
        }
    }
}

impl WatcherId {
    /// Evaluate the getter with this watcher as the tracking target and
    /// rebuild its dependency set.
    ///
    /// Getter failures are reported and read as `Undefined`.
    pub fn get(self) -> Value {
        let (Some(getter), Some(owner)) = (self.getter(), self.owner()) else {
            return Value::Undefined;
        };
        let flags = self.flags();
        let value = {
            let _target = TargetGuard::push(Some(self));
            let value = match getter(&owner) {
                Ok(value) => value,
                Err(error) => {
                    let info = if flags.render() {
                        "render".to_owned()
                    } else {
                        format!("getter for watcher \"{}\"", self.expression())
                    };
                    handle_error(error, Some(&owner), &info);
                    Value::Undefined
                }
            };
            if flags.deep() {
                traverse(&value);
            }
            value
        };
        self.cleanup_deps();
        value
    }

    /// Notification entry point.
    ///
    /// Lazy watchers only go dirty, sync watchers run right away, everything
    /// else is queued for the next flush.
    pub fn update(self) {
        let flags = self.flags();
        if flags.lazy() {
            self.set_dirty(true);
        } else if flags.sync() {
            self.run();
        } else {
            queue_watcher(self);
        }
    }

    /// Re-evaluate and fire the callback if the value changed.
    ///
    /// Object and array values, and deep watchers, always fire: their
    /// contents may have changed in place.
    pub fn run(self) {
        if !self.is_active() {
            return;
        }
        let value = self.get();
        let flags = self.flags();
        let changed = !value.strict_eq(&self.value());
        if !(changed || value.is_object() || flags.deep()) {
            return;
        }
        let old = self.replace_value(value.clone());
        let (Some(callback), Some(owner)) = (self.callback(), self.owner()) else {
            return;
        };
        let info = format!("callback for watcher \"{}\"", self.expression());
        untracked(|| {
            invoke_with_error_handling(|| callback(&owner, &value, &old), Some(&owner), &info)
        });
    }

    /// Recompute a lazy watcher's value and clear its dirty flag.
    pub fn evaluate(self) {
        let value = self.get();
        self.replace_value(value);
        self.set_dirty(false);
    }

    /// Subscribe the active watcher to every dependency of this one.
    ///
    /// Used when a computed value is read from another watcher, so changes to
    /// the computed's inputs reach the reader.
    pub fn depend(self) {
        for dep in self.deps_snapshot() {
            dep.depend();
        }
    }

    /// Unsubscribe from every dependency and deactivate. Idempotent.
    ///
    /// The owning handle is released from the owner's watcher list unless
    /// the owner is being destroyed (destruction tears down its whole list).
    pub fn teardown(self) {
        if !self.deactivate() {
            return;
        }
        for dep in self.deps_snapshot() {
            dep.remove_subscriber(self);
        }
        self.clear_deps();
        tracing::debug!(watcher = self.seq(), expression = %self.expression(), "watcher torn down");

        let handle = self
            .owner()
            .filter(|owner| !owner.is_being_destroyed())
            .and_then(|owner| owner.detach_watcher(self));
        drop(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::testing::Recorder;
    use crate::config::Config;
    use crate::options::ComponentOptions;
    use crate::scheduler::flush_watchers;
    use crate::value::Object;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn instance_with(data: &[(&str, Value)]) -> Instance {
        let data: Object = data.iter().cloned().collect();
        Instance::new(ComponentOptions::new().data_value(data))
    }

    fn counting_getter(
        runs: &Arc<AtomicUsize>,
        read: impl Fn(&Instance) -> Value + Send + Sync + 'static,
    ) -> WatchSource {
        let runs = runs.clone();
        WatchSource::named("counting", move |vm: &Instance| {
            runs.fetch_add(1, Ordering::Relaxed);
            Ok(read(vm))
        })
    }

    #[test]
    fn eager_watcher_evaluates_at_construction() {
        let vm = instance_with(&[("a", Value::from(1))]);
        let runs = Arc::new(AtomicUsize::new(0));

        let id = Watcher::create(
            &vm,
            counting_getter(&runs, |vm| vm.get("a")),
            None,
            WatcherOptions::default(),
        );

        assert_eq!(runs.load(Ordering::Relaxed), 1);
        assert_eq!(id.value(), Value::from(1));
        assert_eq!(id.deps_snapshot().len(), 1);
    }

    #[test]
    fn lazy_watcher_defers_until_evaluate() {
        let vm = instance_with(&[("a", Value::from(1))]);
        let runs = Arc::new(AtomicUsize::new(0));

        let id = Watcher::create(
            &vm,
            counting_getter(&runs, |vm| vm.get("a")),
            None,
            WatcherOptions::default().lazy(true),
        );
        assert_eq!(runs.load(Ordering::Relaxed), 0);
        assert!(id.is_dirty());

        id.evaluate();
        assert_eq!(runs.load(Ordering::Relaxed), 1);
        assert!(!id.is_dirty());

        vm.set("a", Value::from(2));
        assert!(id.is_dirty());
        assert_eq!(runs.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn sync_watcher_runs_on_write() {
        let vm = instance_with(&[("a", Value::from(1))]);
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: Callback = Arc::new(move |_: &Instance, new: &Value, old: &Value| -> anyhow::Result<()> {
            sink.lock().push((new.clone(), old.clone()));
            Ok(())
        });

        Watcher::create(
            &vm,
            WatchSource::from("a"),
            Some(callback),
            WatcherOptions::default().sync(true),
        );
        vm.set("a", Value::from(2));

        assert_eq!(*seen.lock(), vec![(Value::from(2), Value::from(1))]);
    }

    #[test]
    fn queued_watcher_waits_for_flush() {
        let vm = instance_with(&[("a", Value::from(1))]);
        let runs = Arc::new(AtomicUsize::new(0));
        Watcher::create(
            &vm,
            counting_getter(&runs, |vm| vm.get("a")),
            None,
            WatcherOptions::default(),
        );

        vm.set("a", Value::from(2));
        vm.set("a", Value::from(3));
        assert_eq!(runs.load(Ordering::Relaxed), 1);

        flush_watchers();
        assert_eq!(runs.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn branch_switch_prunes_dependencies() {
        cov_mark::check!(stale_dependency_dropped);
        let vm = instance_with(&[
            ("flag", Value::from(true)),
            ("b", Value::from("b")),
            ("c", Value::from("c")),
        ]);
        let runs = Arc::new(AtomicUsize::new(0));
        let id = Watcher::create(
            &vm,
            counting_getter(&runs, |vm| {
                if vm.get("flag").as_bool() == Some(true) {
                    vm.get("b")
                } else {
                    vm.get("c")
                }
            }),
            None,
            WatcherOptions::default().sync(true),
        );

        vm.set("flag", Value::from(false));
        assert_eq!(id.value(), Value::from("c"));
        assert_eq!(runs.load(Ordering::Relaxed), 2);

        vm.set("b", Value::from("ignored"));
        assert_eq!(runs.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn teardown_is_idempotent_and_final() {
        let vm = instance_with(&[("a", Value::from(1))]);
        let runs = Arc::new(AtomicUsize::new(0));
        let id = Watcher::create(
            &vm,
            counting_getter(&runs, |vm| vm.get("a")),
            None,
            WatcherOptions::default().sync(true),
        );

        id.teardown();
        id.teardown();
        vm.set("a", Value::from(2));

        assert_eq!(runs.load(Ordering::Relaxed), 1);
        assert!(!id.exists());
        assert!(vm.watchers().is_empty());
    }

    #[test]
    fn invalid_path_warns_and_reads_undefined() {
        let recorder = Recorder::default();

        let id = recorder.capture(Config::default(), || {
            let vm = instance_with(&[]);
            let id = Watcher::create(
                &vm,
                WatchSource::from("a[0]"),
                None,
                WatcherOptions::default(),
            );
            assert!(id.value().is_undefined());
            id
        });

        assert!(recorder.contains("Failed watching path: \"a[0]\""));
        assert!(!id.exists());
    }

    #[test]
    fn getter_failure_is_reported_with_expression() {
        let recorder = Recorder::default();

        recorder.capture(Config::default(), || {
            let vm = instance_with(&[]);
            Watcher::create(
                &vm,
                WatchSource::named("broken", |_: &Instance| anyhow::bail!("nope")),
                None,
                WatcherOptions::default().user(true),
            );
        });

        assert_eq!(recorder.infos(), vec!["getter for watcher \"broken\"".to_owned()]);
    }

    #[test]
    fn deep_watcher_sees_nested_writes() {
        let nested = Object::new();
        nested.set("x", Value::from(1));
        let vm = instance_with(&[("nested", Value::from(nested))]);
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let callback: Callback = Arc::new(move |_: &Instance, _: &Value, _: &Value| -> anyhow::Result<()> {
            counter.fetch_add(1, Ordering::Relaxed);
            Ok(())
        });

        Watcher::create(
            &vm,
            WatchSource::from("nested"),
            Some(callback),
            WatcherOptions::default().deep(true).sync(true),
        );
        vm.get("nested").as_object().unwrap().set("x", Value::from(2));

        assert_eq!(runs.load(Ordering::Relaxed), 1);
    }
}
