//! Component instances.
//!
//! An [`Instance`] owns the reactive state of one component: its props bag,
//! its root data object, its computed properties and every watcher created
//! for it. Declared names are proxied onto the instance, so `vm.get("count")`
//! reads whichever of props, data or computed claimed `count` first.
//!
//! Parents own their children; children, watchers and the root link hold
//! weak references back.

use crate::arena::{TargetGuard, WatcherId};
use crate::error::{ReactiveError, invoke_with_error_handling, warn};
use crate::observer::{self, ObservingScope};
use crate::options::{ComponentOptions, ComputedSetter, LifecycleHook, Method};
use crate::props::{UpdatingChild, validate_prop};
use crate::state::init_state;
use crate::value::{Object, Value};
use crate::watcher::{Getter, WatchSource, Watcher, WatcherOptions};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_UID: AtomicU64 = AtomicU64::new(0);

/// Names every instance already answers to. Declarations may not claim them.
pub const BUILTIN_NAMES: &[&str] = &[
    "$data",
    "$props",
    "$options",
    "$parent",
    "$root",
    "$children",
    "$watch",
    "$set",
    "$delete",
    "$mount",
    "$destroy",
    "$forceUpdate",
    "$nextTick",
    "$emit",
    "$on",
    "$off",
    "$once",
    "$el",
    "$refs",
    "$slots",
    "$attrs",
    "$listeners",
    "_uid",
    "_data",
    "_props",
    "_watcher",
    "_watchers",
    "_computedWatchers",
];

/// Names starting with `$` or `_` are reserved for the instance itself.
pub fn is_reserved(key: &str) -> bool {
    key.starts_with('$') || key.starts_with('_')
}

/// Which bag a proxied name resolves to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Binding {
    Prop,
    Method,
    Data,
    Computed,
}

/// Accessor installed for a computed property.
#[derive(Clone)]
pub(crate) struct ComputedAccessor {
    /// Read through the cached watcher; otherwise call `getter` on every read.
    pub(crate) cached: bool,
    pub(crate) getter: Option<Getter>,
    pub(crate) setter: Option<ComputedSetter>,
}

pub(crate) struct InstanceInner {
    uid: u64,
    options: ComponentOptions,
    is_root: bool,
    parent: WeakInstance,
    root: WeakInstance,
    children: Mutex<Vec<Instance>>,
    props: Object,
    props_data: RwLock<IndexMap<String, Value>>,
    data: RwLock<Object>,
    bindings: RwLock<IndexMap<String, Binding>>,
    computed_watchers: RwLock<IndexMap<String, WatcherId>>,
    computed: RwLock<IndexMap<String, ComputedAccessor>>,
    watchers: Mutex<Vec<Watcher>>,
    render_watcher: Mutex<Option<WatcherId>>,
    mounted: AtomicBool,
    being_destroyed: AtomicBool,
    destroyed: AtomicBool,
}

/// Shared handle to a component instance.
#[derive(Clone)]
pub struct Instance {
    inner: Arc<InstanceInner>,
}

/// Non-owning handle to a component instance.
#[derive(Clone, Default)]
pub struct WeakInstance {
    inner: Weak<InstanceInner>,
}

impl WeakInstance {
    /// A handle that never upgrades.
    pub fn new() -> Self {
        Self::default()
    }

    /// The instance, if it is still alive.
    pub fn upgrade(&self) -> Option<Instance> {
        self.inner.upgrade().map(|inner| Instance { inner })
    }
}

impl Instance {
    /// Create and initialize a root instance.
    pub fn new(options: ComponentOptions) -> Self {
        Self::create(options, None)
    }

    /// Create and initialize a child of `parent`.
    pub fn new_child(parent: &Instance, options: ComponentOptions) -> Self {
        Self::create(options, Some(parent))
    }

    fn create(options: ComponentOptions, parent: Option<&Instance>) -> Self {
        let uid = NEXT_UID.fetch_add(1, Ordering::Relaxed);
        let props_data = options.props_data.clone();
        let root = parent.map(|parent| parent.root().downgrade());
        let inner = Arc::new_cyclic(|this| InstanceInner {
            uid,
            options,
            is_root: parent.is_none(),
            parent: parent.map(Instance::downgrade).unwrap_or_default(),
            root: root.unwrap_or_else(|| WeakInstance {
                inner: this.clone(),
            }),
            children: Mutex::new(Vec::new()),
            props: Object::new(),
            props_data: RwLock::new(props_data),
            data: RwLock::new(Object::new()),
            bindings: RwLock::new(IndexMap::new()),
            computed_watchers: RwLock::new(IndexMap::new()),
            computed: RwLock::new(IndexMap::new()),
            watchers: Mutex::new(Vec::new()),
            render_watcher: Mutex::new(None),
            mounted: AtomicBool::new(false),
            being_destroyed: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
        });
        let vm = Instance { inner };
        if let Some(parent) = parent {
            parent.inner.children.lock().push(vm.clone());
        }
        tracing::debug!(uid, component = %vm.display_name(), "instance created");

        vm.call_hook(LifecycleHook::BeforeCreate);
        init_state(&vm);
        vm.call_hook(LifecycleHook::Created);
        vm
    }

    // =========================================================================
    // Identity and hierarchy
    // =========================================================================

    /// Process-unique id, increasing in creation order.
    pub fn uid(&self) -> u64 {
        self.inner.uid
    }

    /// The options this instance was created with.
    pub fn options(&self) -> &ComponentOptions {
        &self.inner.options
    }

    /// Declared component name.
    pub fn name(&self) -> Option<&str> {
        self.inner.options.name.as_deref()
    }

    /// `<Root>`, `<Name>` (classified) or `<Anonymous>`.
    pub fn display_name(&self) -> String {
        if self.inner.is_root {
            return "<Root>".to_owned();
        }
        match self.name() {
            Some(name) => format!("<{}>", classify(name)),
            None => "<Anonymous>".to_owned(),
        }
    }

    /// Whether this instance has no parent.
    pub fn is_root(&self) -> bool {
        self.inner.is_root
    }

    /// Parent instance, if any and still alive.
    pub fn parent(&self) -> Option<Instance> {
        self.inner.parent.upgrade()
    }

    /// Root of the instance tree (self for a root).
    pub fn root(&self) -> Instance {
        self.inner.root.upgrade().unwrap_or_else(|| self.clone())
    }

    /// Live children, in creation order.
    pub fn children(&self) -> Vec<Instance> {
        self.inner.children.lock().clone()
    }

    /// Weak handle that does not keep the instance alive.
    pub fn downgrade(&self) -> WeakInstance {
        WeakInstance {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &Instance) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // =========================================================================
    // State bags
    // =========================================================================

    /// The props bag (`$props`).
    pub fn props(&self) -> Object {
        self.inner.props.clone()
    }

    /// The root data object (`$data`).
    pub fn data(&self) -> Object {
        self.inner.data.read().clone()
    }

    /// Replacing `$data` is refused.
    pub fn set_data(&self, _data: Value) {
        warn(ReactiveError::ReplaceRootData, Some(self));
    }

    /// `$props` is read-only.
    pub fn set_props(&self, _props: Value) {
        warn(ReactiveError::PropsReadonly, Some(self));
    }

    /// Whether `key` is proxied on the instance or is a built-in name.
    pub fn has(&self, key: &str) -> bool {
        self.inner.bindings.read().contains_key(key) || BUILTIN_NAMES.contains(&key)
    }

    /// Read a proxied name. Unknown names and methods read `Undefined`.
    pub fn get(&self, key: &str) -> Value {
        match self.binding(key) {
            Some(Binding::Prop) => self.inner.props.get(key),
            Some(Binding::Data) => self.data().get(key),
            Some(Binding::Computed) => self.computed_get(key),
            Some(Binding::Method) | None => Value::Undefined,
        }
    }

    /// Write a proxied name.
    ///
    /// Props warn unless written by a parent update, computed properties
    /// without a setter warn, writes to unknown names are dropped.
    pub fn set(&self, key: &str, value: Value) {
        match self.binding(key) {
            Some(Binding::Prop) => self.inner.props.set(key, value),
            Some(Binding::Data) => self.data().set(key, value),
            Some(Binding::Computed) => self.computed_set(key, value),
            Some(Binding::Method) | None => {
                tracing::debug!(key, component = %self.display_name(), "ignored write to unknown instance property");
            }
        }
    }

    /// Call a bound method.
    pub fn call(&self, name: &str, args: &[Value]) -> anyhow::Result<Value> {
        let method = (self.binding(name) == Some(Binding::Method))
            .then(|| self.method(name))
            .flatten()
            .ok_or_else(|| ReactiveError::UnknownMethod(name.to_owned()))?;
        method(self, args)
    }

    /// `$set`: add a reactive property to an object inside this instance's state.
    pub fn set_reactive(&self, target: &Value, key: &str, value: Value) -> Value {
        observer::set(target, key, value)
    }

    /// `$delete`
    pub fn delete_reactive(&self, target: &Value, key: &str) {
        observer::del(target, key)
    }

    // =========================================================================
    // Watchers
    // =========================================================================

    /// The render watcher, once mounted.
    pub fn render_watcher(&self) -> Option<WatcherId> {
        *self.inner.render_watcher.lock()
    }

    /// Every live watcher owned by this instance, in creation order.
    pub fn watchers(&self) -> Vec<WatcherId> {
        self.inner.watchers.lock().iter().map(Watcher::id).collect()
    }

    /// The lazy watcher behind computed property `key`.
    pub fn computed_watcher(&self, key: &str) -> Option<WatcherId> {
        self.inner.computed_watchers.read().get(key).copied()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Mount with a render function.
    ///
    /// The render function runs inside a render watcher: it re-runs (through
    /// the scheduler) whenever anything it read changes, with `beforeUpdate`
    /// before and `updated` after each flush.
    pub fn mount<F>(&self, render: F) -> WatcherId
    where
        F: Fn(&Instance) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.call_hook(LifecycleHook::BeforeMount);
        let options = WatcherOptions {
            render: true,
            ..WatcherOptions::default()
        }
        .before(|vm: &Instance| {
            if vm.is_mounted() && !vm.is_destroyed() {
                vm.call_hook(LifecycleHook::BeforeUpdate);
            }
            Ok(())
        });
        let source = WatchSource::named("render", move |vm: &Instance| {
            render(vm)?;
            Ok(Value::Undefined)
        });
        let watcher = Watcher::create(self, source, None, options);

        self.inner.mounted.store(true, Ordering::Release);
        tracing::debug!(uid = self.uid(), component = %self.display_name(), "instance mounted");
        self.call_hook(LifecycleHook::Mounted);
        watcher
    }

    /// Queue the render watcher regardless of dependency changes.
    pub fn force_update(&self) {
        if let Some(watcher) = self.render_watcher() {
            watcher.update();
        }
    }

    /// Re-resolve props from a parent update.
    ///
    /// Runs with observation disabled (values passed down are owned by the
    /// parent) and without the prop-mutation warning.
    pub fn update_props(&self, props_data: IndexMap<String, Value>) {
        let _updating = UpdatingChild::enter();
        if !self.options().props.is_empty() {
            let _observing = ObservingScope::set(false);
            for (key, prop) in &self.options().props {
                let value = validate_prop(key, prop, &props_data, self);
                self.inner.props.set(key, value);
            }
        }
        *self.inner.props_data.write() = props_data;
    }

    /// Tear the instance down. Idempotent.
    pub fn destroy(&self) {
        if self.is_being_destroyed() {
            return;
        }
        self.call_hook(LifecycleHook::BeforeDestroy);
        self.inner.being_destroyed.store(true, Ordering::Release);

        if let Some(parent) = self.parent()
            && !parent.is_being_destroyed()
        {
            parent.inner.children.lock().retain(|child| !child.ptr_eq(self));
        }

        if let Some(render) = self.render_watcher() {
            render.teardown();
        }
        for watcher in self.watchers() {
            watcher.teardown();
        }
        if let Some(observer) = self.data().observer() {
            observer.release_root();
        }
        self.inner.destroyed.store(true, Ordering::Release);

        for child in self.children() {
            child.destroy();
        }
        self.call_hook(LifecycleHook::Destroyed);
        tracing::debug!(uid = self.uid(), component = %self.display_name(), "instance destroyed");
    }

    /// Whether `mount` has completed.
    pub fn is_mounted(&self) -> bool {
        self.inner.mounted.load(Ordering::Acquire)
    }

    /// Whether `destroy` has started.
    pub fn is_being_destroyed(&self) -> bool {
        self.inner.being_destroyed.load(Ordering::Acquire)
    }

    /// Whether `destroy` has torn the watchers down.
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }

    /// Run the hooks registered for `hook`, tracking suspended. Failures are
    /// reported as `<hook> hook`.
    pub(crate) fn call_hook(&self, hook: LifecycleHook) {
        let Some(handlers) = self.inner.options.hooks.get(&hook) else {
            return;
        };
        let _untracked = TargetGuard::push(None);
        let info = format!("{} hook", hook.name());
        for handler in handlers {
            invoke_with_error_handling(|| handler(self), Some(self), &info);
        }
    }

    // =========================================================================
    // Crate-internal wiring
    // =========================================================================

    pub(crate) fn binding(&self, key: &str) -> Option<Binding> {
        self.inner.bindings.read().get(key).copied()
    }

    /// Proxy `key` to `binding`. Only the first claim on a name is kept.
    pub(crate) fn bind(&self, key: &str, binding: Binding) {
        self.inner
            .bindings
            .write()
            .entry(key.to_owned())
            .or_insert(binding);
    }

    pub(crate) fn method(&self, name: &str) -> Option<Method> {
        self.inner.options.methods.get(name).cloned()
    }

    pub(crate) fn props_data_entry(&self, key: &str) -> Option<Value> {
        self.inner.props_data.read().get(key).cloned()
    }

    pub(crate) fn props_data(&self) -> IndexMap<String, Value> {
        self.inner.props_data.read().clone()
    }

    pub(crate) fn set_data_object(&self, data: Object) {
        // The previous (empty) object is dropped outside the lock
        let previous = std::mem::replace(&mut *self.inner.data.write(), data);
        drop(previous);
    }

    pub(crate) fn insert_computed_watcher(&self, key: &str, watcher: WatcherId) {
        self.inner
            .computed_watchers
            .write()
            .insert(key.to_owned(), watcher);
    }

    pub(crate) fn insert_computed(&self, key: &str, accessor: ComputedAccessor) {
        self.inner.computed.write().insert(key.to_owned(), accessor);
    }

    pub(crate) fn computed_accessor(&self, key: &str) -> Option<ComputedAccessor> {
        self.inner.computed.read().get(key).cloned()
    }

    pub(crate) fn push_watcher(&self, watcher: Watcher) {
        self.inner.watchers.lock().push(watcher);
    }

    /// Take the owning handle of `id` out of the watcher list.
    pub(crate) fn detach_watcher(&self, id: WatcherId) -> Option<Watcher> {
        let mut watchers = self.inner.watchers.lock();
        let position = watchers.iter().position(|watcher| watcher.id() == id)?;
        Some(watchers.remove(position))
    }

    pub(crate) fn set_render_watcher(&self, id: WatcherId) {
        *self.inner.render_watcher.lock() = Some(id);
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("uid", &self.inner.uid)
            .field("name", &self.display_name())
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for WeakInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(instance) => f.debug_tuple("WeakInstance").field(&instance).finish(),
            None => f.write_str("WeakInstance(dropped)"),
        }
    }
}

/// `my-comp` / `my_comp` -> `MyComp`
fn classify(name: &str) -> String {
    name.split(['-', '_'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            chars
                .next()
                .map(|first| first.to_uppercase().chain(chars).collect::<String>())
                .unwrap_or_default()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::testing::Recorder;
    use crate::options::PropOptions;
    use crate::options::PropType;
    use crate::scheduler::flush_watchers;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        (count.clone(), count)
    }

    #[test]
    fn hooks_run_in_lifecycle_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut options = ComponentOptions::new();
        for hook in [
            LifecycleHook::BeforeCreate,
            LifecycleHook::Created,
            LifecycleHook::BeforeMount,
            LifecycleHook::Mounted,
            LifecycleHook::BeforeUpdate,
            LifecycleHook::Updated,
            LifecycleHook::BeforeDestroy,
            LifecycleHook::Destroyed,
        ] {
            let log = log.clone();
            options = options.hook(hook, move |_: &Instance| {
                log.lock().push(hook.name());
                Ok(())
            });
        }
        let data: Object = [("n", Value::from(0))].into_iter().collect();
        let vm = Instance::new(options.data_value(data));

        vm.mount(|vm: &Instance| {
            vm.get("n");
            Ok(())
        });
        vm.set("n", Value::from(1));
        flush_watchers();
        vm.destroy();

        assert_eq!(
            *log.lock(),
            vec![
                "beforeCreate",
                "created",
                "beforeMount",
                "mounted",
                "beforeUpdate",
                "updated",
                "beforeDestroy",
                "destroyed",
            ]
        );
    }

    #[test]
    fn render_reruns_only_on_read_state() {
        let (renders, seen) = counter();
        let data: Object = [("shown", Value::from(1)), ("hidden", Value::from(1))]
            .into_iter()
            .collect();
        let vm = Instance::new(ComponentOptions::new().data_value(data));

        vm.mount(move |vm: &Instance| {
            seen.fetch_add(1, Ordering::Relaxed);
            vm.get("shown");
            Ok(())
        });
        vm.set("hidden", Value::from(2));
        flush_watchers();
        assert_eq!(renders.load(Ordering::Relaxed), 1);

        vm.set("shown", Value::from(2));
        flush_watchers();
        assert_eq!(renders.load(Ordering::Relaxed), 2);

        vm.force_update();
        flush_watchers();
        assert_eq!(renders.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn destroy_tears_down_watchers_and_children() {
        let (runs, seen) = counter();
        let data: Object = [("a", Value::from(1))].into_iter().collect();
        let parent = Instance::new(ComponentOptions::new().data_value(data));
        let child = Instance::new_child(&parent, ComponentOptions::new().name("leaf-node"));
        let _unwatch = parent.watch(
            "a",
            move |_: &Instance, _: &Value, _: &Value| {
                seen.fetch_add(1, Ordering::Relaxed);
                Ok(())
            },
            WatcherOptions::default().sync(true),
        );

        parent.destroy();
        parent.set("a", Value::from(2));

        assert_eq!(runs.load(Ordering::Relaxed), 0);
        assert!(parent.is_destroyed());
        assert!(child.is_destroyed());
        assert_eq!(parent.data().observer().unwrap().vm_count(), 0);
        assert!(parent.watchers().iter().all(|watcher| !watcher.is_active()));
    }

    #[test]
    fn child_is_unlinked_from_living_parent() {
        let parent = Instance::new(ComponentOptions::new());
        let child = Instance::new_child(&parent, ComponentOptions::new());
        assert_eq!(parent.children().len(), 1);
        assert!(child.root().ptr_eq(&parent));

        child.destroy();

        assert!(parent.children().is_empty());
        assert!(!parent.is_destroyed());
    }

    #[test]
    fn display_names_follow_hierarchy() {
        let root = Instance::new(ComponentOptions::new().name("app"));
        let named = Instance::new_child(&root, ComponentOptions::new().name("todo-item"));
        let anonymous = Instance::new_child(&root, ComponentOptions::new());

        assert_eq!(root.display_name(), "<Root>");
        assert_eq!(named.display_name(), "<TodoItem>");
        assert_eq!(anonymous.display_name(), "<Anonymous>");
        assert_eq!(
            crate::error::component_trace(&named),
            "found in <TodoItem> < <Root>"
        );
    }

    #[test]
    fn replacing_root_bags_is_refused() {
        let recorder = Recorder::default();
        let data: Object = [("a", Value::from(1))].into_iter().collect();

        recorder.capture(Config::default(), || {
            let vm = Instance::new(ComponentOptions::new().data_value(data.clone()));
            vm.set_data(Value::from(Object::new()));
            vm.set_props(Value::from(Object::new()));
            assert!(vm.data().ptr_eq(&data));
        });

        assert_eq!(
            recorder.messages(),
            vec![
                ReactiveError::ReplaceRootData.to_string(),
                ReactiveError::PropsReadonly.to_string(),
            ]
        );
    }

    #[test]
    fn update_props_revalidates_without_mutation_warning() {
        let recorder = Recorder::default();

        recorder.capture(Config::default(), || {
            let parent = Instance::new(ComponentOptions::new());
            let child = Instance::new_child(
                &parent,
                ComponentOptions::new()
                    .prop("size", PropOptions::of(PropType::Number))
                    .prop_value("size", 1),
            );

            child.update_props(IndexMap::from([("size".to_owned(), Value::from(2))]));
            assert_eq!(child.get("size"), Value::from(2));
            assert!(recorder.is_empty());

            child.set("size", Value::from(3));
        });

        assert_eq!(
            recorder.messages(),
            vec![ReactiveError::PropMutation("size".to_owned()).to_string()]
        );
    }

    #[test]
    fn methods_are_callable_by_name() {
        let vm = Instance::new(ComponentOptions::new().method(
            "sum",
            |_: &Instance, args: &[Value]| {
                Ok(Value::from(args.iter().filter_map(Value::as_f64).sum::<f64>()))
            },
        ));

        assert_eq!(
            vm.call("sum", &[Value::from(1), Value::from(2)]).unwrap(),
            Value::from(3)
        );
        assert!(vm.call("missing", &[]).is_err());
        assert!(vm.get("sum").is_undefined());
    }

    #[test]
    fn classify_names() {
        assert_eq!(classify("my-comp"), "MyComp");
        assert_eq!(classify("my_comp"), "MyComp");
        assert_eq!(classify("Already"), "Already");
    }
}
