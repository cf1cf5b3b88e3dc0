//! Instance state bootstrap.
//!
//! Initialization order is props, methods, data, computed, watch. Each step
//! proxies its names onto the instance before the next one runs, and the
//! first step to claim a name keeps it; later collisions only warn.

use crate::arena::{TargetGuard, active_watcher, untracked};
use crate::config::config;
use crate::error::{ReactiveError, invoke_with_error_handling, warn};
use crate::instance::{Binding, ComputedAccessor, Instance, is_reserved};
use crate::observer::{CustomSetter, ObservingScope, define_reactive, observe};
use crate::options::{ComputedDecl, DataDecl, WatchHandler};
use crate::props::{hyphenate, is_reserved_attribute, is_updating_child, validate_prop};
use crate::value::{Object, Value};
use crate::watcher::{Callback, Getter, WatchSource, Watcher, WatcherOptions};
use std::sync::Arc;

/// Establish props, methods, data, computed properties and watchers.
pub fn init_state(vm: &Instance) {
    let options = vm.options();
    if !options.props.is_empty() {
        init_props(vm);
    }
    if !options.methods.is_empty() {
        init_methods(vm);
    }
    match &options.data {
        Some(data) => init_data(vm, data),
        None => {
            let data = Object::new();
            vm.set_data_object(data.clone());
            observe(&Value::Object(data), true);
        }
    }
    if !options.computed.is_empty() {
        init_computed(vm);
    }
    if !options.watch.is_empty() {
        init_watch(vm);
    }
}

fn init_props(vm: &Instance) {
    let is_root = vm.is_root();
    // Values handed down by a parent are the parent's to observe
    let _observing = (!is_root).then(|| ObservingScope::set(false));
    let props_data = vm.props_data();
    let props = vm.props();

    for (key, prop) in &vm.options().props {
        let value = validate_prop(key, prop, &props_data, vm);
        if is_reserved_attribute(key) {
            warn(ReactiveError::ReservedProp(hyphenate(key)), Some(vm));
        }
        define_reactive(&props, key, value, Some(prop_mutation_warning(vm, key, is_root)), false);
        if !vm.has(key) {
            vm.bind(key, Binding::Prop);
        }
    }
}

fn prop_mutation_warning(vm: &Instance, key: &str, is_root: bool) -> CustomSetter {
    let owner = vm.downgrade();
    let key = key.to_owned();
    Arc::new(move || {
        if !is_root && !is_updating_child() {
            warn(ReactiveError::PropMutation(key.clone()), owner.upgrade().as_ref());
        }
    })
}

fn init_methods(vm: &Instance) {
    let options = vm.options();
    for key in options.methods.keys() {
        if options.props.contains_key(key) {
            warn(ReactiveError::MethodCollidesWithProp(key.clone()), Some(vm));
        }
        if vm.has(key) && is_reserved(key) {
            warn(ReactiveError::MethodConflictsWithInstance(key.clone()), Some(vm));
        }
        if !vm.has(key) {
            vm.bind(key, Binding::Method);
        }
    }
}

fn init_data(vm: &Instance, decl: &DataDecl) {
    let value = match decl {
        DataDecl::Value(value) => value.clone(),
        DataDecl::Factory(factory) => get_data(&**factory, vm),
    };
    let data = match value {
        Value::Object(object) => object,
        _ => {
            warn(ReactiveError::DataNotObject, Some(vm));
            Object::new()
        }
    };
    vm.set_data_object(data.clone());

    let options = vm.options();
    for key in data.keys() {
        if options.methods.contains_key(&key) {
            warn(ReactiveError::DataCollidesWithMethod(key.clone()), Some(vm));
        }
        if options.props.contains_key(&key) {
            warn(ReactiveError::DataCollidesWithProp(key), Some(vm));
        } else if !is_reserved(&key) && !vm.has(&key) {
            vm.bind(&key, Binding::Data);
        }
    }
    observe(&Value::Object(data), true);
}

/// Call a data factory with tracking suspended. A failing factory is
/// reported and yields an empty object.
pub fn get_data(
    factory: &(dyn Fn(&Instance) -> anyhow::Result<Value> + Send + Sync),
    vm: &Instance,
) -> Value {
    let _untracked = TargetGuard::push(None);
    invoke_with_error_handling(|| factory(vm), Some(vm), "data()")
        .unwrap_or_else(|| Value::Object(Object::new()))
}

fn init_computed(vm: &Instance) {
    let server_rendering = config().server_rendering;
    let options = vm.options();

    for (key, decl) in &options.computed {
        let getter = decl.getter().cloned();
        if getter.is_none() {
            warn(ReactiveError::MissingComputedGetter(key.clone()), Some(vm));
        }

        if !server_rendering {
            let source = WatchSource::Getter {
                expression: key.clone(),
                getter: getter.unwrap_or_else(noop_getter),
            };
            let watcher = Watcher::create(vm, source, None, WatcherOptions::default().lazy(true));
            vm.insert_computed_watcher(key, watcher);
        }

        if !vm.has(key) {
            define_computed(vm, key, decl);
        } else if vm.data().has(key) {
            warn(ReactiveError::ComputedCollidesWithData(key.clone()), Some(vm));
        } else if options.props.contains_key(key) {
            warn(ReactiveError::ComputedCollidesWithProp(key.clone()), Some(vm));
        } else if options.methods.contains_key(key) {
            warn(ReactiveError::ComputedCollidesWithMethod(key.clone()), Some(vm));
        }
    }
}

fn noop_getter() -> Getter {
    Arc::new(|_: &Instance| -> anyhow::Result<Value> { Ok(Value::Undefined) })
}

/// Install the accessor of computed property `key` on the instance.
///
/// Reads go through the cached watcher unless caching is off (declared
/// `cache: false`, or server rendering), in which case the getter runs on
/// every read.
pub fn define_computed(vm: &Instance, key: &str, decl: &ComputedDecl) {
    let accessor = ComputedAccessor {
        cached: !config().server_rendering && decl.cache(),
        getter: decl.getter().cloned(),
        setter: decl.setter().cloned(),
    };
    vm.insert_computed(key, accessor);
    vm.bind(key, Binding::Computed);
}

impl Instance {
    pub(crate) fn computed_get(&self, key: &str) -> Value {
        let Some(accessor) = self.computed_accessor(key) else {
            return Value::Undefined;
        };
        if accessor.cached {
            let Some(watcher) = self.computed_watcher(key) else {
                return Value::Undefined;
            };
            if watcher.is_dirty() {
                watcher.evaluate();
            }
            if active_watcher().is_some() {
                watcher.depend();
            }
            return watcher.value();
        }
        let Some(getter) = accessor.getter else {
            return Value::Undefined;
        };
        invoke_with_error_handling(
            || getter(self),
            Some(self),
            &format!("getter for computed property \"{key}\""),
        )
        .unwrap_or_default()
    }

    pub(crate) fn computed_set(&self, key: &str, value: Value) {
        match self.computed_accessor(key).and_then(|accessor| accessor.setter) {
            Some(setter) => {
                invoke_with_error_handling(
                    || setter(self, value),
                    Some(self),
                    &format!("setter for computed property \"{key}\""),
                );
            }
            None => warn(ReactiveError::ComputedWithoutSetter(key.to_owned()), Some(self)),
        }
    }

    /// `$watch`: watch an expression or getter with a callback.
    ///
    /// The watcher is a user watcher. With `immediate`, the callback runs
    /// once right away with `(value, Undefined)`, tracking suspended.
    /// Returns the teardown function.
    pub fn watch<F>(
        &self,
        source: impl Into<WatchSource>,
        callback: F,
        options: WatcherOptions,
    ) -> impl FnOnce() + Send + Sync + 'static
    where
        F: Fn(&Instance, &Value, &Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.watch_with(source.into(), Arc::new(callback), options)
    }

    /// [`watch`](Instance::watch) with an already shared callback.
    pub fn watch_with(
        &self,
        source: WatchSource,
        callback: Callback,
        mut options: WatcherOptions,
    ) -> impl FnOnce() + Send + Sync + 'static {
        options.user = true;
        let immediate = options.immediate;
        let watcher = Watcher::create(self, source, Some(callback.clone()), options);
        if immediate {
            let info = format!("callback for immediate watcher \"{}\"", watcher.expression());
            let value = watcher.value();
            untracked(|| {
                invoke_with_error_handling(
                    || callback(self, &value, &Value::Undefined),
                    Some(self),
                    &info,
                )
            });
        }
        move || watcher.teardown()
    }
}

fn init_watch(vm: &Instance) {
    for (key, decls) in &vm.options().watch {
        for decl in decls {
            create_watcher(vm, WatchSource::Path(key.clone()), &decl.handler, decl.options.clone());
        }
    }
}

/// Resolve a watch handler and register it with [`Instance::watch_with`].
///
/// Method handlers are looked up by name and called with `[new, old]`; an
/// unknown name warns and registers nothing.
pub fn create_watcher(
    vm: &Instance,
    source: WatchSource,
    handler: &WatchHandler,
    options: WatcherOptions,
) -> bool {
    let callback: Callback = match handler {
        WatchHandler::Callback(callback) => callback.clone(),
        WatchHandler::Method(name) => {
            let Some(method) = (vm.binding(name) == Some(Binding::Method))
                .then(|| vm.method(name))
                .flatten()
            else {
                warn(ReactiveError::UnknownMethod(name.clone()), Some(vm));
                return false;
            };
            Arc::new(move |vm: &Instance, new: &Value, old: &Value| -> anyhow::Result<()> {
                method(vm, &[new.clone(), old.clone()])?;
                Ok(())
            })
        }
    };
    // Declared watchers live as long as the instance
    let _unwatch = vm.watch_with(source, callback, options);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, with_config};
    use crate::error::testing::Recorder;
    use crate::options::{ComponentOptions, PropOptions, PropType};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn data(entries: &[(&str, Value)]) -> Object {
        entries.iter().cloned().collect()
    }

    #[test]
    fn first_initializer_claims_a_name() {
        let recorder = Recorder::default();

        let vm = recorder.capture(Config::default(), || {
            Instance::new(
                ComponentOptions::new()
                    .prop("shared", PropOptions::of(PropType::String))
                    .prop_value("shared", "from prop")
                    .method("shared", |_: &Instance, _: &[Value]| Ok(Value::Null))
                    .data_value(data(&[("shared", Value::from("from data"))]))
                    .computed("shared", |_: &Instance| Ok(Value::from("from computed"))),
            )
        });

        assert_eq!(vm.get("shared"), Value::from("from prop"));
        assert_eq!(
            recorder.messages(),
            vec![
                ReactiveError::MethodCollidesWithProp("shared".to_owned()).to_string(),
                ReactiveError::DataCollidesWithMethod("shared".to_owned()).to_string(),
                ReactiveError::DataCollidesWithProp("shared".to_owned()).to_string(),
                ReactiveError::ComputedCollidesWithData("shared".to_owned()).to_string(),
            ]
        );
    }

    #[test]
    fn reserved_data_keys_stay_off_the_instance() {
        let vm = Instance::new(
            ComponentOptions::new().data_value(data(&[("_private", Value::from(1)), ("$x", Value::from(2))])),
        );

        assert!(vm.get("_private").is_undefined());
        assert_eq!(vm.data().get("_private"), Value::from(1));
        assert!(vm.data().is_reactive("$x"));
    }

    #[test]
    fn data_factory_reads_are_not_tracked() {
        let parent = Instance::new(ComponentOptions::new().data_value(data(&[("seed", Value::from(3))])));
        let runs = Arc::new(AtomicUsize::new(0));
        let seen = runs.clone();
        parent.mount(move |vm: &Instance| {
            seen.fetch_add(1, Ordering::Relaxed);
            Instance::new_child(
                vm,
                ComponentOptions::new().data(|vm: &Instance| {
                    let seed = vm.parent().map(|parent| parent.get("seed")).unwrap_or_default();
                    Ok(Value::from(data(&[("value", seed)])))
                }),
            );
            Ok(())
        });

        parent.set("seed", Value::from(4));
        crate::scheduler::flush_watchers();

        assert_eq!(runs.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn non_object_data_is_replaced() {
        let recorder = Recorder::default();

        let vm = recorder.capture(Config::default(), || {
            Instance::new(ComponentOptions::new().data(|_: &Instance| Ok(Value::from(5))))
        });

        assert!(vm.data().is_empty());
        assert!(vm.data().observer().is_some());
        assert!(recorder.contains("data functions should return an object"));
    }

    #[test]
    fn failing_data_factory_is_reported() {
        let recorder = Recorder::default();

        recorder.capture(Config::default(), || {
            Instance::new(ComponentOptions::new().data(|_: &Instance| anyhow::bail!("no data")))
        });

        assert_eq!(recorder.infos(), vec!["data()".to_owned()]);
    }

    #[test]
    fn computed_setter_and_missing_setter() {
        let recorder = Recorder::default();

        recorder.capture(Config::default(), || {
            let vm = Instance::new(
                ComponentOptions::new()
                    .data_value(data(&[("first", Value::from("a"))]))
                    .computed_decl(
                        "name",
                        ComputedDecl::GetterSetter {
                            get: Some(Arc::new(|vm: &Instance| -> anyhow::Result<Value> {
                                Ok(vm.get("first"))
                            })),
                            set: Some(Arc::new(|vm: &Instance, value: Value| -> anyhow::Result<()> {
                                vm.set("first", value);
                                Ok(())
                            })),
                            cache: true,
                        },
                    )
                    .computed("upper", |vm: &Instance| {
                        Ok(Value::from(vm.get("first").to_string().to_uppercase()))
                    }),
            );

            vm.set("name", Value::from("b"));
            assert_eq!(vm.get("name"), Value::from("b"));
            assert_eq!(vm.get("upper"), Value::from("B"));

            vm.set("upper", Value::from("C"));
        });

        assert_eq!(
            recorder.messages(),
            vec![ReactiveError::ComputedWithoutSetter("upper".to_owned()).to_string()]
        );
    }

    #[test]
    fn missing_computed_getter_warns_and_reads_undefined() {
        let recorder = Recorder::default();

        let vm = recorder.capture(Config::default(), || {
            Instance::new(ComponentOptions::new().computed_decl(
                "empty",
                ComputedDecl::GetterSetter {
                    get: None,
                    set: None,
                    cache: true,
                },
            ))
        });

        assert!(vm.get("empty").is_undefined());
        assert!(recorder.contains("Getter is missing for computed property \"empty\""));
    }

    #[test]
    fn uncached_computed_runs_on_every_read() {
        let runs = Arc::new(AtomicUsize::new(0));
        let seen = runs.clone();
        let vm = Instance::new(ComponentOptions::new().computed_decl(
            "now",
            ComputedDecl::GetterSetter {
                get: Some(Arc::new(move |_: &Instance| -> anyhow::Result<Value> {
                    Ok(Value::from(seen.fetch_add(1, Ordering::Relaxed) as f64))
                })),
                set: None,
                cache: false,
            },
        ));

        vm.get("now");
        vm.get("now");

        assert_eq!(runs.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn server_rendering_skips_watchers_and_observers() {
        with_config(Config::default().with_server_rendering(true), || {
            let vm = Instance::new(
                ComponentOptions::new()
                    .data_value(data(&[("n", Value::from(2))]))
                    .computed("double", |vm: &Instance| {
                        Ok(Value::from(vm.get("n").as_f64().unwrap_or_default() * 2.0))
                    }),
            );

            assert!(vm.computed_watcher("double").is_none());
            assert!(vm.data().observer().is_none());
            assert_eq!(vm.get("double"), Value::from(4));
            vm.set("n", Value::from(3));
            assert_eq!(vm.get("double"), Value::from(6));
        });
    }

    #[test]
    fn declared_watch_with_method_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let vm = Instance::new(
            ComponentOptions::new()
                .data_value(data(&[("a", Value::from(1))]))
                .method("onA", move |_: &Instance, args: &[Value]| {
                    sink.lock().push(args.to_vec());
                    Ok(Value::Undefined)
                })
                .watch_method("a", "onA", WatcherOptions::default().sync(true))
                .watch_method("a", "missing", WatcherOptions::default()),
        );

        vm.set("a", Value::from(2));

        assert_eq!(*seen.lock(), vec![vec![Value::from(2), Value::from(1)]]);
        assert_eq!(vm.watchers().len(), 1);
    }

    #[test]
    fn immediate_watch_fires_with_initial_value() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let vm = Instance::new(ComponentOptions::new().data_value(data(&[("a", Value::from(1))])));

        let unwatch = vm.watch(
            "a",
            move |_: &Instance, new: &Value, old: &Value| {
                sink.lock().push((new.clone(), old.clone()));
                Ok(())
            },
            WatcherOptions::default().immediate(true).sync(true),
        );
        vm.set("a", Value::from(2));
        unwatch();
        vm.set("a", Value::from(3));

        assert_eq!(
            *seen.lock(),
            vec![
                (Value::from(1), Value::Undefined),
                (Value::from(2), Value::from(1)),
            ]
        );
        assert!(vm.watchers().is_empty());
    }
}
