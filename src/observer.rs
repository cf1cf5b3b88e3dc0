//! Observation: turning plain containers into dependency-backed state.
//!
//! An [`Observer`] is attached once to every object or array that enters
//! reactive state. For objects, every own property is converted into a
//! reactive cell with its own [`Dep`]; the observer's own dep covers
//! structural changes (keys added with [`set`] or removed with [`del`], array
//! mutations).

use crate::config::config;
use crate::dep::Dep;
use crate::error::{ReactiveError, warn};
use crate::value::{Array, Object, Value};
use crate::arena::active_watcher;
use parking_lot::Mutex;
use std::cell::Cell;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Hook invoked before a reactive property accepts a new value.
pub type CustomSetter = Arc<dyn Fn() + Send + Sync>;

thread_local! {
    static SHOULD_OBSERVE: Cell<bool> = const { Cell::new(true) };
}

/// Enable or disable creation of new observers. Returns the previous state.
///
/// Already-observed values keep their observer either way.
pub fn toggle_observing(value: bool) -> bool {
    SHOULD_OBSERVE.with(|flag| flag.replace(value))
}

fn should_observe() -> bool {
    SHOULD_OBSERVE.with(Cell::get)
}

/// Scoped [`toggle_observing`]: restores the previous state on drop.
pub(crate) struct ObservingScope {
    previous: bool,
}

impl ObservingScope {
    pub(crate) fn set(value: bool) -> Self {
        Self {
            previous: toggle_observing(value),
        }
    }
}

impl Drop for ObservingScope {
    fn drop(&mut self) {
        toggle_observing(self.previous);
    }
}

/// Marker attached to an observed object or array.
#[derive(Debug)]
pub struct Observer {
    dep: Dep,
    vm_count: AtomicUsize,
}

impl Observer {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            dep: Dep::new(),
            vm_count: AtomicUsize::new(0),
        })
    }

    /// The structural dependency of the observed container.
    pub fn dep(&self) -> &Dep {
        &self.dep
    }

    /// Number of instances using the observed value as root data.
    pub fn vm_count(&self) -> usize {
        self.vm_count.load(Ordering::Acquire)
    }

    pub(crate) fn release_root(&self) {
        let _ = self
            .vm_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1));
    }
}

/// Attach an observer to `value`, or return the one it already has.
///
/// Primitives, raw containers and (while observation is toggled off or in
/// server-rendering mode) not-yet-observed containers yield `None`. With
/// `as_root` the observer's root-data count is incremented.
pub fn observe(value: &Value, as_root: bool) -> Option<Arc<Observer>> {
    let observer = match value {
        Value::Object(object) => object.observer().or_else(|| {
            (can_observe() && !object.is_raw()).then(|| observe_object(object))
        }),
        Value::Array(array) => array
            .observer()
            .or_else(|| (can_observe() && !array.is_raw()).then(|| observe_array(array))),
        _ => return None,
    };
    if as_root && let Some(observer) = &observer {
        observer.vm_count.fetch_add(1, Ordering::AcqRel);
    }
    observer
}

fn can_observe() -> bool {
    should_observe() && !config().server_rendering
}

fn observe_object(object: &Object) -> Arc<Observer> {
    // The marker goes on before the walk so cycles terminate
    let observer = object.attach_observer(Observer::new());
    for (key, value) in object.entries() {
        define_reactive(object, &key, value, None, false);
    }
    observer
}

fn observe_array(array: &Array) -> Arc<Observer> {
    let observer = array.attach_observer(Observer::new());
    observe_items(&array.to_vec());
    observer
}

/// Observe every element of a list (newly inserted array items).
pub(crate) fn observe_items(items: &[Value]) {
    for item in items {
        observe(item, false);
    }
}

/// Reactive state of one property: its dep, the child observer of the
/// current value and the write policy.
pub(crate) struct ReactiveCell {
    dep: Dep,
    child: Mutex<Option<Arc<Observer>>>,
    custom_setter: Option<CustomSetter>,
    shallow: bool,
}

impl ReactiveCell {
    pub(crate) fn dep(&self) -> &Dep {
        &self.dep
    }

    /// Read interception.
    pub(crate) fn track(&self, value: &Value) {
        if active_watcher().is_none() {
            return;
        }
        self.dep.depend();
        let child = self.child.lock().clone();
        if let Some(child) = child {
            child.dep.depend();
            if let Value::Array(array) = value {
                depend_array(array);
            }
        }
    }

    /// Write interception.
    pub(crate) fn assign(&self, object: &Object, key: &str, value: Value) {
        if object.peek(key).same_value(&value) {
            cov_mark::hit!(equal_write_suppressed);
            return;
        }
        if let Some(setter) = &self.custom_setter {
            setter();
        }
        object.write_value(key, value.clone());
        let child = if self.shallow {
            None
        } else {
            observe(&value, false)
        };
        *self.child.lock() = child;
        self.dep.notify();
    }
}

/// Make `object[key]` a reactive property holding `value`.
///
/// Unless `shallow`, the value is observed and reads also subscribe to its
/// observer's dep. `custom_setter` runs before every accepted write.
pub fn define_reactive(
    object: &Object,
    key: &str,
    value: Value,
    custom_setter: Option<CustomSetter>,
    shallow: bool,
) {
    let child = if shallow {
        None
    } else {
        observe(&value, false)
    };
    let cell = Arc::new(ReactiveCell {
        dep: Dep::new(),
        child: Mutex::new(child),
        custom_setter,
        shallow,
    });
    object.define_property(key, value, cell);
}

/// Subscribe the active watcher to every observed element of `array`,
/// recursing into nested arrays.
///
/// Array elements are not reactive properties, so a read of an array held by
/// a reactive property has to collect its elements' structural deps here.
pub fn depend_array(array: &Array) {
    for item in array.to_vec() {
        if let Some(observer) = item.observer() {
            observer.dep.depend();
        }
        if let Value::Array(nested) = &item {
            depend_array(nested);
        }
    }
}

/// Largest array index: array lengths never exceed `u32::MAX`.
const MAX_ARRAY_INDEX: usize = u32::MAX as usize - 1;

fn array_index(key: &str) -> Option<usize> {
    key.parse::<usize>().ok().filter(|index| *index <= MAX_ARRAY_INDEX)
}

/// Add a property (or array element) after observation and notify.
///
/// Existing keys are plain writes. New keys on an observed object become
/// reactive and notify the object's structural dep. Returns `value`.
pub fn set(target: &Value, key: &str, value: Value) -> Value {
    match target {
        Value::Array(array) => {
            let Some(len) = array_index(key).and_then(|index| index.checked_add(1)) else {
                warn(ReactiveError::InvalidArrayIndex(key.to_owned()), None);
                return value;
            };
            if !array.resize(len) {
                warn(ReactiveError::InvalidArrayIndex(key.to_owned()), None);
                return value;
            }
            array.splice(len - 1, 1, vec![value.clone()]);
            value
        }
        Value::Object(object) => {
            if object.has(key) {
                object.set(key, value.clone());
                return value;
            }
            let Some(observer) = object.observer() else {
                object.set(key, value.clone());
                return value;
            };
            if observer.vm_count() > 0 {
                warn(ReactiveError::AddToRootData(key.to_owned()), None);
                return value;
            }
            define_reactive(object, key, value.clone(), None, false);
            observer.dep.notify();
            value
        }
        primitive => {
            warn(ReactiveError::SetOnPrimitive(primitive.to_string()), None);
            value
        }
    }
}

/// Remove a property (or array element) and notify.
pub fn del(target: &Value, key: &str) {
    match target {
        Value::Array(array) => {
            let Some(index) = array_index(key) else {
                warn(ReactiveError::InvalidArrayIndex(key.to_owned()), None);
                return;
            };
            if index < array.len() {
                array.splice(index, 1, Vec::new());
            }
        }
        Value::Object(object) => {
            let observer = object.observer();
            if observer.as_ref().is_some_and(|observer| observer.vm_count() > 0) {
                warn(ReactiveError::DeleteFromRootData(key.to_owned()), None);
                return;
            }
            if !object.remove_property(key) {
                return;
            }
            if let Some(observer) = observer {
                observer.dep.notify();
            }
        }
        primitive => warn(ReactiveError::DeleteOnPrimitive(primitive.to_string()), None),
    }
}
