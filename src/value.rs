//! Dynamic values and the shared containers that hold reactive state.
//!
//! Reactive state is a tree (or graph) of [`Value`]s. Objects and arrays are
//! shared handles: cloning a `Value::Object` clones the handle, not the
//! contents, and two handles are "the same value" exactly when they point at
//! the same container.
//!
//! Every read and write of an object property goes through [`Object::get`]
//! and [`Object::set`]. For properties made reactive by
//! [`define_reactive`](crate::define_reactive) these are the interception
//! points: `get` links the active watcher to the property's dependency, `set`
//! notifies it.

use crate::observer::{Observer, ReactiveCell};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// A dynamically typed value.
#[derive(Clone, Default)]
pub enum Value {
    /// Absent value (missing property, unset prop, no-op getter result).
    #[default]
    Undefined,
    /// Explicit absence.
    Null,
    /// Boolean.
    Bool(bool),
    /// IEEE double, `NaN` included.
    Number(f64),
    /// Immutable shared string.
    String(Arc<str>),
    /// Shared object handle.
    Object(Object),
    /// Shared array handle.
    Array(Array),
}

impl Value {
    /// Strict equality: identity for containers, value equality for
    /// primitives. `NaN` is unequal to itself.
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Array(a), Value::Array(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Write-suppression equality: strict equality, plus `NaN` matching `NaN`.
    pub fn same_value(&self, other: &Value) -> bool {
        self.strict_eq(other) || (self.is_nan() && other.is_nan())
    }

    /// Whether this is a `NaN` number.
    pub fn is_nan(&self) -> bool {
        matches!(self, Value::Number(n) if n.is_nan())
    }

    /// Objects and arrays.
    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_) | Value::Array(_))
    }

    /// Whether this is `Undefined`.
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// `undefined` or `null`.
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// The number, if this is one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The boolean, if this is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The string, if this is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// The object, if this is one.
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    /// The array, if this is one.
    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(array) => Some(array),
            _ => None,
        }
    }

    /// Name of the runtime type, as used in prop type-check messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "Undefined",
            Value::Null => "Null",
            Value::Bool(_) => "Boolean",
            Value::Number(_) => "Number",
            Value::String(_) => "String",
            Value::Object(_) => "Object",
            Value::Array(_) => "Array",
        }
    }

    /// The observer attached to this value, if it is an observed container.
    pub fn observer(&self) -> Option<Arc<Observer>> {
        match self {
            Value::Object(object) => object.observer(),
            Value::Array(array) => array.observer(),
            _ => None,
        }
    }

    /// Address of the shared container, for identity-keyed bookkeeping.
    pub(crate) fn container_id(&self) -> Option<usize> {
        match self {
            Value::Object(object) => Some(Arc::as_ptr(&object.inner) as usize),
            Value::Array(array) => Some(Arc::as_ptr(&array.inner) as usize),
            _ => None,
        }
    }

    /// One step of a property path: a tracked property read on objects, an
    /// index read on arrays, `Undefined` for everything else.
    pub fn get(&self, segment: &str) -> Value {
        match self {
            Value::Object(object) => object.get(segment),
            Value::Array(array) => segment
                .parse::<usize>()
                .ok()
                .and_then(|index| array.get(index))
                .unwrap_or_default(),
            _ => Value::Undefined,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.strict_eq(other)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) if n.is_infinite() => {
                f.write_str(if *n > 0.0 { "Infinity" } else { "-Infinity" })
            }
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => f.write_str(s),
            Value::Object(_) => f.write_str("[object Object]"),
            Value::Array(_) => f.write_str("[object Array]"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{s:?}"),
            Value::Object(object) => object.fmt(f),
            Value::Array(array) => array.fmt(f),
            other => fmt::Display::fmt(other, f),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(value.into())
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Number(value.into())
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.into())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value.into())
    }
}

impl From<Object> for Value {
    fn from(value: Object) -> Self {
        Value::Object(value)
    }
}

impl From<Array> for Value {
    fn from(value: Array) -> Self {
        Value::Array(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::Array(Array::from(value))
    }
}

// ============================================================================
// Object
// ============================================================================

/// One own property of an object.
#[derive(Clone)]
pub(crate) struct Property {
    pub(crate) value: Value,
    /// Present once the property has been made reactive.
    pub(crate) cell: Option<Arc<ReactiveCell>>,
}

pub(crate) struct ObjectInner {
    properties: RwLock<IndexMap<String, Property>>,
    /// Observed marker: set once, never replaced.
    observer: OnceLock<Arc<Observer>>,
    raw: AtomicBool,
}

/// Shared, ordered string-keyed container.
#[derive(Clone)]
pub struct Object {
    inner: Arc<ObjectInner>,
}

impl Object {
    /// An empty, unobserved object.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ObjectInner {
                properties: RwLock::new(IndexMap::new()),
                observer: OnceLock::new(),
                raw: AtomicBool::new(false),
            }),
        }
    }

    /// Read a property.
    ///
    /// Reactive properties link the active watcher to their dependency (and
    /// to the child observer's dependency when the value is itself observed).
    /// Missing keys read as `Undefined`.
    pub fn get(&self, key: &str) -> Value {
        let Some(Property { value, cell }) = self.property(key) else {
            return Value::Undefined;
        };
        if let Some(cell) = cell {
            cell.track(&value);
        }
        value
    }

    /// Read a property without linking any watcher.
    pub fn peek(&self, key: &str) -> Value {
        self.property(key)
            .map(|property| property.value)
            .unwrap_or_default()
    }

    /// Write a property.
    ///
    /// Writing a reactive property runs its interception: equal writes are
    /// suppressed, the custom setter runs, the new value is observed and the
    /// dependency notifies. Writing a plain or absent key is a plain
    /// assignment; use [`set`](crate::set) to add a reactive key.
    pub fn set(&self, key: &str, value: Value) {
        let cell = self.property(key).and_then(|property| property.cell);
        match cell {
            Some(cell) => cell.assign(self, key, value),
            None => self.write_value(key, value),
        }
    }

    /// Whether `key` is present. Not tracked.
    pub fn has(&self, key: &str) -> bool {
        self.inner.properties.read().contains_key(key)
    }

    /// Own keys in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.inner.properties.read().keys().cloned().collect()
    }

    /// Number of properties.
    pub fn len(&self) -> usize {
        self.inner.properties.read().len()
    }

    /// Whether there are no properties.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` has been made reactive.
    pub fn is_reactive(&self, key: &str) -> bool {
        self.property(key)
            .is_some_and(|property| property.cell.is_some())
    }

    /// The observer attached to this object, if it has been observed.
    pub fn observer(&self) -> Option<Arc<Observer>> {
        self.inner.observer.get().cloned()
    }

    /// Exclude this object from observation.
    pub fn mark_raw(&self) -> &Self {
        self.inner.raw.store(true, Ordering::Release);
        self
    }

    /// Whether [`Object::mark_raw`] was called.
    pub fn is_raw(&self) -> bool {
        self.inner.raw.load(Ordering::Acquire)
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &Object) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn property(&self, key: &str) -> Option<Property> {
        self.inner.properties.read().get(key).cloned()
    }

    /// Snapshot of all (key, value) pairs without tracking.
    pub(crate) fn entries(&self) -> Vec<(String, Value)> {
        self.inner
            .properties
            .read()
            .iter()
            .map(|(key, property)| (key.clone(), property.value.clone()))
            .collect()
    }

    /// Store `value` under `key`, keeping any reactive cell in place.
    pub(crate) fn write_value(&self, key: &str, value: Value) {
        let mut properties = self.inner.properties.write();
        match properties.get_mut(key) {
            Some(property) => property.value = value,
            None => {
                properties.insert(key.to_owned(), Property { value, cell: None });
            }
        }
    }

    /// Install (or replace) a property together with its reactive cell.
    pub(crate) fn define_property(&self, key: &str, value: Value, cell: Arc<ReactiveCell>) {
        self.inner.properties.write().insert(
            key.to_owned(),
            Property {
                value,
                cell: Some(cell),
            },
        );
    }

    /// Remove a property, reporting whether it existed.
    pub(crate) fn remove_property(&self, key: &str) -> bool {
        self.inner.properties.write().shift_remove(key).is_some()
    }

    /// Attach the observed marker; returns the marker that won.
    pub(crate) fn attach_observer(&self, observer: Arc<Observer>) -> Arc<Observer> {
        self.inner.observer.get_or_init(|| observer).clone()
    }
}

impl Default for Object {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Object {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        let object = Object::new();
        {
            let mut properties = object.inner.properties.write();
            for (key, value) in iter {
                properties.insert(key.into(), Property { value, cell: None });
            }
        }
        object
    }
}

impl fmt::Debug for Object {
    // Shallow on purpose: observed graphs may be cyclic.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, value) in self.entries() {
            match value {
                Value::Object(_) => map.entry(&key, &format_args!("{{..}}")),
                Value::Array(_) => map.entry(&key, &format_args!("[..]")),
                other => map.entry(&key, &other),
            };
        }
        map.finish()
    }
}

// ============================================================================
// Array
// ============================================================================

pub(crate) struct ArrayInner {
    pub(crate) items: RwLock<Vec<Value>>,
    observer: OnceLock<Arc<Observer>>,
    raw: AtomicBool,
}

/// Shared, growable list.
///
/// Arrays are observed structurally: one dependency on the array's observer
/// covers every insert, removal and reorder made through the mutators in
/// [`array`](crate::array). Index reads are not tracked individually.
#[derive(Clone)]
pub struct Array {
    pub(crate) inner: Arc<ArrayInner>,
}

impl Array {
    /// An empty, unobserved array.
    pub fn new() -> Self {
        Self::from(Vec::new())
    }

    /// Number of elements. Not tracked.
    pub fn len(&self) -> usize {
        self.inner.items.read().len()
    }

    /// Whether there are no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element at `index` (untracked).
    pub fn get(&self, index: usize) -> Option<Value> {
        self.inner.items.read().get(index).cloned()
    }

    /// Snapshot of all elements (untracked).
    pub fn to_vec(&self) -> Vec<Value> {
        self.inner.items.read().clone()
    }

    /// The observer attached to this array, if it has been observed.
    pub fn observer(&self) -> Option<Arc<Observer>> {
        self.inner.observer.get().cloned()
    }

    /// Exclude this array from observation.
    pub fn mark_raw(&self) -> &Self {
        self.inner.raw.store(true, Ordering::Release);
        self
    }

    /// Whether [`Array::mark_raw`] was called.
    pub fn is_raw(&self) -> bool {
        self.inner.raw.load(Ordering::Acquire)
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &Array) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn attach_observer(&self, observer: Arc<Observer>) -> Arc<Observer> {
        self.inner.observer.get_or_init(|| observer).clone()
    }
}

impl Default for Array {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Vec<Value>> for Array {
    fn from(items: Vec<Value>) -> Self {
        Self {
            inner: Arc::new(ArrayInner {
                items: RwLock::new(items),
                observer: OnceLock::new(),
                raw: AtomicBool::new(false),
            }),
        }
    }
}

impl FromIterator<Value> for Array {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self::from(iter.into_iter().collect::<Vec<_>>())
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for value in self.to_vec() {
            match value {
                Value::Object(_) => list.entry(&format_args!("{{..}}")),
                Value::Array(_) => list.entry(&format_args!("[..]")),
                other => list.entry(&other),
            };
        }
        list.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_equality_is_identity_for_containers() {
        let a = Object::new();
        let b = Object::new();

        assert!(Value::from(a.clone()).strict_eq(&Value::from(a.clone())));
        assert!(!Value::from(a).strict_eq(&Value::from(b)));
        assert!(Value::from("x").strict_eq(&Value::from("x")));
    }

    #[test]
    fn nan_only_matches_itself_for_write_suppression() {
        let nan = Value::from(f64::NAN);

        assert!(!nan.strict_eq(&nan));
        assert!(nan.same_value(&Value::from(f64::NAN)));
        assert!(!nan.same_value(&Value::from(0.0)));
    }

    #[test]
    fn plain_object_reads_and_writes() {
        let object: Object = [("a", Value::from(1))].into_iter().collect();

        assert_eq!(object.get("a"), Value::from(1));
        assert!(object.get("missing").is_undefined());

        object.set("b", Value::from(true));
        assert_eq!(object.keys(), vec!["a".to_owned(), "b".to_owned()]);
        assert!(!object.is_reactive("b"));
    }

    #[test]
    fn path_segments_index_into_arrays() {
        let array = Value::from(vec![Value::from("zero"), Value::from("one")]);

        assert_eq!(array.get("1"), Value::from("one"));
        assert!(array.get("7").is_undefined());
        assert!(array.get("x").is_undefined());
        assert!(Value::from(3).get("a").is_undefined());
    }

    #[test]
    fn display_follows_script_conventions() {
        assert_eq!(Value::from(5).to_string(), "5");
        assert_eq!(Value::from(1.5).to_string(), "1.5");
        assert_eq!(Value::from(f64::INFINITY).to_string(), "Infinity");
        assert_eq!(Value::Undefined.to_string(), "undefined");
    }
}
