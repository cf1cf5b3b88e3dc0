//! Prop validation: boolean casting, defaults and type assertions.
//!
//! All problems are warnings; the value is always accepted.

use crate::error::{ReactiveError, invoke_with_error_handling, warn};
use crate::instance::Instance;
use crate::observer::{ObservingScope, observe};
use crate::options::{PropDefault, PropOptions, PropType};
use crate::value::Value;
use indexmap::IndexMap;
use std::cell::Cell;

/// Attribute names that can never be props.
pub const RESERVED_ATTRIBUTES: [&str; 5] = ["key", "ref", "slot", "slot-scope", "is"];

thread_local! {
    static UPDATING_CHILD: Cell<bool> = const { Cell::new(false) };
}

/// Whether props are currently being written by a parent update.
pub(crate) fn is_updating_child() -> bool {
    UPDATING_CHILD.with(Cell::get)
}

/// Marks a parent-driven prop update for its lifetime.
pub(crate) struct UpdatingChild {
    previous: bool,
}

impl UpdatingChild {
    pub(crate) fn enter() -> Self {
        Self {
            previous: UPDATING_CHILD.with(|flag| flag.replace(true)),
        }
    }
}

impl Drop for UpdatingChild {
    fn drop(&mut self) {
        UPDATING_CHILD.with(|flag| flag.set(self.previous));
    }
}

/// `fooBar` -> `foo-bar`
pub fn hyphenate(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 2);
    for (index, c) in key.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if index > 0 {
                out.push('-');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Whether `key`, hyphenated, is one of [`RESERVED_ATTRIBUTES`].
pub fn is_reserved_attribute(key: &str) -> bool {
    RESERVED_ATTRIBUTES.contains(&hyphenate(key).as_str())
}

/// Resolve the value of prop `key` from the parent's `props_data`.
pub fn validate_prop(
    key: &str,
    prop: &PropOptions,
    props_data: &IndexMap<String, Value>,
    vm: &Instance,
) -> Value {
    let absent = !props_data.contains_key(key);
    let mut value = props_data.get(key).cloned().unwrap_or_default();

    if let Some(boolean_index) = type_index(PropType::Boolean, &prop.types) {
        if absent && prop.default.is_none() {
            value = Value::Bool(false);
        } else if value.as_str().is_some_and(|s| s.is_empty() || s == hyphenate(key)) {
            // `<c disabled>` / `<c disabled="disabled">`, unless String wins
            let string_first = type_index(PropType::String, &prop.types)
                .is_some_and(|string_index| string_index < boolean_index);
            if !string_first {
                value = Value::Bool(true);
            }
        }
    }

    if value.is_undefined() {
        value = default_value(vm, prop, key);
        // A fresh default is a new object: observe it even inside a child
        let _observing = ObservingScope::set(true);
        observe(&value, false);
    }

    assert_prop(prop, key, &value, vm, absent);
    value
}

fn type_index(ty: PropType, types: &[PropType]) -> Option<usize> {
    types.iter().position(|candidate| *candidate == ty)
}

fn default_value(vm: &Instance, prop: &PropOptions, key: &str) -> Value {
    let Some(default) = &prop.default else {
        return Value::Undefined;
    };
    if let PropDefault::Value(value) = default
        && value.is_object()
    {
        warn(ReactiveError::LiteralObjectDefault(key.to_owned()), Some(vm));
    }

    // Keep the previous default when the parent still passes nothing, so a
    // factory default does not retrigger watchers on every parent update
    if vm.props_data_entry(key).is_none_or(|raw| raw.is_undefined()) {
        let previous = vm.props().peek(key);
        if !previous.is_undefined() {
            return previous;
        }
    }

    match default {
        PropDefault::Value(value) => value.clone(),
        PropDefault::Factory(factory) => invoke_with_error_handling(
            || factory(vm),
            Some(vm),
            &format!("default value for prop \"{key}\""),
        )
        .unwrap_or_default(),
    }
}

/// Check a resolved prop value against its declaration.
pub fn assert_prop(prop: &PropOptions, name: &str, value: &Value, vm: &Instance, absent: bool) {
    if prop.required && absent {
        warn(ReactiveError::MissingRequiredProp(name.to_owned()), Some(vm));
        return;
    }
    if value.is_nullish() && !prop.required {
        return;
    }
    if !prop.types.is_empty() && !prop.types.iter().any(|ty| ty.matches(value)) {
        warn(
            ReactiveError::InvalidPropType {
                name: name.to_owned(),
                detail: invalid_type_detail(&prop.types, value),
            },
            Some(vm),
        );
        return;
    }
    if let Some(validator) = &prop.validator
        && !validator(value)
    {
        warn(ReactiveError::PropValidatorFailed(name.to_owned()), Some(vm));
    }
}

fn invalid_type_detail(expected: &[PropType], value: &Value) -> String {
    let expected_names: Vec<&str> = expected.iter().map(|ty| ty.name()).collect();
    let received = value.type_name();
    let explicable = |name: &str| matches!(name, "String" | "Number" | "Boolean");

    let mut detail = format!("Expected {}", expected_names.join(", "));
    if let [single] = expected_names.as_slice()
        && explicable(single)
        && *single != "Boolean"
        && received != "Boolean"
    {
        detail.push_str(&format!(" with value {}", styled(value, single)));
    }
    detail.push_str(&format!(", got {received}"));
    if explicable(received) {
        detail.push_str(&format!(" with value {}.", styled(value, received)));
    }
    detail
}

fn styled(value: &Value, type_name: &str) -> String {
    match (type_name, value) {
        ("String", _) => format!("\"{value}\""),
        ("Number", Value::String(s)) => {
            Value::Number(s.trim().parse().unwrap_or(f64::NAN)).to_string()
        }
        _ => value.to_string(),
    }
}
