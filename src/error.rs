//! Warning and fault reporting.
//!
//! Nothing in the engine returns an error to its caller. Validation
//! problems are reported through [`warn`], user-code faults through
//! [`handle_error`], and execution continues with a safe fallback. Both end
//! in the [`ErrorSink`] configured on the current thread.

use crate::arena::TargetGuard;
use crate::config::config;
use crate::instance::Instance;
use thiserror::Error;

/// Every warning and fault the engine reports.
#[derive(Debug, Error)]
pub enum ReactiveError {
    /// User code (getter, callback, method, hook, factory) failed.
    #[error("Error in {info}: {source}")]
    Handler {
        /// Failing context.
        info: String,
        /// The user error.
        #[source]
        source: anyhow::Error,
    },

    /// `set` on a primitive target.
    #[error("Cannot set reactive property on undefined, null, or primitive value: {0}")]
    SetOnPrimitive(String),
    /// `del` on a primitive target.
    #[error("Cannot delete reactive property on undefined, null, or primitive value: {0}")]
    DeleteOnPrimitive(String),
    /// Array key that is not an index below the array size limit.
    #[error("\"{0}\" is not a valid array index")]
    InvalidArrayIndex(String),
    /// `set` adding a key to an instance's root data.
    #[error(
        "Avoid adding reactive properties to an instance or its root $data at runtime - declare \"{0}\" upfront in the data option."
    )]
    AddToRootData(String),
    /// `del` removing a key from an instance's root data.
    #[error("Avoid deleting properties on an instance or its root $data - just set \"{0}\" to null.")]
    DeleteFromRootData(String),

    /// Watch expression that is not a dot-delimited path.
    #[error(
        "Failed watching path: \"{0}\" Watcher only accepts simple dot-delimited paths. For full control, use a function instead."
    )]
    InvalidWatchPath(String),
    /// A watcher re-queued itself too often in one flush.
    #[error("You may have an infinite update loop in watcher with expression \"{0}\"")]
    InfiniteUpdateLoop(String),
    /// A render watcher re-queued itself too often in one flush.
    #[error("You may have an infinite update loop in a component render function.")]
    InfiniteRenderLoop,

    /// `data` did not produce an object.
    #[error("data functions should return an object")]
    DataNotObject,
    /// Data key already declared as a prop.
    #[error("The data property \"{0}\" is already declared as a prop. Use prop default value instead.")]
    DataCollidesWithProp(String),
    /// Data key already declared as a method.
    #[error("Method \"{0}\" has already been defined as a data property.")]
    DataCollidesWithMethod(String),
    /// Method name already declared as a prop.
    #[error("Method \"{0}\" has already been defined as a prop.")]
    MethodCollidesWithProp(String),
    /// Method name reserved by the instance.
    #[error(
        "Method \"{0}\" conflicts with an existing instance method. Avoid defining component methods that start with _ or $."
    )]
    MethodConflictsWithInstance(String),
    /// Method name that is not bound on the instance.
    #[error("Method \"{0}\" is not defined on the instance.")]
    UnknownMethod(String),
    /// Computed declaration without a getter.
    #[error("Getter is missing for computed property \"{0}\".")]
    MissingComputedGetter(String),
    /// Computed name already declared in data.
    #[error("The computed property \"{0}\" is already defined in data.")]
    ComputedCollidesWithData(String),
    /// Computed name already declared as a prop.
    #[error("The computed property \"{0}\" is already defined as a prop.")]
    ComputedCollidesWithProp(String),
    /// Computed name already declared as a method.
    #[error("The computed property \"{0}\" is already defined as a method.")]
    ComputedCollidesWithMethod(String),
    /// Assignment to a computed property without setter.
    #[error("Computed property \"{0}\" was assigned to but it has no setter.")]
    ComputedWithoutSetter(String),

    /// Prop named after a reserved attribute.
    #[error("\"{0}\" is a reserved attribute and cannot be used as component prop.")]
    ReservedProp(String),
    /// Prop written from inside the child.
    #[error(
        "Avoid mutating a prop directly since the value will be overwritten whenever the parent component re-renders. Instead, use a data or computed property based on the prop's value. Prop being mutated: \"{0}\""
    )]
    PropMutation(String),
    /// Required prop not passed.
    #[error("Missing required prop: \"{0}\"")]
    MissingRequiredProp(String),
    /// Prop value of an undeclared type.
    #[error("Invalid prop: type check failed for prop \"{name}\". {detail}")]
    InvalidPropType {
        /// Prop name.
        name: String,
        /// Expected and received types.
        detail: String,
    },
    /// Prop value rejected by its validator.
    #[error("Invalid prop: custom validator check failed for prop \"{0}\".")]
    PropValidatorFailed(String),
    /// Object or array literal as prop default.
    #[error(
        "Invalid default value for prop \"{0}\": Props with type Object/Array must use a factory function to return the default value."
    )]
    LiteralObjectDefault(String),

    /// Attempt to replace `$data`.
    #[error("Avoid replacing instance root $data. Use nested data properties instead.")]
    ReplaceRootData,
    /// Attempt to replace `$props`.
    #[error("$props is readonly.")]
    PropsReadonly,
}

impl ReactiveError {
    /// Whether this report is a user-code fault rather than a warning.
    pub fn is_fault(&self) -> bool {
        matches!(self, ReactiveError::Handler { .. })
    }
}

/// Destination of every warning and fault.
///
/// `info` is the component trace for warnings and the failing context
/// (`getter for watcher "a.b"`, `created hook`, ...) for faults.
/// Implementations must not panic.
pub trait ErrorSink: Send + Sync {
    /// Deliver one report.
    fn report(&self, error: &ReactiveError, vm: Option<&Instance>, info: &str);
}

impl<F> ErrorSink for F
where
    F: Fn(&ReactiveError, Option<&Instance>, &str) + Send + Sync,
{
    fn report(&self, error: &ReactiveError, vm: Option<&Instance>, info: &str) {
        self(error, vm, info)
    }
}

/// Default sink: warnings and faults become `tracing` events.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn report(&self, error: &ReactiveError, vm: Option<&Instance>, info: &str) {
        let component = vm.map(Instance::display_name).unwrap_or_default();
        if error.is_fault() {
            tracing::error!(%component, info, "{error}");
        } else {
            tracing::warn!(%component, info, "{error}");
        }
    }
}

/// Report a warning, unless the current configuration is silent.
pub fn warn(warning: ReactiveError, vm: Option<&Instance>) {
    let config = config();
    if config.silent {
        return;
    }
    let trace = vm.map(component_trace).unwrap_or_default();
    config.error_sink.report(&warning, vm, &trace);
}

/// `found in <Child> < <Parent> < <Root>`
pub fn component_trace(vm: &Instance) -> String {
    let mut chain = vec![vm.display_name()];
    let mut current = vm.parent();
    while let Some(parent) = current {
        chain.push(parent.display_name());
        current = parent.parent();
    }
    format!("found in {}", chain.join(" < "))
}

/// Report a user-code fault.
///
/// Starting at `vm`'s parent, every ancestor's `errorCaptured` hooks see the
/// error first. A hook returning `Ok(false)` stops propagation; a failing
/// hook is reported on its own. Whatever is not captured reaches the sink.
/// Tracking is suspended throughout.
pub fn handle_error(error: anyhow::Error, vm: Option<&Instance>, info: &str) {
    let _untracked = TargetGuard::push(None);
    if let Some(vm) = vm {
        let mut current = vm.parent();
        while let Some(ancestor) = current {
            for hook in &ancestor.options().error_captured {
                match hook(&ancestor, &error, vm, info) {
                    Ok(true) => {}
                    Ok(false) => return,
                    Err(hook_error) => {
                        global_handle_error(hook_error, Some(&ancestor), "errorCaptured hook")
                    }
                }
            }
            current = ancestor.parent();
        }
    }
    global_handle_error(error, vm, info);
}

fn global_handle_error(error: anyhow::Error, vm: Option<&Instance>, info: &str) {
    let fault = ReactiveError::Handler {
        info: info.to_owned(),
        source: error,
    };
    config().error_sink.report(&fault, vm, info);
}

/// Run user code, converting a failure into [`handle_error`].
pub fn invoke_with_error_handling<T>(
    handler: impl FnOnce() -> anyhow::Result<T>,
    vm: Option<&Instance>,
    info: &str,
) -> Option<T> {
    match handler() {
        Ok(value) => Some(value),
        Err(error) => {
            handle_error(error, vm, info);
            None
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::Recorder;
    use super::*;
    use crate::config::Config;

    #[test]
    fn silent_configuration_drops_warnings() {
        let recorder = Recorder::default();

        recorder.capture(Config::default().with_silent(true), || {
            warn(ReactiveError::DataNotObject, None);
        });

        assert!(recorder.is_empty());
    }

    #[test]
    fn faults_are_reported_even_when_silent() {
        let recorder = Recorder::default();

        let result = recorder.capture(Config::default().with_silent(true), || {
            invoke_with_error_handling(
                || -> anyhow::Result<()> { anyhow::bail!("boom") },
                None,
                "test hook",
            )
        });

        assert!(result.is_none());
        assert_eq!(recorder.messages(), vec!["Error in test hook: boom".to_owned()]);
        assert_eq!(recorder.infos(), vec!["test hook".to_owned()]);
    }
}
