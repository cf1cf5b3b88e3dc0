//! Merged component configuration.
//!
//! The engine consumes options that are already flattened: no mixin or
//! inheritance merging happens here. Declarations that were dynamically
//! shaped in a scripting host (function or descriptor object) are tagged
//! variants.

use crate::instance::Instance;
use crate::value::Value;
use crate::watcher::{Callback, Getter, WatcherOptions};
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

/// Lifecycle hook, or any instance callback without a value.
pub type Hook = Arc<dyn Fn(&Instance) -> anyhow::Result<()> + Send + Sync>;

/// Instance method: `(instance, arguments) -> result`.
pub type Method = Arc<dyn Fn(&Instance, &[Value]) -> anyhow::Result<Value> + Send + Sync>;

/// Setter of a computed property.
pub type ComputedSetter = Arc<dyn Fn(&Instance, Value) -> anyhow::Result<()> + Send + Sync>;

/// `errorCaptured` hook: `(instance, error, failing instance, info)`.
/// Returning `Ok(false)` stops propagation.
pub type ErrorCapturedHook =
    Arc<dyn Fn(&Instance, &anyhow::Error, &Instance, &str) -> anyhow::Result<bool> + Send + Sync>;

/// Lifecycle stages with hooks.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum LifecycleHook {
    /// Before state is initialized.
    BeforeCreate,
    /// After state is initialized.
    Created,
    /// Before the render watcher is created.
    BeforeMount,
    /// After the first render.
    Mounted,
    /// Before a queued re-render.
    BeforeUpdate,
    /// After a flush re-rendered the instance.
    Updated,
    /// Before teardown starts.
    BeforeDestroy,
    /// After teardown.
    Destroyed,
}

impl LifecycleHook {
    /// Hook name as used in diagnostics (`created hook`).
    pub fn name(self) -> &'static str {
        match self {
            LifecycleHook::BeforeCreate => "beforeCreate",
            LifecycleHook::Created => "created",
            LifecycleHook::BeforeMount => "beforeMount",
            LifecycleHook::Mounted => "mounted",
            LifecycleHook::BeforeUpdate => "beforeUpdate",
            LifecycleHook::Updated => "updated",
            LifecycleHook::BeforeDestroy => "beforeDestroy",
            LifecycleHook::Destroyed => "destroyed",
        }
    }
}

/// The `data` declaration.
#[derive(Clone)]
pub enum DataDecl {
    /// Used as is. Anything but an object warns and is replaced by `{}`.
    Value(Value),
    /// Called with the instance, tracking suspended.
    Factory(Arc<dyn Fn(&Instance) -> anyhow::Result<Value> + Send + Sync>),
}

/// A computed property declaration.
#[derive(Clone)]
pub enum ComputedDecl {
    /// Getter only, cached.
    Getter(Getter),
    /// Descriptor form.
    GetterSetter {
        /// Missing getters warn and read `Undefined`.
        get: Option<Getter>,
        /// Missing setters warn on assignment.
        set: Option<ComputedSetter>,
        /// When false the getter runs on every read.
        cache: bool,
    },
}

impl ComputedDecl {
    pub(crate) fn getter(&self) -> Option<&Getter> {
        match self {
            ComputedDecl::Getter(getter) => Some(getter),
            ComputedDecl::GetterSetter { get, .. } => get.as_ref(),
        }
    }

    pub(crate) fn setter(&self) -> Option<&ComputedSetter> {
        match self {
            ComputedDecl::Getter(_) => None,
            ComputedDecl::GetterSetter { set, .. } => set.as_ref(),
        }
    }

    pub(crate) fn cache(&self) -> bool {
        match self {
            ComputedDecl::Getter(_) => true,
            ComputedDecl::GetterSetter { cache, .. } => *cache,
        }
    }
}

/// Handler of a `watch` entry.
#[derive(Clone)]
pub enum WatchHandler {
    /// Called with `(instance, new, old)`.
    Callback(Callback),
    /// Name of an instance method, called with `[new, old]`.
    Method(String),
}

/// One registration under a `watch` key.
#[derive(Clone)]
pub struct WatchDecl {
    /// What runs on change.
    pub handler: WatchHandler,
    /// Watcher options for this registration.
    pub options: WatcherOptions,
}

/// Expected runtime type of a prop.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PropType {
    /// [`Value::String`]
    String,
    /// [`Value::Number`]
    Number,
    /// [`Value::Bool`]
    Boolean,
    /// [`Value::Object`]
    Object,
    /// [`Value::Array`]
    Array,
}

impl PropType {
    /// Type name as used in prop warnings.
    pub fn name(self) -> &'static str {
        match self {
            PropType::String => "String",
            PropType::Number => "Number",
            PropType::Boolean => "Boolean",
            PropType::Object => "Object",
            PropType::Array => "Array",
        }
    }

    pub(crate) fn matches(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (PropType::String, Value::String(_))
                | (PropType::Number, Value::Number(_))
                | (PropType::Boolean, Value::Bool(_))
                | (PropType::Object, Value::Object(_))
                | (PropType::Array, Value::Array(_))
        )
    }
}

/// Default of a prop.
#[derive(Clone)]
pub enum PropDefault {
    /// Shared literal. Objects and arrays warn: every instance would share it.
    Value(Value),
    /// Called with the instance for a fresh value.
    Factory(Arc<dyn Fn(&Instance) -> anyhow::Result<Value> + Send + Sync>),
}

/// A prop declaration.
#[derive(Clone, Default)]
pub struct PropOptions {
    /// Accepted types, in declaration order. Empty accepts anything.
    pub types: Vec<PropType>,
    /// Warn when the parent passes nothing.
    pub required: bool,
    /// Used when the parent passes nothing or `Undefined`.
    pub default: Option<PropDefault>,
    /// Extra check run after the type check.
    pub validator: Option<Arc<dyn Fn(&Value) -> bool + Send + Sync>>,
}

impl PropOptions {
    /// An untyped, optional prop.
    pub fn new() -> Self {
        Self::default()
    }

    /// A prop accepting `ty`.
    pub fn of(ty: PropType) -> Self {
        Self::new().ty(ty)
    }

    /// Accept `ty` too. Order matters for boolean casting.
    pub fn ty(mut self, ty: PropType) -> Self {
        self.types.push(ty);
        self
    }

    /// Mark the prop required.
    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    /// Literal default.
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(PropDefault::Value(value.into()));
        self
    }

    /// Default computed per instance.
    pub fn default_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&Instance) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.default = Some(PropDefault::Factory(Arc::new(factory)));
        self
    }

    /// Custom validation, warned on `false`.
    pub fn validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }
}

/// Flattened component configuration.
#[derive(Clone, Default)]
pub struct ComponentOptions {
    /// Component name, used in the component trace.
    pub name: Option<String>,
    /// Declared props, in declaration order.
    pub props: IndexMap<String, PropOptions>,
    /// Prop values passed in by the parent.
    pub props_data: IndexMap<String, Value>,
    /// Methods proxied on the instance.
    pub methods: IndexMap<String, Method>,
    /// Root data declaration.
    pub data: Option<DataDecl>,
    /// Computed properties.
    pub computed: IndexMap<String, ComputedDecl>,
    /// Watch registrations per expression.
    pub watch: IndexMap<String, Vec<WatchDecl>>,
    /// Lifecycle hooks, run in registration order.
    pub hooks: IndexMap<LifecycleHook, Vec<Hook>>,
    /// `errorCaptured` hooks.
    pub error_captured: Vec<ErrorCapturedHook>,
}

impl ComponentOptions {
    /// Empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the component name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Declare a prop.
    pub fn prop(mut self, key: impl Into<String>, options: PropOptions) -> Self {
        self.props.insert(key.into(), options);
        self
    }

    /// Pass a prop value, as a parent render would.
    pub fn prop_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props_data.insert(key.into(), value.into());
        self
    }

    /// Declare a method.
    pub fn method<F>(mut self, key: impl Into<String>, method: F) -> Self
    where
        F: Fn(&Instance, &[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.methods.insert(key.into(), Arc::new(method));
        self
    }

    /// Declare data through a factory.
    pub fn data<F>(mut self, factory: F) -> Self
    where
        F: Fn(&Instance) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.data = Some(DataDecl::Factory(Arc::new(factory)));
        self
    }

    /// Declare data as a literal. Must be an object.
    pub fn data_value(mut self, data: impl Into<Value>) -> Self {
        self.data = Some(DataDecl::Value(data.into()));
        self
    }

    /// Declare a cached computed property.
    pub fn computed<F>(mut self, key: impl Into<String>, getter: F) -> Self
    where
        F: Fn(&Instance) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.computed
            .insert(key.into(), ComputedDecl::Getter(Arc::new(getter)));
        self
    }

    /// Declare a computed property from an explicit declaration.
    pub fn computed_decl(mut self, key: impl Into<String>, decl: ComputedDecl) -> Self {
        self.computed.insert(key.into(), decl);
        self
    }

    /// Watch `key` with a callback.
    pub fn watch<F>(self, key: impl Into<String>, callback: F, options: WatcherOptions) -> Self
    where
        F: Fn(&Instance, &Value, &Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.watch_decl(
            key,
            WatchDecl {
                handler: WatchHandler::Callback(Arc::new(callback)),
                options,
            },
        )
    }

    /// Watch `key` with a named method as handler.
    pub fn watch_method(
        self,
        key: impl Into<String>,
        method: impl Into<String>,
        options: WatcherOptions,
    ) -> Self {
        self.watch_decl(
            key,
            WatchDecl {
                handler: WatchHandler::Method(method.into()),
                options,
            },
        )
    }

    /// Add a registration; repeated keys accumulate.
    pub fn watch_decl(mut self, key: impl Into<String>, decl: WatchDecl) -> Self {
        self.watch.entry(key.into()).or_default().push(decl);
        self
    }

    /// Register a lifecycle hook.
    pub fn hook<F>(mut self, hook: LifecycleHook, f: F) -> Self
    where
        F: Fn(&Instance) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.hooks.entry(hook).or_default().push(Arc::new(f));
        self
    }

    /// Register an `errorCaptured` hook.
    pub fn error_captured<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Instance, &anyhow::Error, &Instance, &str) -> anyhow::Result<bool>
            + Send
            + Sync
            + 'static,
    {
        self.error_captured.push(Arc::new(hook));
        self
    }
}

impl fmt::Debug for ComponentOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentOptions")
            .field("name", &self.name)
            .field("props", &self.props.keys().collect::<Vec<_>>())
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("computed", &self.computed.keys().collect::<Vec<_>>())
            .field("watch", &self.watch.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
