#![deny(missing_docs)]

//! Dependency-tracking reactive state for component instances.
//!
//! Plain data handed to an instance is made observable in place: every
//! property of an observed object gets a [`Dep`], and every computation
//! that reads it (a render function, a computed property or a user watch)
//! runs inside a watcher that records what it touched. Writes notify exactly
//! the watchers that read the written property.
//!
//! # Quick Start
//!
//! ```ignore
//! use reactive_state::{ComponentOptions, Instance, Object, Value, WatcherOptions, flush_watchers};
//!
//! let data: Object = [("count", Value::from(1))].into_iter().collect();
//! let vm = Instance::new(
//!     ComponentOptions::new()
//!         .data_value(data)
//!         .computed("double", |vm| Ok(Value::from(vm.get("count").as_f64().unwrap_or(0.0) * 2.0))),
//! );
//!
//! let unwatch = vm.watch(
//!     "double",
//!     |_, new, old| {
//!         println!("{old} -> {new}");
//!         Ok(())
//!     },
//!     WatcherOptions::default(),
//! );
//!
//! vm.set("count", Value::from(3));
//! flush_watchers(); // prints "2 -> 6"
//! unwatch();
//! ```
//!
//! # Watchers
//!
//! - lazy: computed properties. A write only marks them dirty; the next
//!   read re-evaluates.
//! - sync: run right inside the write that notified them.
//! - everything else is queued and runs on [`flush_watchers`], once per
//!   cycle, in creation order.
//!
//! # Threading
//!
//! Graph metadata lives in global arenas; the current tracking target, the
//! flush queue and the [`Config`] are per thread.

// Internal modules
pub(crate) mod arena;
mod array;
mod config;
mod dep;
mod error;
mod hash;
mod instance;
mod observer;
mod options;
mod path;
mod props;
mod scheduler;
mod state;
mod traverse;
mod value;
mod watcher;

// Data model
pub use observer::{Observer, define_reactive, del, depend_array, observe, set, toggle_observing};
pub use value::{Array, Object, Value};

// Dependency tracking
pub use arena::{WatcherId, active_watcher, untracked};
pub use dep::Dep;
pub use path::parse_path;
pub use traverse::traverse;
pub use watcher::{Callback, Getter, WatchSource, Watcher, WatcherOptions};

// Scheduling
pub use scheduler::{MAX_UPDATE_COUNT, flush_watchers, is_flush_pending, queue_watcher};

// Configuration and error routing
pub use config::{Config, FlushHook, config, set_config, with_config};
pub use error::{ErrorSink, ReactiveError, TracingSink, handle_error, invoke_with_error_handling, warn};

// Component instances
pub use instance::{Instance, WeakInstance};
pub use options::{
    ComponentOptions, ComputedDecl, ComputedSetter, DataDecl, ErrorCapturedHook, Hook,
    LifecycleHook, Method, PropDefault, PropOptions, PropType, WatchDecl, WatchHandler,
};
pub use props::{hyphenate, validate_prop};
pub use state::{define_computed, init_state};
