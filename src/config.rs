//! Per-thread runtime configuration.
//!
//! The engine is thread-confined: every thread that hosts reactive state has
//! its own configuration, scheduler queue and tracking stack.

use crate::error::{ErrorSink, TracingSink};
use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

/// Host hook invoked when the first watcher of a flush cycle is queued.
pub type FlushHook = Arc<dyn Fn() + Send + Sync>;

/// Runtime switches. Cheap to clone.
#[derive(Clone)]
pub struct Config {
    /// Suppress warnings (faults are still reported).
    pub silent: bool,
    /// Defer queued watchers until [`flush_watchers`](crate::flush_watchers).
    /// When false the queue flushes as soon as a watcher is queued.
    pub async_flush: bool,
    /// Server-rendering mode: no observers, computed properties are plain
    /// getter invokers.
    pub server_rendering: bool,
    /// Where warnings and faults go. Defaults to [`TracingSink`].
    pub error_sink: Arc<dyn ErrorSink>,
    /// Called once per flush cycle when the first watcher is queued. The host
    /// is expected to call `flush_watchers` on its next tick.
    pub on_flush_scheduled: Option<FlushHook>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            silent: false,
            async_flush: true,
            server_rendering: false,
            error_sink: Arc::new(TracingSink),
            on_flush_scheduled: None,
        }
    }
}

impl Config {
    /// Set [`Config::silent`].
    pub fn with_silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    /// Set [`Config::async_flush`].
    pub fn with_async_flush(mut self, async_flush: bool) -> Self {
        self.async_flush = async_flush;
        self
    }

    /// Set [`Config::server_rendering`].
    pub fn with_server_rendering(mut self, server_rendering: bool) -> Self {
        self.server_rendering = server_rendering;
        self
    }

    /// Route reports to `sink`.
    pub fn with_error_sink(mut self, sink: impl ErrorSink + 'static) -> Self {
        self.error_sink = Arc::new(sink);
        self
    }

    /// Install the host flush hook.
    pub fn with_flush_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_flush_scheduled = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("silent", &self.silent)
            .field("async_flush", &self.async_flush)
            .field("server_rendering", &self.server_rendering)
            .field("on_flush_scheduled", &self.on_flush_scheduled.is_some())
            .finish_non_exhaustive()
    }
}

thread_local! {
    static CONFIG: RefCell<Config> = RefCell::new(Config::default());
}

/// Snapshot of the current thread's configuration.
pub fn config() -> Config {
    CONFIG.with(|config| config.borrow().clone())
}

/// Replace the current thread's configuration, returning the previous one.
pub fn set_config(config: Config) -> Config {
    CONFIG.with(|current| current.replace(config))
}

/// Run `f` under `config`, restoring the previous configuration afterwards
/// (also when `f` panics).
pub fn with_config<R>(config: Config, f: impl FnOnce() -> R) -> R {
    struct Restore(Option<Config>);

    impl Drop for Restore {
        fn drop(&mut self) {
            if let Some(previous) = self.0.take() {
                set_config(previous);
            }
        }
    }

    let _restore = Restore(Some(set_config(config)));
    f()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoped_configuration_is_restored() {
        assert!(!config().silent);

        with_config(Config::default().with_silent(true), || {
            assert!(config().silent);
        });

        assert!(!config().silent);
    }

    #[test]
    fn restored_after_panic() {
        let result = std::panic::catch_unwind(|| {
            with_config(Config::default().with_async_flush(false), || panic!("test panic"))
        });

        assert!(result.is_err());
        assert!(config().async_flush);
    }
}
