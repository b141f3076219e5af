// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Process-wide services registry and logging setup.
//!
//! Services are opaque objects looked up by name. The runtime core only
//! interprets the `"Profiling"` entry (hooks around data callbacks); logging
//! goes through `tracing` directly. The registry uses a recursive mutex so a
//! service looked up from inside another service's code path cannot deadlock.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::ReentrantMutex;

/// Name under which the optional profiling service is registered.
pub const PROFILING_SERVICE: &str = "Profiling";

/// Hooks invoked around every `on_port_data_changed` dispatch.
pub trait Profiler: Send + Sync {
    fn before_port_data_changed(&self, filter: &str, port: &str);
    fn after_port_data_changed(&self, filter: &str, port: &str);
}

type ServiceObject = Arc<dyn Any + Send + Sync>;

/// String-keyed registry of opaque service objects.
pub struct Services {
    entries: ReentrantMutex<RefCell<HashMap<String, ServiceObject>>>,
}

impl Services {
    fn new() -> Self {
        Self {
            entries: ReentrantMutex::new(RefCell::new(HashMap::new())),
        }
    }

    /// Register (or replace) a service under `name`.
    pub fn register(&self, name: &str, service: ServiceObject) {
        let entries = self.entries.lock();
        entries.borrow_mut().insert(name.to_string(), service);
    }

    pub fn get(&self, name: &str) -> Option<ServiceObject> {
        let entries = self.entries.lock();
        let found = entries.borrow().get(name).cloned();
        found
    }

    pub fn remove(&self, name: &str) -> Option<ServiceObject> {
        let entries = self.entries.lock();
        let removed = entries.borrow_mut().remove(name);
        removed
    }

    /// Drop every registered service. Call after the lifecycle has returned
    /// to `Destructed`.
    pub fn clear(&self) {
        let entries = self.entries.lock();
        entries.borrow_mut().clear();
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.lock();
        let len = entries.borrow().len();
        len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

static SERVICES: OnceLock<Services> = OnceLock::new();

/// The process-wide services registry.
pub fn global_services() -> &'static Services {
    SERVICES.get_or_init(Services::new)
}

/// Register the profiling service consulted by every input port.
///
/// Filters constructed afterwards pick it up; existing filters keep the
/// profiler they resolved at construction time.
pub fn register_profiler(profiler: Arc<dyn Profiler>) {
    global_services().register(PROFILING_SERVICE, Arc::new(profiler));
}

pub(crate) fn profiler() -> Option<Arc<dyn Profiler>> {
    let service = global_services().get(PROFILING_SERVICE)?;
    service.downcast_ref::<Arc<dyn Profiler>>().cloned()
}

/// Install the default `tracing` subscriber (fmt, `RUST_LOG`-filtered,
/// "info" fallback). Safe to call more than once.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProfiler {
        before: AtomicUsize,
        after: AtomicUsize,
    }

    impl Profiler for CountingProfiler {
        fn before_port_data_changed(&self, _filter: &str, _port: &str) {
            self.before.fetch_add(1, Ordering::SeqCst);
        }
        fn after_port_data_changed(&self, _filter: &str, _port: &str) {
            self.after.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let services = Services::new();
        services.register("answer", Arc::new(42u32));
        let service = services.get("answer").unwrap();
        assert_eq!(service.downcast_ref::<u32>(), Some(&42));
        assert!(services.get("missing").is_none());
    }

    #[test]
    fn test_remove_and_clear() {
        let services = Services::new();
        services.register("a", Arc::new(1u8));
        services.register("b", Arc::new(2u8));
        assert_eq!(services.len(), 2);
        assert!(services.remove("a").is_some());
        services.clear();
        assert!(services.is_empty());
    }

    #[test]
    fn test_profiler_roundtrip() {
        let profiler: Arc<dyn Profiler> = Arc::new(CountingProfiler {
            before: AtomicUsize::new(0),
            after: AtomicUsize::new(0),
        });
        let services = Services::new();
        services.register(PROFILING_SERVICE, Arc::new(Arc::clone(&profiler)));
        let found = services
            .get(PROFILING_SERVICE)
            .and_then(|s| s.downcast_ref::<Arc<dyn Profiler>>().cloned())
            .unwrap();
        found.before_port_data_changed("f", "p");
        found.after_port_data_changed("f", "p");
    }
}
