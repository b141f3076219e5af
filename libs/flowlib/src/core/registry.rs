// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Filter factory registry.
//!
//! A plugin module exposes a mapping from factory names to factory functions;
//! the core only consumes that mapping. Factories can be registered at
//! compile time via [`register_filter!`] (collected through `inventory`) or
//! at runtime via [`FilterRegistry::register`].

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::core::environment::FilterEnvironment;
use crate::core::error::{FlowError, Result};
use crate::core::filter::Filter;

/// Plain function form of a filter factory, usable in const contexts.
pub type FactoryFn = fn(&mut FilterEnvironment) -> Result<Box<dyn Filter>>;

/// Shared closure form used by the runtime.
pub type BoxedFilterFactory =
    Arc<dyn Fn(&mut FilterEnvironment) -> Result<Box<dyn Filter>> + Send + Sync>;

/// Compile-time registration record collected by `inventory`.
pub struct RegisteredFilter {
    pub name: &'static str,
    pub create: FactoryFn,
}

impl RegisteredFilter {
    pub const fn new(name: &'static str, create: FactoryFn) -> Self {
        Self { name, create }
    }
}

inventory::collect!(RegisteredFilter);

/// Register a filter factory at compile time.
///
/// ```ignore
/// fn make_passthrough(env: &mut FilterEnvironment) -> Result<Box<dyn Filter>> {
///     let output = env.add_output_port("out")?;
///     Ok(Box::new(Passthrough::new(output)))
/// }
///
/// flowlib::register_filter!("Passthrough", make_passthrough);
/// ```
#[macro_export]
macro_rules! register_filter {
    ($name:literal, $create:path) => {
        inventory::submit! {
            $crate::core::registry::RegisteredFilter::new($name, $create)
        }
    };
}

/// Name -> factory mapping.
pub struct FilterRegistry {
    factories: Mutex<HashMap<String, BoxedFilterFactory>>,
}

impl FilterRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            factories: Mutex::new(HashMap::new()),
        }
    }

    /// Registry seeded with every `register_filter!` submission linked into
    /// the binary.
    pub fn with_registered() -> Self {
        let registry = Self::new();
        {
            let mut factories = registry.factories.lock();
            for registered in inventory::iter::<RegisteredFilter> {
                let create = registered.create;
                factories.insert(
                    registered.name.to_string(),
                    Arc::new(move |env: &mut FilterEnvironment| create(env)) as BoxedFilterFactory,
                );
            }
        }
        registry
    }

    /// Register a factory under `name`. Duplicate names are rejected.
    pub fn register(&self, name: &str, factory: BoxedFilterFactory) -> Result<()> {
        let mut factories = self.factories.lock();
        if factories.contains_key(name) {
            return Err(FlowError::Configuration(format!(
                "a filter factory named '{name}' is already registered"
            )));
        }
        factories.insert(name.to_string(), factory);
        Ok(())
    }

    /// Convenience for registering a plain function.
    pub fn register_fn(&self, name: &str, create: FactoryFn) -> Result<()> {
        self.register(name, Arc::new(move |env: &mut FilterEnvironment| create(env)))
    }

    pub fn get(&self, name: &str) -> Option<BoxedFilterFactory> {
        self.factories.lock().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.lock().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.factories.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.lock().is_empty()
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::with_registered()
    }
}

static GLOBAL_REGISTRY: OnceLock<FilterRegistry> = OnceLock::new();

/// Process-wide registry, seeded from `register_filter!` submissions on first
/// access.
pub fn global_registry() -> &'static FilterRegistry {
    GLOBAL_REGISTRY.get_or_init(FilterRegistry::with_registered)
}
