// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The pipeline runtime.
//!
//! `FlowRuntime` owns the thread pool, the hosted filters and the wired
//! connections, and exposes the lifecycle entry points (see `lifecycle.rs`).
//! Filters are constructed on their owning thread; every interaction with a
//! filter instance goes through a task dispatched to that thread.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::connection::Connection;
use crate::core::environment::{FilterEnvironment, FilterId};
use crate::core::error::{FlowError, Result};
use crate::core::executor::Executor;
use crate::core::filter::{Filter, FilterState};
use crate::core::graph::{
    self, ApplicationConfig, ConnectionConfig, NodeConfig, Topology, is_valid_identifier,
};
use crate::core::properties::PropertyValue;
use crate::core::registry::FilterRegistry;
use crate::core::thread_pool::ThreadPool;

/// Coarse position of the whole pipeline in the lifecycle. Guards which
/// runtime operations are legal; the authoritative per-filter state lives in
/// each `FilterEnvironment`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimePhase {
    Constructed,
    Initialized,
    Opened,
    Active,
}

/// Runtime status snapshot
#[derive(Debug, Clone)]
pub struct RuntimeStatus {
    pub phase: RuntimePhase,
    pub filter_count: usize,
    pub connection_count: usize,
    /// Per-filter lifecycle state
    pub filter_states: HashMap<String, FilterState>,
}

/// Runtime record of one hosted filter.
pub(crate) struct FilterHost {
    pub(crate) name: String,
    pub(crate) thread: String,
    pub(crate) id: FilterId,
    pub(crate) env: Arc<Mutex<FilterEnvironment>>,
    pub(crate) executor: Arc<Executor>,
}

pub struct FlowRuntime {
    pub(crate) pool: ThreadPool,
    pub(crate) filters: Vec<FilterHost>,
    pub(crate) by_name: HashMap<String, usize>,
    pub(crate) pending_connections: Vec<ConnectionConfig>,
    pub(crate) connections: Vec<Arc<Connection>>,
    pub(crate) phase: RuntimePhase,
}

impl FlowRuntime {
    pub fn new() -> Self {
        Self {
            pool: ThreadPool::new(),
            filters: Vec::new(),
            by_name: HashMap::new(),
            pending_connections: Vec::new(),
            connections: Vec::new(),
            phase: RuntimePhase::Constructed,
        }
    }

    /// Host a filter named `name` on the worker thread `thread` (spawned on
    /// first use). The factory runs on that thread and creates the filter's
    /// static ports.
    pub fn add_filter<F>(&mut self, name: &str, thread: &str, factory: F) -> Result<()>
    where
        F: FnOnce(&mut FilterEnvironment) -> Result<Box<dyn Filter>> + Send + 'static,
    {
        if self.phase != RuntimePhase::Constructed {
            return Err(FlowError::Configuration(format!(
                "cannot add filters in phase {:?} (must be Constructed)",
                self.phase
            )));
        }
        if !is_valid_identifier(name) {
            return Err(FlowError::Configuration(format!(
                "'{name}' is not a valid filter name"
            )));
        }
        if !is_valid_identifier(thread) {
            return Err(FlowError::Configuration(format!(
                "'{thread}' is not a valid thread name"
            )));
        }
        if self.by_name.contains_key(name) {
            return Err(FlowError::Configuration(format!(
                "a filter named '{name}' already exists"
            )));
        }
        let (env, executor) = {
            let handle = self.pool.get_or_spawn(thread)?;
            let executor = handle.executor();
            let filter_name = name.to_string();
            let env = handle.run(
                move |worker| -> Result<Arc<Mutex<FilterEnvironment>>> {
                    let env = FilterEnvironment::create(&filter_name, worker.name(), factory)?;
                    worker.register_environment(Arc::clone(&env));
                    Ok(env)
                },
            )??;
            (env, executor)
        };
        let id = env.lock().id();
        self.by_name.insert(name.to_string(), self.filters.len());
        self.filters.push(FilterHost {
            name: name.to_string(),
            thread: thread.to_string(),
            id,
            env,
            executor,
        });
        tracing::debug!("added filter '{}' on thread '{}'", name, thread);
        Ok(())
    }

    /// Queue a connection given as `from.port -> to.port` (width in the
    /// arrow, see [`graph::parse_connection`]). Edges are wired when the
    /// pipeline opens.
    pub fn connect(&mut self, link: &str) -> Result<()> {
        let config = graph::parse_connection(link)?;
        self.connect_config(config)
    }

    /// Queue a connection between two `filter.port` endpoints with an
    /// explicit width (0 = unbounded).
    pub fn connect_with_width(&mut self, from: &str, to: &str, width: usize) -> Result<()> {
        let config = graph::parse_connection(&format!("{from} -{width}> {to}"))?;
        self.connect_config(config)
    }

    pub(crate) fn connect_config(&mut self, config: ConnectionConfig) -> Result<()> {
        if !matches!(
            self.phase,
            RuntimePhase::Constructed | RuntimePhase::Initialized
        ) {
            return Err(FlowError::Configuration(format!(
                "cannot add connections in phase {:?}",
                self.phase
            )));
        }
        self.host(&config.from_filter)?;
        self.host(&config.to_filter)?;
        let duplicate = self.pending_connections.iter().any(|c| {
            c.from_filter == config.from_filter
                && c.from_port == config.from_port
                && c.to_filter == config.to_filter
                && c.to_port == config.to_port
        });
        if duplicate {
            return Err(FlowError::Configuration(format!(
                "duplicate connection '{config}'"
            )));
        }
        self.pending_connections.push(config);
        Ok(())
    }

    /// Build a runtime from one application of a graph document, resolving
    /// factories through `registry`.
    pub fn from_application(app: &ApplicationConfig, registry: &FilterRegistry) -> Result<Self> {
        let topology = Topology::from_application(app)?;
        let mut runtime = Self::new();
        for node in topology.nodes() {
            let factory = registry.get(&node.factory_function).ok_or_else(|| {
                FlowError::Configuration(format!(
                    "no registered factory '{}' (library '{}') for filter '{}'",
                    node.factory_function, node.library, node.name
                ))
            })?;
            runtime.add_filter(&node.name, &node.thread, move |env| factory(env))?;
            runtime.configure_node(node)?;
        }
        for connection in topology.connections() {
            runtime.connect_config(connection.clone())?;
        }
        tracing::info!(
            "application '{}' loaded: {} filters, {} connections",
            app.name,
            runtime.filters.len(),
            runtime.pending_connections.len()
        );
        Ok(runtime)
    }

    /// Apply a node's document configuration on its owning thread: verify
    /// declared static ports, create dynamic ports, assign properties.
    fn configure_node(&self, node: &NodeConfig) -> Result<()> {
        let host = self.host(&node.name)?;
        let env = Arc::clone(&host.env);
        let node = node.clone();
        let handle = self
            .pool
            .get(&host.thread)
            .ok_or_else(|| FlowError::ThreadUnavailable(host.thread.clone()))?;
        handle.run(move |_worker| -> Result<()> {
            let mut guard = env.lock();
            for port in &node.static_input_ports {
                if guard.input(port).is_none() {
                    return Err(FlowError::Configuration(format!(
                        "filter '{}' does not provide declared static input port '{}'",
                        node.name, port
                    )));
                }
            }
            for port in &node.static_output_ports {
                if guard.output(port).is_none() {
                    return Err(FlowError::Configuration(format!(
                        "filter '{}' does not provide declared static output port '{}'",
                        node.name, port
                    )));
                }
            }
            for port in &node.dynamic_input_ports {
                guard.add_dynamic_input_port(port)?;
            }
            for port in &node.dynamic_output_ports {
                guard.add_dynamic_output_port(port)?;
            }
            for (key, value) in &node.properties {
                let value = PropertyValue::from_json(value.value())?;
                guard.properties().set_property(key, value)?;
            }
            Ok(())
        })?
    }

    /// Run `f` against the filter instance on its owning thread and return
    /// the result. The main escape hatch for driving sources from tests and
    /// host applications (downcast via `Filter::as_any_mut`).
    pub fn with_filter<R, F>(&self, name: &str, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut dyn Filter, &mut FilterEnvironment) -> R + Send + 'static,
    {
        let host = self.host(name)?;
        let env = Arc::clone(&host.env);
        let filter_name = host.name.clone();
        let handle = self
            .pool
            .get(&host.thread)
            .ok_or_else(|| FlowError::ThreadUnavailable(host.thread.clone()))?;
        handle.run(move |_worker| {
            let mut guard = env.lock();
            let Some(mut filter) = guard.take_filter() else {
                return Err(FlowError::Invariant(format!(
                    "filter '{filter_name}' is not available"
                )));
            };
            let result = f(filter.as_mut(), &mut guard);
            guard.restore_filter(filter);
            Ok(result)
        })?
    }

    pub fn phase(&self) -> RuntimePhase {
        self.phase
    }

    pub fn filter_names(&self) -> Vec<String> {
        self.filters.iter().map(|h| h.name.clone()).collect()
    }

    pub fn filter_state(&self, name: &str) -> Result<FilterState> {
        Ok(self.host(name)?.env.lock().state())
    }

    pub fn connections(&self) -> &[Arc<Connection>] {
        &self.connections
    }

    pub fn status(&self) -> RuntimeStatus {
        RuntimeStatus {
            phase: self.phase,
            filter_count: self.filters.len(),
            connection_count: self.connections.len(),
            filter_states: self
                .filters
                .iter()
                .map(|h| (h.name.clone(), h.env.lock().state()))
                .collect(),
        }
    }

    pub(crate) fn host(&self, name: &str) -> Result<&FilterHost> {
        self.by_name
            .get(name)
            .map(|index| &self.filters[*index])
            .ok_or_else(|| FlowError::Configuration(format!("unknown filter '{name}'")))
    }
}

impl Default for FlowRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for FlowRuntime {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
