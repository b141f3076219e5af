// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Per-filter container.
//!
//! A `FilterEnvironment` owns exactly one filter instance together with its
//! ports, property collection and lifecycle state. Environments live on the
//! worker thread that hosts the filter and are only locked from that thread
//! (directly, or via tasks the runtime dispatches to it), so a callback in
//! one filter can never contend with its own environment.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::core::error::{FlowError, Result};
use crate::core::filter::{Filter, FilterState, LifecycleOp};
use crate::core::ports::{InputPort, OutputPort, PortAddress};
use crate::core::properties::PropertyCollection;
use crate::core::services::{self, Profiler};

static NEXT_FILTER_ID: AtomicU64 = AtomicU64::new(0);

/// Process-unique identity of a filter instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilterId(u64);

impl FilterId {
    pub(crate) fn next() -> Self {
        Self(NEXT_FILTER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for FilterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "filter#{}", self.0)
    }
}

pub struct FilterEnvironment {
    id: FilterId,
    name: String,
    thread_name: String,
    state: FilterState,
    /// Taken out while a callback runs so the callback can borrow the
    /// environment mutably.
    filter: Option<Box<dyn Filter>>,
    inputs: Vec<Arc<InputPort>>,
    outputs: Vec<Arc<OutputPort>>,
    dynamic_input_supported: bool,
    dynamic_output_supported: bool,
    properties: Arc<PropertyCollection>,
    profiler: Option<Arc<dyn Profiler>>,
    weak_self: Weak<Mutex<FilterEnvironment>>,
}

impl FilterEnvironment {
    /// Construct the environment and run the factory inside it. Must be
    /// called on the thread that will own the filter: port thread affinity is
    /// captured here.
    pub(crate) fn create<F>(
        name: &str,
        thread_name: &str,
        factory: F,
    ) -> Result<Arc<Mutex<FilterEnvironment>>>
    where
        F: FnOnce(&mut FilterEnvironment) -> Result<Box<dyn Filter>>,
    {
        let env = Arc::new(Mutex::new(FilterEnvironment {
            id: FilterId::next(),
            name: name.to_string(),
            thread_name: thread_name.to_string(),
            state: FilterState::Constructing,
            filter: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            dynamic_input_supported: false,
            dynamic_output_supported: false,
            properties: Arc::new(PropertyCollection::new()),
            profiler: services::profiler(),
            weak_self: Weak::new(),
        }));
        {
            let mut guard = env.lock();
            guard.weak_self = Arc::downgrade(&env);
            let filter = factory(&mut guard).map_err(|e| FlowError::Plugin {
                filter: name.to_string(),
                reason: e.into(),
            })?;
            guard.filter = Some(filter);
            guard.state = FilterState::Constructed;
        }
        Ok(env)
    }

    pub fn id(&self) -> FilterId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    pub fn state(&self) -> FilterState {
        self.state
    }

    pub fn properties(&self) -> &Arc<PropertyCollection> {
        &self.properties
    }

    /// Declare support for dynamic ports. Only legal while the factory runs.
    pub fn set_dynamic_port_support(&mut self, input: bool, output: bool) -> Result<()> {
        if self.state != FilterState::Constructing {
            return Err(FlowError::Invariant(format!(
                "filter '{}' can only declare dynamic port support during construction",
                self.name
            )));
        }
        self.dynamic_input_supported = input;
        self.dynamic_output_supported = output;
        Ok(())
    }

    pub fn dynamic_input_supported(&self) -> bool {
        self.dynamic_input_supported
    }

    pub fn dynamic_output_supported(&self) -> bool {
        self.dynamic_output_supported
    }

    fn ports_mutable(&self) -> bool {
        matches!(
            self.state,
            FilterState::Constructing
                | FilterState::Constructed
                | FilterState::Initializing
                | FilterState::Initialized
        )
    }

    fn check_ports_mutable(&self, what: &str) -> Result<()> {
        if !self.ports_mutable() {
            return Err(FlowError::Invariant(format!(
                "filter '{}' cannot change {} in state {}",
                self.name, what, self.state
            )));
        }
        Ok(())
    }

    pub fn add_input_port(&mut self, name: &str) -> Result<Arc<InputPort>> {
        self.add_input(name, false)
    }

    pub fn add_dynamic_input_port(&mut self, name: &str) -> Result<Arc<InputPort>> {
        if !self.dynamic_input_supported {
            return Err(FlowError::Configuration(format!(
                "filter '{}' does not support dynamic input ports",
                self.name
            )));
        }
        self.add_input(name, true)
    }

    fn add_input(&mut self, name: &str, dynamic: bool) -> Result<Arc<InputPort>> {
        self.check_ports_mutable("input ports")?;
        if self.inputs.iter().any(|p| p.name() == name) {
            return Err(FlowError::Configuration(format!(
                "filter '{}' already has an input port '{}'",
                self.name, name
            )));
        }
        let port = Arc::new(InputPort::new(
            PortAddress::new(&self.name, name),
            dynamic,
            self.id,
            self.weak_self.clone(),
        ));
        self.inputs.push(Arc::clone(&port));
        Ok(port)
    }

    pub fn add_output_port(&mut self, name: &str) -> Result<Arc<OutputPort>> {
        self.add_output(name, false)
    }

    pub fn add_dynamic_output_port(&mut self, name: &str) -> Result<Arc<OutputPort>> {
        if !self.dynamic_output_supported {
            return Err(FlowError::Configuration(format!(
                "filter '{}' does not support dynamic output ports",
                self.name
            )));
        }
        self.add_output(name, true)
    }

    fn add_output(&mut self, name: &str, dynamic: bool) -> Result<Arc<OutputPort>> {
        self.check_ports_mutable("output ports")?;
        if self.outputs.iter().any(|p| p.name() == name) {
            return Err(FlowError::Configuration(format!(
                "filter '{}' already has an output port '{}'",
                self.name, name
            )));
        }
        let port = Arc::new(OutputPort::new(
            PortAddress::new(&self.name, name),
            dynamic,
            self.id,
            self.weak_self.clone(),
        ));
        self.outputs.push(Arc::clone(&port));
        Ok(port)
    }

    pub fn remove_input_port(&mut self, name: &str) -> Result<()> {
        self.check_ports_mutable("input ports")?;
        let before = self.inputs.len();
        self.inputs.retain(|p| p.name() != name);
        if self.inputs.len() == before {
            return Err(FlowError::Configuration(format!(
                "filter '{}' has no input port '{}'",
                self.name, name
            )));
        }
        Ok(())
    }

    pub fn remove_output_port(&mut self, name: &str) -> Result<()> {
        self.check_ports_mutable("output ports")?;
        let before = self.outputs.len();
        self.outputs.retain(|p| p.name() != name);
        if self.outputs.len() == before {
            return Err(FlowError::Configuration(format!(
                "filter '{}' has no output port '{}'",
                self.name, name
            )));
        }
        Ok(())
    }

    /// Switch an input port between static and dynamic inter-thread queue
    /// mode. Only legal before the filter is opened.
    pub fn set_interthread_dynamic_queue(&mut self, port_name: &str, enabled: bool) -> Result<()> {
        self.check_ports_mutable("queue modes")?;
        let port = self.input(port_name).ok_or_else(|| {
            FlowError::Configuration(format!(
                "filter '{}' has no input port '{}'",
                self.name, port_name
            ))
        })?;
        port.set_dynamic_queue(enabled);
        Ok(())
    }

    pub fn input(&self, name: &str) -> Option<Arc<InputPort>> {
        self.inputs.iter().find(|p| p.name() == name).cloned()
    }

    pub fn output(&self, name: &str) -> Option<Arc<OutputPort>> {
        self.outputs.iter().find(|p| p.name() == name).cloned()
    }

    pub fn inputs(&self) -> &[Arc<InputPort>] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Arc<OutputPort>] {
        &self.outputs
    }

    pub(crate) fn set_state(&mut self, state: FilterState) {
        self.state = state;
    }

    pub(crate) fn take_filter(&mut self) -> Option<Box<dyn Filter>> {
        self.filter.take()
    }

    pub(crate) fn restore_filter(&mut self, filter: Box<dyn Filter>) {
        self.filter = Some(filter);
    }

    pub(crate) fn profiler(&self) -> Option<&Arc<dyn Profiler>> {
        self.profiler.as_ref()
    }
}

/// Drive one lifecycle transition of a single filter.
///
/// Runs on the filter's owning thread. Forward failures leave the filter in
/// its pre-transition state and surface a `Plugin` error; reverse failures
/// are logged and the transition still completes so teardown always makes
/// progress. Reverse transitions silently skip filters that never reached the
/// source state (that is how a partially built pipeline unwinds).
pub(crate) fn perform_transition(
    env: &Arc<Mutex<FilterEnvironment>>,
    op: LifecycleOp,
) -> Result<()> {
    let mut guard = env.lock();
    if guard.state != op.source_state() {
        if op.is_forward() {
            return Err(FlowError::Invariant(format!(
                "filter '{}' cannot perform {} from state {}",
                guard.name, op, guard.state
            )));
        }
        tracing::debug!(
            "skipping {} for filter '{}' in state {}",
            op,
            guard.name,
            guard.state
        );
        return Ok(());
    }
    guard.state = op.transitional_state();
    let Some(mut filter) = guard.filter.take() else {
        guard.state = op.source_state();
        return Err(FlowError::Invariant(format!(
            "filter '{}' is missing its instance during {}",
            guard.name, op
        )));
    };
    let result = match op {
        LifecycleOp::Init => filter.on_init(&mut guard),
        LifecycleOp::Open => filter.on_open(&mut guard),
        LifecycleOp::Start => filter.on_start(&mut guard),
        LifecycleOp::Stop => filter.on_stop(&mut guard),
        LifecycleOp::Close => filter.on_close(&mut guard),
        LifecycleOp::Deinit => filter.on_deinit(&mut guard),
    };
    guard.filter = Some(filter);
    match result {
        Ok(()) => {
            guard.state = op.target_state();
            Ok(())
        }
        Err(e) if op.is_forward() => {
            guard.state = op.source_state();
            let name = guard.name.clone();
            Err(FlowError::Plugin {
                filter: name,
                reason: e.into(),
            })
        }
        Err(e) => {
            tracing::error!(
                "filter '{}' failed in {}: {} (continuing teardown)",
                guard.name,
                op,
                e
            );
            guard.state = op.target_state();
            Ok(())
        }
    }
}

/// Destroy the filter instance on its owning thread.
pub(crate) fn destruct(env: &Arc<Mutex<FilterEnvironment>>) {
    let mut guard = env.lock();
    guard.state = FilterState::Destructing;
    for output in &guard.outputs {
        output.detach_connections();
    }
    let filter = guard.filter.take();
    drop(filter);
    guard.state = FilterState::Destructed;
}
