// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Input and output ports.
//!
//! Ports are the named endpoints on a filter. An output port fans a sample
//! out to its attached connections; an input port owns the bounded history
//! queue and dispatches the filter's data callback. Both sides are pinned to
//! the owning thread of their filter: emission and reception off that thread
//! fail with `FlowError::WrongThread`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::ThreadId;

use parking_lot::Mutex;

use crate::core::connection::Connection;
use crate::core::environment::{FilterEnvironment, FilterId};
use crate::core::error::{FlowError, Result};
use crate::core::filter::FilterState;
use crate::core::queue::InputQueue;
use crate::core::sample::DataSample;
use crate::core::sync::Semaphore;

static NEXT_PORT_ID: AtomicU64 = AtomicU64::new(0);

/// Printable identity of a port: filter name plus port name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortAddress {
    pub filter: String,
    pub port: String,
}

impl PortAddress {
    pub fn new(filter: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
            port: port.into(),
        }
    }
}

impl std::fmt::Display for PortAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.filter, self.port)
    }
}

/// Fields shared by both port directions.
struct PortBase {
    address: PortAddress,
    dynamic: bool,
    filter_id: FilterId,
    environment: Weak<Mutex<FilterEnvironment>>,
    owner: ThreadId,
}

impl PortBase {
    fn new(
        address: PortAddress,
        dynamic: bool,
        filter_id: FilterId,
        environment: Weak<Mutex<FilterEnvironment>>,
    ) -> Self {
        Self {
            address,
            dynamic,
            filter_id,
            environment,
            owner: std::thread::current().id(),
        }
    }

    fn assert_owning_thread(&self, operation: &str) -> Result<()> {
        if std::thread::current().id() != self.owner {
            let err = FlowError::WrongThread(format!(
                "{} on port {} called from a foreign thread",
                operation, self.address
            ));
            tracing::error!("{err}");
            return Err(err);
        }
        Ok(())
    }
}

/// Input port: bounded sample history plus the dispatch into the filter.
pub struct InputPort {
    base: PortBase,
    id: u64,
    queue: Mutex<InputQueue>,
    dynamic_queue: AtomicBool,
    /// Outstanding credits per inter-thread semaphore (dynamic queue mode).
    credits_held: Mutex<HashMap<u64, usize>>,
}

impl InputPort {
    pub(crate) fn new(
        address: PortAddress,
        dynamic: bool,
        filter_id: FilterId,
        environment: Weak<Mutex<FilterEnvironment>>,
    ) -> Self {
        Self {
            base: PortBase::new(address, dynamic, filter_id, environment),
            id: NEXT_PORT_ID.fetch_add(1, Ordering::Relaxed),
            queue: Mutex::new(InputQueue::new(1, -1.0)),
            dynamic_queue: AtomicBool::new(false),
            credits_held: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.base.address.port
    }

    pub fn address(&self) -> &PortAddress {
        &self.base.address
    }

    pub fn is_dynamic(&self) -> bool {
        self.base.dynamic
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn filter_id(&self) -> FilterId {
        self.base.filter_id
    }

    /// Configure the history bounds: a maximum sample count
    /// (non-positive = disabled) and a maximum timestamp span in seconds
    /// (non-positive = disabled). Both disabled coerces to one sample.
    pub fn set_queue_size(&self, size_samples: i64, size_seconds: f64) {
        self.queue.lock().set_sizes(size_samples, size_seconds);
    }

    pub fn queue_size(&self) -> (i64, f64) {
        self.queue.lock().sizes()
    }

    pub fn queue_length(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether inter-thread deliveries run in dynamic queue mode. Flipped via
    /// [`FilterEnvironment::set_interthread_dynamic_queue`] while the filter
    /// is not yet opened.
    pub fn is_interthread_dynamic_queue(&self) -> bool {
        self.dynamic_queue.load(Ordering::SeqCst)
    }

    pub(crate) fn set_dynamic_queue(&self, enabled: bool) {
        self.dynamic_queue.store(enabled, Ordering::SeqCst);
    }

    /// Read a retained sample. Exactly one of `delay_samples` /
    /// `delay_seconds` must be given: either the n-th newest sample, or the
    /// first sample at least that many seconds older than the newest.
    pub fn get_data(
        &self,
        delay_samples: Option<usize>,
        delay_seconds: Option<f64>,
    ) -> Result<Arc<DataSample>> {
        self.base.assert_owning_thread("get_data")?;
        match (delay_samples, delay_seconds) {
            (Some(samples), None) => self.queue.lock().get_by_delay_samples(samples),
            (None, Some(seconds)) => self.queue.lock().get_by_delay_seconds(seconds),
            _ => Err(FlowError::Configuration(
                "get_data requires exactly one of delay_samples / delay_seconds".into(),
            )),
        }
    }

    /// Same-thread delivery: queue the sample and dispatch.
    pub(crate) fn receive_sync(&self, sample: Arc<DataSample>) -> Result<()> {
        self.base.assert_owning_thread("receive_sync")?;
        self.queue.lock().push(sample);
        self.dispatch();
        Ok(())
    }

    /// Cross-thread delivery. In static queue mode the producer's credit is
    /// returned immediately, capping the edge at `width` samples in flight.
    /// In dynamic queue mode credits stay with the consumer while its queue
    /// holds samples, letting the edge burst up to queue size + width.
    pub(crate) fn receive_async(
        &self,
        sample: Arc<DataSample>,
        semaphore: Option<&Arc<Semaphore>>,
    ) -> Result<()> {
        self.base.assert_owning_thread("receive_async")?;
        let queue_len = {
            let mut queue = self.queue.lock();
            queue.push(sample);
            queue.len()
        };
        if let Some(semaphore) = semaphore {
            if !self.is_interthread_dynamic_queue() {
                semaphore.release(1);
            } else {
                let mut held = self.credits_held.lock();
                let n = held.entry(semaphore.id()).or_insert(0);
                let delta = *n as i64 - queue_len as i64;
                if delta <= 0 {
                    // queue grew (or kept pace): hand back this sample's
                    // credit plus one extra per newly retained sample
                    semaphore.release((1 - delta) as usize);
                    *n += (-delta) as usize;
                } else {
                    // queue shrank: keep this sample's credit and pull back
                    // the surplus the producer is still holding
                    *n -= 1;
                    for _ in 0..(delta - 1) {
                        if semaphore.try_acquire() {
                            *n -= 1;
                        } else {
                            break;
                        }
                    }
                }
            }
        }
        self.dispatch();
        Ok(())
    }

    /// Invoke the filter's data callback, respecting the lifecycle state and
    /// containing filter errors at this boundary.
    fn dispatch(&self) {
        let Some(env) = self.base.environment.upgrade() else {
            tracing::warn!(
                "input port {} outlived its filter, dropping sample",
                self.base.address
            );
            return;
        };
        let mut env = env.lock();
        match env.state() {
            FilterState::Active => {}
            FilterState::Opened => {
                tracing::warn!(
                    "filter '{}' is not started, dropping sample on port {}",
                    env.name(),
                    self.name()
                );
                return;
            }
            other => {
                tracing::error!(
                    "invariant violation: sample reached filter '{}' in state {}",
                    env.name(),
                    other
                );
                return;
            }
        }
        let profiler = env.profiler().cloned();
        if let Some(profiler) = &profiler {
            profiler.before_port_data_changed(env.name(), self.name());
        }
        let Some(mut filter) = env.take_filter() else {
            tracing::error!(
                "invariant violation: filter '{}' re-entered during dispatch on port {}",
                env.name(),
                self.name()
            );
            return;
        };
        let result = filter.on_port_data_changed(self, &mut env);
        env.restore_filter(filter);
        if let Some(profiler) = &profiler {
            profiler.after_port_data_changed(env.name(), self.name());
        }
        if let Err(e) = result {
            tracing::error!(
                "filter '{}' failed in on_port_data_changed({}): {}",
                env.name(),
                self.name(),
                e
            );
        }
    }
}

impl std::fmt::Debug for InputPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputPort")
            .field("address", &self.base.address)
            .field("dynamic", &self.base.dynamic)
            .field("queue_length", &self.queue_length())
            .finish()
    }
}

/// Output port: publishes samples to every attached connection.
pub struct OutputPort {
    base: PortBase,
    connections: Mutex<Vec<Arc<Connection>>>,
}

impl OutputPort {
    pub(crate) fn new(
        address: PortAddress,
        dynamic: bool,
        filter_id: FilterId,
        environment: Weak<Mutex<FilterEnvironment>>,
    ) -> Self {
        Self {
            base: PortBase::new(address, dynamic, filter_id, environment),
            connections: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.base.address.port
    }

    pub fn address(&self) -> &PortAddress {
        &self.base.address
    }

    pub fn is_dynamic(&self) -> bool {
        self.base.dynamic
    }

    /// Publish a sample to all outgoing connections. Must be called on the
    /// owning thread; blocks while bounded inter-thread edges are full (the
    /// wait cooperatively pumps this thread's executor).
    pub fn transmit(&self, sample: Arc<DataSample>) -> Result<()> {
        self.base.assert_owning_thread("transmit")?;
        let connections: Vec<Arc<Connection>> = self.connections.lock().clone();
        for connection in connections {
            connection.receive_sample(Arc::clone(&sample));
        }
        Ok(())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    pub(crate) fn attach_connection(&self, connection: Arc<Connection>) {
        self.connections.lock().push(connection);
    }

    pub(crate) fn detach_connections(&self) {
        self.connections.lock().clear();
    }
}

impl std::fmt::Debug for OutputPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputPort")
            .field("address", &self.base.address)
            .field("dynamic", &self.base.dynamic)
            .field("connections", &self.connection_count())
            .finish()
    }
}
