// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

pub mod connection;
pub mod environment;
pub mod error;
pub mod executor;
pub mod filter;
pub mod graph;
pub mod ports;
pub mod prelude;
pub mod properties;
pub mod queue;
pub mod registry;
pub mod runtime;
pub mod sample;
pub mod services;
pub mod sync;
pub mod thread_pool;

pub use connection::{CREDIT_SPIN_TIMEOUT, Connection, ConnectionId, TransportMode};
pub use environment::{FilterEnvironment, FilterId};
pub use error::{FlowError, Result};
pub use executor::{
    Executor, MAX_EVENTS_PER_STEP, MAX_LOOPS_FINALIZE, STEP_DEADLINE, WakeupEvent,
};
pub use filter::{Filter, FilterState};
pub use graph::{
    ApplicationConfig, CompositeFilterConfig, ConnectionConfig, GraphConfig, IDENTIFIER_PATTERN,
    NodeConfig, PropertyConfig, Topology, graph_config_schema, is_valid_identifier,
    parse_connection,
};
pub use ports::{InputPort, OutputPort, PortAddress};
pub use properties::{PropertyCollection, PropertyValue};
pub use queue::InputQueue;
pub use registry::{
    BoxedFilterFactory, FactoryFn, FilterRegistry, RegisteredFilter, global_registry,
};
pub use runtime::{FlowRuntime, RuntimePhase, RuntimeStatus};
pub use sample::{DataSample, TIMESTAMP_RES, current_time};
pub use services::{
    PROFILING_SERVICE, Profiler, Services, global_services, init_logging, register_profiler,
};
pub use sync::Semaphore;
pub use thread_pool::{ThreadHandle, ThreadPool};
