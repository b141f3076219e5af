// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! flowlib - data-flow runtime for vision and signal pipelines.
//!
//! Pipelines are directed graphs of [`Filter`]s connected through ports.
//! Every filter lives on a named worker thread; all callbacks into a filter
//! run on that thread. Samples travel along connections in FIFO order, with
//! credit-based back-pressure on inter-thread edges, and the whole graph
//! moves through a coordinated init/open/start/stop/close/deinit lifecycle
//! driven by [`FlowRuntime`].

pub mod core;

pub use core::{
    ApplicationConfig, Connection, ConnectionConfig, DataSample, Executor, Filter,
    FilterEnvironment, FilterRegistry, FilterState, FlowError, FlowRuntime, GraphConfig,
    InputPort, NodeConfig, OutputPort, PortAddress, Profiler, PropertyCollection, PropertyValue,
    Result, RuntimePhase, RuntimeStatus, Services, ThreadPool, TransportMode,
    current_time, global_registry, global_services, graph_config_schema, init_logging,
    register_profiler,
};
