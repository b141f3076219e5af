// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Connection wiring.
//!
//! Pending connection specs turn into live `Connection`s when the pipeline
//! opens (ports are known by then) and are detached again when it closes.
//! Transport mode is decided here by comparing the owning threads of the two
//! endpoints.

use std::sync::Arc;

use crate::core::connection::{Connection, TransportMode};
use crate::core::error::{FlowError, Result};

use super::runtime::FlowRuntime;

impl FlowRuntime {
    pub(crate) fn materialize_connections(&mut self) -> Result<()> {
        let specs = self.pending_connections.clone();
        for spec in &specs {
            let (source_address, output, source_id, source_thread, source_executor) = {
                let host = self.host(&spec.from_filter)?;
                let env = host.env.lock();
                let output = env.output(&spec.from_port).ok_or_else(|| {
                    FlowError::Configuration(format!(
                        "filter '{}' has no output port '{}'",
                        spec.from_filter, spec.from_port
                    ))
                })?;
                (
                    output.address().clone(),
                    output,
                    host.id,
                    host.thread.clone(),
                    Arc::clone(&host.executor),
                )
            };
            let (input, dest_thread, dest_executor) = {
                let host = self.host(&spec.to_filter)?;
                let env = host.env.lock();
                let input = env.input(&spec.to_port).ok_or_else(|| {
                    FlowError::Configuration(format!(
                        "filter '{}' has no input port '{}'",
                        spec.to_filter, spec.to_port
                    ))
                })?;
                (input, host.thread.clone(), Arc::clone(&host.executor))
            };
            let mode = if source_thread == dest_thread {
                TransportMode::Direct
            } else {
                TransportMode::InterThread
            };
            let connection = Arc::new(Connection::new(
                mode,
                spec.width,
                source_address,
                input,
                source_id,
                source_executor,
                dest_executor,
            ));
            tracing::debug!("wired {} ({:?})", spec, mode);
            output.attach_connection(Arc::clone(&connection));
            self.connections.push(connection);
        }
        Ok(())
    }

    pub(crate) fn teardown_connections(&mut self) {
        for host in &self.filters {
            let env = host.env.lock();
            for output in env.outputs() {
                output.detach_connections();
            }
        }
        self.connections.clear();
    }
}
