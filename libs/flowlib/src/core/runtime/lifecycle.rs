// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Runtime lifecycle management
//!
//! Drives every hosted filter through the shared state machine with a
//! barrier per transition: tasks go out to all worker threads, each thread
//! transitions its filters in registration order, and the controller waits
//! for every reply before the next phase starts. A forward failure triggers
//! the reverse sequence from whatever states the filters actually reached.

use crate::core::environment;
use crate::core::error::{FlowError, Result};
use crate::core::filter::LifecycleOp;

use super::runtime::{FlowRuntime, RuntimePhase};

impl FlowRuntime {
    /// Run `on_init` on every filter (Constructed -> Initialized).
    pub fn init(&mut self) -> Result<()> {
        if self.phase != RuntimePhase::Constructed {
            return Err(FlowError::Configuration(format!(
                "cannot init from phase {:?} (must be Constructed)",
                self.phase
            )));
        }
        tracing::info!("initializing {} filters", self.filters.len());
        match self.transition_all(LifecycleOp::Init) {
            Ok(()) => {
                self.phase = RuntimePhase::Initialized;
                Ok(())
            }
            Err(e) => {
                self.unwind();
                Err(e)
            }
        }
    }

    /// Run `on_open` on every filter, then materialise all connections.
    pub fn open(&mut self) -> Result<()> {
        if self.phase != RuntimePhase::Initialized {
            return Err(FlowError::Configuration(format!(
                "cannot open from phase {:?} (must be Initialized)",
                self.phase
            )));
        }
        if let Err(e) = self.transition_all(LifecycleOp::Open) {
            self.unwind();
            return Err(e);
        }
        self.phase = RuntimePhase::Opened;
        if let Err(e) = self.materialize_connections() {
            self.unwind();
            return Err(e);
        }
        Ok(())
    }

    /// Open all connections (resetting their credits) and run `on_start`.
    /// Data flows once this returns.
    pub fn start(&mut self) -> Result<()> {
        if self.phase != RuntimePhase::Opened {
            return Err(FlowError::Configuration(format!(
                "cannot start from phase {:?} (must be Opened)",
                self.phase
            )));
        }
        for connection in &self.connections {
            connection.set_stopped(false);
        }
        match self.transition_all(LifecycleOp::Start) {
            Ok(()) => {
                self.phase = RuntimePhase::Active;
                tracing::info!("pipeline active");
                Ok(())
            }
            Err(e) => {
                for connection in &self.connections {
                    connection.set_stopped(true);
                }
                self.unwind();
                Err(e)
            }
        }
    }

    /// Stop all connections, drain in-flight deliveries (filters are still
    /// `Active` so drained samples reach them), then run `on_stop`.
    pub fn stop(&mut self) -> Result<()> {
        if self.phase != RuntimePhase::Active {
            return Err(FlowError::Configuration(format!(
                "cannot stop from phase {:?} (must be Active)",
                self.phase
            )));
        }
        tracing::info!("stopping pipeline");
        for connection in &self.connections {
            connection.set_stopped(true);
        }
        self.finalize_executors();
        let result = self.transition_all(LifecycleOp::Stop);
        self.phase = RuntimePhase::Opened;
        result
    }

    /// Tear down all connections and run `on_close`.
    pub fn close(&mut self) -> Result<()> {
        if self.phase != RuntimePhase::Opened {
            return Err(FlowError::Configuration(format!(
                "cannot close from phase {:?} (must be Opened)",
                self.phase
            )));
        }
        self.teardown_connections();
        let result = self.transition_all(LifecycleOp::Close);
        self.phase = RuntimePhase::Initialized;
        result
    }

    /// Run `on_deinit` on every filter.
    pub fn deinit(&mut self) -> Result<()> {
        if self.phase != RuntimePhase::Initialized {
            return Err(FlowError::Configuration(format!(
                "cannot deinit from phase {:?} (must be Initialized)",
                self.phase
            )));
        }
        let result = self.transition_all(LifecycleOp::Deinit);
        self.phase = RuntimePhase::Constructed;
        result
    }

    /// init + open + start. Each step unwinds on failure.
    pub fn activate(&mut self) -> Result<()> {
        self.init()?;
        self.open()?;
        self.start()?;
        Ok(())
    }

    /// Reverse whatever has been reached: stop, close and deinit as needed.
    pub fn deactivate(&mut self) -> Result<()> {
        if self.phase == RuntimePhase::Active {
            self.stop()?;
        }
        if self.phase == RuntimePhase::Opened {
            self.close()?;
        }
        if self.phase == RuntimePhase::Initialized {
            self.deinit()?;
        }
        Ok(())
    }

    /// Deactivate, destroy all filters on their owning threads and stop the
    /// worker pool. Idempotent; also invoked on drop.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.filters.is_empty() && self.pool.is_empty() {
            return Ok(());
        }
        if let Err(e) = self.deactivate() {
            tracing::error!("error while deactivating during shutdown: {e}");
        }
        for handle in self.pool.iter() {
            if let Err(e) = handle.run(|worker| worker.destruct_environments()) {
                tracing::error!(
                    "failed to destruct filters on thread '{}': {}",
                    handle.name(),
                    e
                );
            }
        }
        self.filters.clear();
        self.by_name.clear();
        self.connections.clear();
        self.pending_connections.clear();
        self.pool.shutdown();
        tracing::info!("pipeline shut down");
        Ok(())
    }

    /// Dispatch one transition to every worker thread and wait for all of
    /// them. Returns the first per-filter error after the barrier completes.
    fn transition_all(&self, op: LifecycleOp) -> Result<()> {
        tracing::debug!("transitioning all filters: {}", op);
        let mut waits = Vec::new();
        for handle in self.pool.iter() {
            let rx = handle.submit(move |worker| {
                let mut results = Vec::new();
                for env in worker.environments() {
                    results.push(environment::perform_transition(env, op));
                }
                results
            })?;
            waits.push((handle.name().to_string(), rx));
        }
        let mut first_error = None;
        for (thread, rx) in waits {
            match rx.recv() {
                Ok(results) => {
                    for result in results {
                        if let Err(e) = result {
                            tracing::error!("{e}");
                            if first_error.is_none() {
                                first_error = Some(e);
                            }
                        }
                    }
                }
                Err(_) => {
                    let e = FlowError::ThreadUnavailable(thread);
                    tracing::error!("{e}");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        match first_error {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// Drain every executor subject to the per-port finalize cap.
    fn finalize_executors(&self) {
        for handle in self.pool.iter() {
            if let Err(e) = handle.run(|worker| worker.executor().finalize()) {
                tracing::error!(
                    "failed to drain executor on thread '{}': {}",
                    handle.name(),
                    e
                );
            }
        }
    }

    /// Reverse sequence after a failed forward transition, driven purely by
    /// the states individual filters actually reached.
    fn unwind(&mut self) {
        tracing::warn!("transition failed, unwinding pipeline");
        for connection in &self.connections {
            connection.set_stopped(true);
        }
        self.finalize_executors();
        if let Err(e) = self.transition_all(LifecycleOp::Stop) {
            tracing::error!("unwind: stop phase failed: {e}");
        }
        self.teardown_connections();
        if let Err(e) = self.transition_all(LifecycleOp::Close) {
            tracing::error!("unwind: close phase failed: {e}");
        }
        if let Err(e) = self.transition_all(LifecycleOp::Deinit) {
            tracing::error!("unwind: deinit phase failed: {e}");
        }
        self.phase = RuntimePhase::Constructed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_requires_constructed_phase() {
        let mut runtime = FlowRuntime::new();
        runtime.phase = RuntimePhase::Active;
        let result = runtime.init();
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("must be Constructed")
        );
    }

    #[test]
    fn test_open_from_all_invalid_phases() {
        let mut runtime = FlowRuntime::new();
        for phase in [
            RuntimePhase::Constructed,
            RuntimePhase::Opened,
            RuntimePhase::Active,
        ] {
            runtime.phase = phase;
            assert!(runtime.open().is_err(), "open() should fail from {phase:?}");
        }
    }

    #[test]
    fn test_start_requires_opened_phase() {
        let mut runtime = FlowRuntime::new();
        let err = runtime.start().unwrap_err();
        assert!(err.to_string().contains("must be Opened"));
    }

    #[test]
    fn test_stop_requires_active_phase() {
        let mut runtime = FlowRuntime::new();
        let err = runtime.stop().unwrap_err();
        assert!(err.to_string().contains("must be Active"));
        assert!(err.to_string().contains("Constructed"));
    }

    #[test]
    fn test_empty_runtime_full_cycle() {
        let mut runtime = FlowRuntime::new();
        runtime.activate().unwrap();
        assert_eq!(runtime.phase(), RuntimePhase::Active);
        runtime.deactivate().unwrap();
        assert_eq!(runtime.phase(), RuntimePhase::Constructed);
        runtime.shutdown().unwrap();
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let mut runtime = FlowRuntime::new();
        runtime.shutdown().unwrap();
        runtime.shutdown().unwrap();
    }
}
