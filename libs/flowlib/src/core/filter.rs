// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The filter contract and its lifecycle states.
//!
//! Filters are the building blocks of a pipeline. Every callback runs on the
//! filter's owning thread; a filter never needs internal locking for its own
//! state. All lifecycle callbacks default to no-ops so simple filters only
//! implement what they use.

use std::any::Any;

use serde::{Deserialize, Serialize};

use crate::core::environment::FilterEnvironment;
use crate::core::error::Result;
use crate::core::ports::InputPort;

/// Lifecycle state of a filter instance.
///
/// Advanced only by the runtime's lifecycle controller. The forward sequence
/// visits every state exactly once; reverse transitions return through
/// `Opened`, `Initialized` and `Constructed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterState {
    /// The factory is running; ports may be created.
    Constructing,
    Constructed,
    Initializing,
    Initialized,
    Opening,
    Opened,
    Starting,
    /// Data callbacks are delivered only in this state.
    Active,
    Stopping,
    Closing,
    Deinitializing,
    Destructing,
    Destructed,
}

impl std::fmt::Display for FilterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Constructing => "Constructing",
            Self::Constructed => "Constructed",
            Self::Initializing => "Initializing",
            Self::Initialized => "Initialized",
            Self::Opening => "Opening",
            Self::Opened => "Opened",
            Self::Starting => "Starting",
            Self::Active => "Active",
            Self::Stopping => "Stopping",
            Self::Closing => "Closing",
            Self::Deinitializing => "Deinitializing",
            Self::Destructing => "Destructing",
            Self::Destructed => "Destructed",
        };
        write!(f, "{name}")
    }
}

/// One lifecycle transition, as driven by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LifecycleOp {
    Init,
    Open,
    Start,
    Stop,
    Close,
    Deinit,
}

impl LifecycleOp {
    /// State a filter must be in for this transition to apply.
    pub(crate) fn source_state(self) -> FilterState {
        match self {
            Self::Init => FilterState::Constructed,
            Self::Open => FilterState::Initialized,
            Self::Start => FilterState::Opened,
            Self::Stop => FilterState::Active,
            Self::Close => FilterState::Opened,
            Self::Deinit => FilterState::Initialized,
        }
    }

    /// State the filter is in while its callback runs.
    pub(crate) fn transitional_state(self) -> FilterState {
        match self {
            Self::Init => FilterState::Initializing,
            Self::Open => FilterState::Opening,
            Self::Start => FilterState::Starting,
            Self::Stop => FilterState::Stopping,
            Self::Close => FilterState::Closing,
            Self::Deinit => FilterState::Deinitializing,
        }
    }

    /// State reached once the callback returns.
    pub(crate) fn target_state(self) -> FilterState {
        match self {
            Self::Init => FilterState::Initialized,
            Self::Open => FilterState::Opened,
            Self::Start => FilterState::Active,
            Self::Stop => FilterState::Opened,
            Self::Close => FilterState::Initialized,
            Self::Deinit => FilterState::Constructed,
        }
    }

    /// Forward transitions abort on failure; reverse transitions log and
    /// continue so a partially built pipeline can always be torn down.
    pub(crate) fn is_forward(self) -> bool {
        matches!(self, Self::Init | Self::Open | Self::Start)
    }
}

impl std::fmt::Display for LifecycleOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Init => "on_init",
            Self::Open => "on_open",
            Self::Start => "on_start",
            Self::Stop => "on_stop",
            Self::Close => "on_close",
            Self::Deinit => "on_deinit",
        };
        write!(f, "{name}")
    }
}

/// Filter trait
///
/// All pipeline nodes implement this trait. The environment passed to each
/// callback gives access to the filter's ports and property collection; port
/// creation is only legal up to `Initialized` (see
/// [`FilterEnvironment::add_input_port`]).
///
/// # Lifecycle
///
/// 1. `on_init()` - declare/inspect ports and properties
/// 2. `on_open()` - acquire external resources; connections exist afterwards
/// 3. `on_start()` - last chance before data flows; may already transmit
/// 4. `on_port_data_changed()` - called per delivered sample, `Active` only
/// 5. `on_stop()` / `on_close()` / `on_deinit()` - reverse order teardown
pub trait Filter: Send + 'static {
    fn on_init(&mut self, env: &mut FilterEnvironment) -> Result<()> {
        let _ = env;
        Ok(())
    }

    fn on_open(&mut self, env: &mut FilterEnvironment) -> Result<()> {
        let _ = env;
        Ok(())
    }

    fn on_start(&mut self, env: &mut FilterEnvironment) -> Result<()> {
        let _ = env;
        Ok(())
    }

    /// Called on the owning thread whenever a sample was inserted into
    /// `port`'s queue. Read the data with [`InputPort::get_data`]. Errors are
    /// logged at the port boundary and do not stop the pipeline.
    fn on_port_data_changed(&mut self, port: &InputPort, env: &mut FilterEnvironment) -> Result<()> {
        let _ = (port, env);
        Ok(())
    }

    fn on_stop(&mut self, env: &mut FilterEnvironment) -> Result<()> {
        let _ = env;
        Ok(())
    }

    fn on_close(&mut self, env: &mut FilterEnvironment) -> Result<()> {
        let _ = env;
        Ok(())
    }

    fn on_deinit(&mut self, env: &mut FilterEnvironment) -> Result<()> {
        let _ = env;
        Ok(())
    }

    /// Enable downcasting to concrete filter types, e.g. to drive a source
    /// from outside the pipeline via `FlowRuntime::with_filter`.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}
