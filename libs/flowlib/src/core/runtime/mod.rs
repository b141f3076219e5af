// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

mod connections;
mod lifecycle;
#[allow(clippy::module_inception)]
mod runtime;

pub use runtime::{FlowRuntime, RuntimePhase, RuntimeStatus};
