// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Error types for flowlib
//!
//! Defines the core error types used throughout the runtime.
//! Filter implementations can extend these through the `anyhow` tail.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    /// An operation was invoked off its owning thread. Fatal to the calling
    /// operation.
    #[error("wrong thread: {0}")]
    WrongThread(String),

    /// A queue read addressed a sample that is not retained.
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// The state machine reached an illegal state.
    #[error("invariant violation: {0}")]
    Invariant(String),

    /// A send was attempted on a stopped connection.
    #[error("transport stopped: {0}")]
    TransportStopped(String),

    /// Error surfaced from user-supplied filter code.
    #[error("filter '{filter}' failed: {reason}")]
    Plugin { filter: String, reason: anyhow::Error },

    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A worker thread is gone or refused the operation.
    #[error("worker thread unavailable: {0}")]
    ThreadUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type that uses FlowError
pub type Result<T> = std::result::Result<T, FlowError>;
