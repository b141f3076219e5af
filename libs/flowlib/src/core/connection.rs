// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Connections between output and input ports.
//!
//! A connection is decided at wiring time to be `Direct` (producer and
//! consumer share a thread) or `InterThread`. Inter-thread edges carry a
//! credit semaphore of `width` permits; a producer that cannot acquire a
//! credit within [`CREDIT_SPIN_TIMEOUT`] pumps its own executor and retries,
//! so mutually blocked threads keep making progress.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crate::core::environment::FilterId;
use crate::core::executor::Executor;
use crate::core::ports::{InputPort, PortAddress};
use crate::core::sample::DataSample;
use crate::core::sync::Semaphore;

/// Bound on a single credit-acquire attempt before the producer yields to
/// its own executor.
pub const CREDIT_SPIN_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// Producer and consumer share a thread; deliveries are queued on the
    /// shared executor without flow control.
    Direct,
    /// Cross-thread edge with credit-based back-pressure (width 0 disables
    /// flow control).
    InterThread,
}

pub struct Connection {
    id: ConnectionId,
    source: PortAddress,
    dest: Arc<InputPort>,
    mode: TransportMode,
    width: usize,
    stopped: AtomicBool,
    credits: Option<Arc<Semaphore>>,
    source_filter: FilterId,
    source_executor: Arc<Executor>,
    dest_executor: Arc<Executor>,
}

impl Connection {
    /// New connections start stopped; the lifecycle controller opens them
    /// when the pipeline starts.
    pub(crate) fn new(
        mode: TransportMode,
        width: usize,
        source: PortAddress,
        dest: Arc<InputPort>,
        source_filter: FilterId,
        source_executor: Arc<Executor>,
        dest_executor: Arc<Executor>,
    ) -> Self {
        let credits = match mode {
            TransportMode::InterThread if width > 0 => Some(Arc::new(Semaphore::new(width))),
            _ => None,
        };
        Self {
            id: ConnectionId::new(),
            source,
            dest,
            mode,
            width,
            stopped: AtomicBool::new(true),
            credits,
            source_filter,
            source_executor,
            dest_executor,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn source(&self) -> &PortAddress {
        &self.source
    }

    pub fn dest(&self) -> &PortAddress {
        self.dest.address()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Open or close the edge. Reopening resets the credit count to `width`.
    pub fn set_stopped(&self, stopped: bool) {
        self.stopped.store(stopped, Ordering::SeqCst);
        if !stopped {
            if let Some(credits) = &self.credits {
                credits.reset(self.width);
            }
        }
    }

    /// Called by the producer's `OutputPort::transmit`, on the producer's
    /// owning thread.
    pub(crate) fn receive_sample(&self, sample: Arc<DataSample>) {
        if self.is_stopped() {
            tracing::warn!(
                "connection {} -> {} is stopped, dropping sample",
                self.source,
                self.dest.address()
            );
            return;
        }
        match self.mode {
            TransportMode::Direct => {
                self.dest_executor
                    .register_pending_rcv_sync(Arc::clone(&self.dest), sample);
            }
            TransportMode::InterThread => {
                if let Some(credits) = &self.credits {
                    loop {
                        if self.is_stopped() {
                            tracing::warn!(
                                "connection {} -> {} stopped while waiting for a credit, \
                                 dropping sample",
                                self.source,
                                self.dest.address()
                            );
                            return;
                        }
                        if credits.acquire_timeout(CREDIT_SPIN_TIMEOUT) {
                            break;
                        }
                        // edge full: keep this thread's deliveries moving so
                        // cyclic or mutually blocked graphs cannot deadlock
                        self.source_executor.step(Some(self.source_filter));
                    }
                }
                self.dest_executor.register_pending_rcv_async(
                    Arc::clone(&self.dest),
                    sample,
                    self.credits.clone(),
                );
            }
        }
    }

    /// Credits currently available to the producer (tests and diagnostics).
    pub fn available_credits(&self) -> Option<usize> {
        self.credits.as_ref().map(|c| c.available())
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("source", &self.source)
            .field("dest", self.dest.address())
            .field("mode", &self.mode)
            .field("width", &self.width)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
