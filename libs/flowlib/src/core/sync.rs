// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Counting semaphore with timed acquisition.
//!
//! Backs the credit-based flow control on inter-thread connections. Producers
//! acquire one credit per emitted sample (with a bounded wait so they can
//! cooperatively pump their own executor); consumers release credits as
//! samples are accepted or as their input queue shrinks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

static NEXT_SEMAPHORE_ID: AtomicU64 = AtomicU64::new(0);

pub struct Semaphore {
    id: u64,
    permits: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    pub fn new(permits: usize) -> Self {
        Self {
            id: NEXT_SEMAPHORE_ID.fetch_add(1, Ordering::Relaxed),
            permits: Mutex::new(permits),
            available: Condvar::new(),
        }
    }

    /// Process-unique identity, used to key per-semaphore credit bookkeeping.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Acquire one permit, waiting up to `timeout`. Returns false on timeout.
    pub fn acquire_timeout(&self, timeout: Duration) -> bool {
        let mut permits = self.permits.lock();
        if *permits == 0 {
            let _ = self
                .available
                .wait_while_for(&mut permits, |p| *p == 0, timeout);
        }
        if *permits == 0 {
            return false;
        }
        *permits -= 1;
        true
    }

    /// Acquire one permit without waiting.
    pub fn try_acquire(&self) -> bool {
        let mut permits = self.permits.lock();
        if *permits == 0 {
            return false;
        }
        *permits -= 1;
        true
    }

    /// Return `n` permits.
    pub fn release(&self, n: usize) {
        if n == 0 {
            return;
        }
        let mut permits = self.permits.lock();
        *permits += n;
        if n == 1 {
            self.available.notify_one();
        } else {
            self.available.notify_all();
        }
    }

    /// Forget the current count and start over with `permits`. Used when a
    /// stopped connection is reopened.
    pub fn reset(&self, permits: usize) {
        let mut current = self.permits.lock();
        *current = permits;
        self.available.notify_all();
    }

    pub fn available(&self) -> usize {
        *self.permits.lock()
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Semaphore")
            .field("id", &self.id)
            .field("available", &self.available())
            .finish()
    }
}
