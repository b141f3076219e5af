// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Per-thread cooperative scheduler.
//!
//! One executor per worker thread. Producers append `ReceiveEvent`s to the
//! pending list (from any thread); the owning thread drains them one callback
//! at a time. A producer blocked on an inter-thread credit pumps its own
//! executor through `step(Some(self))`; the blocked-producers set keeps such
//! a producer from re-entering its own data callback.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use crate::core::environment::FilterId;
use crate::core::ports::InputPort;
use crate::core::sample::DataSample;
use crate::core::sync::Semaphore;

/// Maximum number of events one `multi_step` drains before yielding back to
/// the thread's event loop.
pub const MAX_EVENTS_PER_STEP: usize = 32;

/// Wall-clock bound of one `multi_step`. A floor on scheduling frequency:
/// the running callback always completes, the deadline is checked between
/// events.
pub const STEP_DEADLINE: Duration = Duration::from_millis(100);

/// Per-port delivery cap while draining during shutdown.
pub const MAX_LOOPS_FINALIZE: usize = 5;

/// Signal sent to the owning thread's event loop when deliveries are pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeupEvent {
    PendingReceives,
}

enum Delivery {
    Sync,
    Async { credit: Option<Arc<Semaphore>> },
}

struct ReceiveEvent {
    port: Arc<InputPort>,
    sample: Arc<DataSample>,
    delivery: Delivery,
}

impl ReceiveEvent {
    fn dispatch(self) {
        let result = match self.delivery {
            Delivery::Sync => self.port.receive_sync(self.sample),
            Delivery::Async { credit } => self.port.receive_async(self.sample, credit.as_ref()),
        };
        if let Err(e) = result {
            tracing::error!("delivery to {} failed: {}", self.port.address(), e);
        }
    }

    fn release_credit(&self) {
        if let Delivery::Async {
            credit: Some(credit),
        } = &self.delivery
        {
            credit.release(1);
        }
    }
}

pub struct Executor {
    pending: Mutex<VecDeque<ReceiveEvent>>,
    /// Filters currently pumping this executor from inside `transmit`.
    /// Touched only by the owning thread.
    blocked: Mutex<HashSet<FilterId>>,
    stopped: AtomicBool,
    /// Coalesces wake-ups: only the 0 -> 1 transition sends a signal.
    notifications: AtomicUsize,
    wakeup_tx: Sender<WakeupEvent>,
}

impl Executor {
    pub(crate) fn new(wakeup_tx: Sender<WakeupEvent>) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            blocked: Mutex::new(HashSet::new()),
            stopped: AtomicBool::new(false),
            notifications: AtomicUsize::new(0),
            wakeup_tx,
        }
    }

    /// Queue a same-thread delivery.
    pub(crate) fn register_pending_rcv_sync(&self, port: Arc<InputPort>, sample: Arc<DataSample>) {
        if self.is_stopped() {
            tracing::warn!(
                "executor stopped, dropping sample for {}",
                port.address()
            );
            return;
        }
        self.pending.lock().push_back(ReceiveEvent {
            port,
            sample,
            delivery: Delivery::Sync,
        });
        self.notify();
    }

    /// Queue a cross-thread delivery carrying the producer's credit.
    pub(crate) fn register_pending_rcv_async(
        &self,
        port: Arc<InputPort>,
        sample: Arc<DataSample>,
        credit: Option<Arc<Semaphore>>,
    ) {
        if self.is_stopped() {
            tracing::warn!(
                "executor stopped, dropping sample for {}",
                port.address()
            );
            if let Some(credit) = credit {
                credit.release(1);
            }
            return;
        }
        self.pending.lock().push_back(ReceiveEvent {
            port,
            sample,
            delivery: Delivery::Async { credit },
        });
        self.notify();
    }

    fn notify(&self) {
        if self.notifications.fetch_add(1, Ordering::SeqCst) == 0 {
            let _ = self.wakeup_tx.send(WakeupEvent::PendingReceives);
        }
    }

    /// Process at most one pending event.
    ///
    /// `from` marks a producer pumping cooperatively while blocked in
    /// `transmit`; events targeting that filter stay queued so the producer
    /// never re-enters its own callback. Returns false when nothing
    /// deliverable is pending.
    pub fn step(&self, from: Option<FilterId>) -> bool {
        if self.is_stopped() {
            return false;
        }
        let _guard = from.map(|id| BlockedGuard::new(self, id));
        let event = {
            let blocked = self.blocked.lock().clone();
            let mut pending = self.pending.lock();
            match pending
                .iter()
                .position(|ev| !blocked.contains(&ev.port.filter_id()))
            {
                Some(index) => pending.remove(index),
                None => None,
            }
        };
        match event {
            Some(event) => {
                event.dispatch();
                true
            }
            None => false,
        }
    }

    /// Event-loop slot: drain up to [`MAX_EVENTS_PER_STEP`] events or until
    /// [`STEP_DEADLINE`] elapses, then re-arm a wake-up if work remains.
    pub fn multi_step(&self) {
        self.notifications.store(0, Ordering::SeqCst);
        let start = Instant::now();
        let mut processed = 0;
        while processed < MAX_EVENTS_PER_STEP {
            if !self.step(None) {
                return;
            }
            processed += 1;
            if start.elapsed() >= STEP_DEADLINE {
                break;
            }
        }
        if !self.pending.lock().is_empty() {
            self.notify();
        }
    }

    /// Drain pending deliveries during shutdown, allowing each input port at
    /// most [`MAX_LOOPS_FINALIZE`] deliveries. Over-cap events are discarded
    /// with their credit returned.
    pub fn finalize(&self) {
        let mut deliveries: HashMap<u64, usize> = HashMap::new();
        loop {
            let event = self.pending.lock().pop_front();
            let Some(event) = event else { break };
            let count = deliveries.entry(event.port.id()).or_insert(0);
            if *count >= MAX_LOOPS_FINALIZE {
                tracing::warn!(
                    "discarding in-flight sample for {} while draining",
                    event.port.address()
                );
                event.release_credit();
                continue;
            }
            *count += 1;
            event.dispatch();
        }
    }

    /// Stop the executor and discard everything pending, returning credits so
    /// blocked producers can observe their connection's stopped flag.
    pub fn clear(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let drained: Vec<ReceiveEvent> = {
            let mut pending = self.pending.lock();
            pending.drain(..).collect()
        };
        for event in &drained {
            event.release_credit();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

/// Scoped membership in the blocked-producers set.
struct BlockedGuard<'a> {
    executor: &'a Executor,
    id: FilterId,
}

impl<'a> BlockedGuard<'a> {
    fn new(executor: &'a Executor, id: FilterId) -> Self {
        executor.blocked.lock().insert(id);
        Self { executor, id }
    }
}

impl Drop for BlockedGuard<'_> {
    fn drop(&mut self) {
        self.executor.blocked.lock().remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::environment::FilterEnvironment;
    use crate::core::error::Result;
    use crate::core::filter::{Filter, FilterState};
    use crossbeam_channel::Receiver;
    use parking_lot::Mutex as PlMutex;
    use std::any::Any;

    struct Recorder {
        timestamps: Vec<i64>,
        delay: Duration,
    }

    impl Filter for Recorder {
        fn on_port_data_changed(
            &mut self,
            port: &InputPort,
            _env: &mut FilterEnvironment,
        ) -> Result<()> {
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            self.timestamps.push(port.get_data(Some(0), None)?.timestamp());
            Ok(())
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    fn test_executor() -> (Executor, Receiver<WakeupEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Executor::new(tx), rx)
    }

    fn sink(
        queue_samples: i64,
        delay: Duration,
    ) -> (Arc<PlMutex<FilterEnvironment>>, Arc<InputPort>) {
        let env = FilterEnvironment::create("sink", "test", move |env| {
            let port = env.add_input_port("in")?;
            port.set_queue_size(queue_samples, -1.0);
            Ok(Box::new(Recorder {
                timestamps: Vec::new(),
                delay,
            }) as Box<dyn Filter>)
        })
        .unwrap();
        let port = env.lock().input("in").unwrap();
        env.lock().set_state(FilterState::Active);
        (env, port)
    }

    fn recorded(env: &Arc<PlMutex<FilterEnvironment>>) -> Vec<i64> {
        let mut guard = env.lock();
        let mut filter = guard.take_filter().unwrap();
        let timestamps = filter
            .as_any_mut()
            .downcast_ref::<Recorder>()
            .unwrap()
            .timestamps
            .clone();
        guard.restore_filter(filter);
        timestamps
    }

    fn sample(timestamp: i64) -> Arc<DataSample> {
        Arc::new(DataSample::new(vec![], "test/empty", timestamp))
    }

    #[test]
    fn test_step_delivers_in_fifo_order() {
        let (executor, _rx) = test_executor();
        let (env, port) = sink(8, Duration::ZERO);
        for t in [1, 2, 3] {
            executor.register_pending_rcv_sync(Arc::clone(&port), sample(t));
        }
        assert!(executor.step(None));
        assert!(executor.step(None));
        assert!(executor.step(None));
        assert!(!executor.step(None));
        assert_eq!(recorded(&env), vec![1, 2, 3]);
    }

    #[test]
    fn test_blocked_producer_is_skipped() {
        let (executor, _rx) = test_executor();
        let (env, port) = sink(8, Duration::ZERO);
        executor.register_pending_rcv_sync(Arc::clone(&port), sample(1));
        // a producer pumping its own executor must not re-enter itself
        assert!(!executor.step(Some(port.filter_id())));
        assert_eq!(executor.pending_count(), 1);
        assert!(executor.step(None));
        assert_eq!(recorded(&env), vec![1]);
    }

    #[test]
    fn test_wakeup_coalescing() {
        let (executor, rx) = test_executor();
        let (_env, port) = sink(8, Duration::ZERO);
        for t in 0..5 {
            executor.register_pending_rcv_sync(Arc::clone(&port), sample(t));
        }
        // a burst of registrations produces a single wake-up
        assert_eq!(rx.try_iter().count(), 1);
        executor.multi_step();
        executor.register_pending_rcv_sync(Arc::clone(&port), sample(9));
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn test_multi_step_deadline_rearms() {
        let (executor, rx) = test_executor();
        let (env, port) = sink(8, Duration::from_millis(60));
        for t in [1, 2, 3] {
            executor.register_pending_rcv_sync(Arc::clone(&port), sample(t));
        }
        let _ = rx.try_iter().count();
        executor.multi_step();
        // 60ms per callback: the second event crosses the 100ms deadline
        assert_eq!(recorded(&env), vec![1, 2]);
        assert_eq!(executor.pending_count(), 1);
        // still-pending work re-armed a wake-up
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn test_finalize_caps_deliveries_per_port() {
        let (executor, _rx) = test_executor();
        let (env, port) = sink(16, Duration::ZERO);
        for t in 0..8 {
            executor.register_pending_rcv_sync(Arc::clone(&port), sample(t));
        }
        executor.finalize();
        assert_eq!(recorded(&env).len(), MAX_LOOPS_FINALIZE);
        assert_eq!(executor.pending_count(), 0);
    }

    #[test]
    fn test_static_credit_released_on_delivery() {
        let (executor, _rx) = test_executor();
        let (env, port) = sink(8, Duration::ZERO);
        let semaphore = Arc::new(Semaphore::new(2));
        assert!(semaphore.try_acquire());
        executor.register_pending_rcv_async(Arc::clone(&port), sample(1), Some(Arc::clone(&semaphore)));
        assert!(executor.step(None));
        assert_eq!(semaphore.available(), 2);
        assert_eq!(recorded(&env), vec![1]);
    }

    #[test]
    fn test_dynamic_queue_credit_growth_and_reclaim() {
        let (executor, _rx) = test_executor();
        let (_env, port) = sink(3, Duration::ZERO);
        port.set_dynamic_queue(true);
        let semaphore = Arc::new(Semaphore::new(1));

        // while the queue grows, each arrival returns its own credit plus one
        let expected_available = [2, 3, 4];
        for (t, expected) in expected_available.iter().enumerate() {
            assert!(semaphore.try_acquire());
            executor.register_pending_rcv_async(
                Arc::clone(&port),
                sample(t as i64),
                Some(Arc::clone(&semaphore)),
            );
            assert!(executor.step(None));
            assert_eq!(semaphore.available(), *expected);
        }

        // shrink the queue: the next arrival gives up surplus credits
        port.set_queue_size(1, -1.0);
        assert!(semaphore.try_acquire());
        executor.register_pending_rcv_async(
            Arc::clone(&port),
            sample(10),
            Some(Arc::clone(&semaphore)),
        );
        assert!(executor.step(None));
        // arrival credit consumed and one surplus credit pulled back
        assert_eq!(semaphore.available(), 2);

        // steady state behaves like the static mode again
        assert!(semaphore.try_acquire());
        executor.register_pending_rcv_async(
            Arc::clone(&port),
            sample(11),
            Some(Arc::clone(&semaphore)),
        );
        assert!(executor.step(None));
        assert_eq!(semaphore.available(), 2);
    }

    #[test]
    fn test_clear_releases_credits_and_stops() {
        let (executor, _rx) = test_executor();
        let (env, port) = sink(8, Duration::ZERO);
        let semaphore = Arc::new(Semaphore::new(1));
        assert!(semaphore.try_acquire());
        executor.register_pending_rcv_async(Arc::clone(&port), sample(1), Some(Arc::clone(&semaphore)));
        executor.clear();
        assert!(executor.is_stopped());
        assert_eq!(executor.pending_count(), 0);
        assert_eq!(semaphore.available(), 1);
        // registrations on a stopped executor are dropped, credits returned
        assert!(semaphore.try_acquire());
        executor.register_pending_rcv_async(Arc::clone(&port), sample(2), Some(Arc::clone(&semaphore)));
        assert_eq!(executor.pending_count(), 0);
        assert_eq!(semaphore.available(), 1);
        assert!(!executor.step(None));
        assert!(recorded(&env).is_empty());
    }

    #[test]
    fn test_sample_in_opened_state_is_dropped_but_queued() {
        let (executor, _rx) = test_executor();
        let (env, port) = sink(8, Duration::ZERO);
        env.lock().set_state(FilterState::Opened);
        executor.register_pending_rcv_sync(Arc::clone(&port), sample(1));
        assert!(executor.step(None));
        assert!(recorded(&env).is_empty());
        assert_eq!(port.queue_length(), 1);
    }
}
