// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Inter-thread transport integration test.
//!
//! A fast producer on one thread feeds a slow consumer on another. With a
//! static queue the credit semaphore throttles the producer to the edge
//! width; with a dynamic queue the consumer hands out extra credits while its
//! queue grows, absorbing bursts. Also covers the stopped-connection drop
//! path and restart semantics.

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use flowlib::core::{
    DataSample, Filter, FilterEnvironment, FlowRuntime, InputPort, OutputPort, Result,
    TransportMode,
};

const CONSUMER_DELAY: Duration = Duration::from_millis(50);

struct BurstSource {
    output: Arc<OutputPort>,
}

impl BurstSource {
    fn emit_burst(&self, count: i64) -> Result<()> {
        for t in 0..count {
            self.output
                .transmit(Arc::new(DataSample::new(Vec::new(), "test/tick", t)))?;
        }
        Ok(())
    }
}

impl Filter for BurstSource {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn make_source(env: &mut FilterEnvironment) -> Result<Box<dyn Filter>> {
    let output = env.add_output_port("out")?;
    Ok(Box::new(BurstSource { output }))
}

struct SlowSink {
    received: Arc<Mutex<Vec<i64>>>,
}

impl Filter for SlowSink {
    fn on_port_data_changed(&mut self, port: &InputPort, _env: &mut FilterEnvironment) -> Result<()> {
        std::thread::sleep(CONSUMER_DELAY);
        let sample = port.get_data(Some(0), None)?;
        self.received.lock().push(sample.timestamp());
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn make_slow_sink(
    received: Arc<Mutex<Vec<i64>>>,
    queue_samples: i64,
    dynamic_queue: bool,
) -> impl FnOnce(&mut FilterEnvironment) -> Result<Box<dyn Filter>> + Send + 'static {
    move |env| {
        let port = env.add_input_port("in")?;
        port.set_queue_size(queue_samples, -1.0);
        env.set_interthread_dynamic_queue("in", dynamic_queue)?;
        Ok(Box::new(SlowSink { received }))
    }
}

/// Emit `count` samples on the producer thread, returning the producer-side
/// wall-clock time for the whole burst.
fn timed_emit(runtime: &FlowRuntime, count: i64) -> Duration {
    let start = Instant::now();
    runtime
        .with_filter("source", move |filter, _env| {
            filter
                .as_any_mut()
                .downcast_mut::<BurstSource>()
                .expect("source filter type")
                .emit_burst(count)
        })
        .unwrap()
        .unwrap();
    start.elapsed()
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn build(
    received: Arc<Mutex<Vec<i64>>>,
    width: usize,
    queue_samples: i64,
    dynamic_queue: bool,
) -> FlowRuntime {
    let mut runtime = FlowRuntime::new();
    runtime.add_filter("source", "producer", make_source).unwrap();
    runtime
        .add_filter(
            "sink",
            "consumer",
            make_slow_sink(received, queue_samples, dynamic_queue),
        )
        .unwrap();
    runtime
        .connect_with_width("source.out", "sink.in", width)
        .unwrap();
    runtime.activate().unwrap();
    assert_eq!(runtime.connections()[0].mode(), TransportMode::InterThread);
    runtime
}

#[test]
fn test_static_queue_backpressure_width_two() {
    let received = Arc::new(Mutex::new(Vec::new()));
    let runtime = build(Arc::clone(&received), 2, 1, false);

    let elapsed = timed_emit(&runtime, 10);
    // 2 credits up front, then one credit back per consumed sample: the
    // producer is paced by the consumer for at least 7 of the 10 samples
    assert!(
        elapsed >= Duration::from_millis(300),
        "producer finished too fast for width 2: {elapsed:?}"
    );

    assert!(wait_until(Duration::from_secs(10), || received.lock().len() == 10));
    assert_eq!(*received.lock(), (0..10).collect::<Vec<i64>>());

    let mut runtime = runtime;
    runtime.shutdown().unwrap();
}

#[test]
fn test_dynamic_queue_absorbs_burst() {
    let received = Arc::new(Mutex::new(Vec::new()));
    let runtime = build(Arc::clone(&received), 2, 5, true);

    let elapsed = timed_emit(&runtime, 10);
    // the growing queue hands credits back two at a time, so the burst
    // clears in roughly half the static-queue time
    assert!(
        elapsed < Duration::from_millis(300),
        "dynamic queue did not absorb the burst: {elapsed:?}"
    );

    assert!(wait_until(Duration::from_secs(10), || received.lock().len() == 10));
    assert_eq!(*received.lock(), (0..10).collect::<Vec<i64>>());

    // the queue itself stays bounded by its sample size
    let queue_len = runtime
        .with_filter("sink", |_filter, env| {
            env.input("in").expect("sink input port").queue_length()
        })
        .unwrap();
    assert!(queue_len <= 5, "queue length {queue_len} exceeds its bound");

    let mut runtime = runtime;
    runtime.shutdown().unwrap();
}

#[test]
fn test_unbounded_width_never_blocks_producer() {
    let received = Arc::new(Mutex::new(Vec::new()));
    let runtime = build(Arc::clone(&received), 0, 16, false);

    let elapsed = timed_emit(&runtime, 10);
    assert!(
        elapsed < Duration::from_millis(100),
        "width 0 must not throttle the producer: {elapsed:?}"
    );
    assert!(wait_until(Duration::from_secs(10), || received.lock().len() == 10));
    assert_eq!(*received.lock(), (0..10).collect::<Vec<i64>>());

    let mut runtime = runtime;
    runtime.shutdown().unwrap();
}

#[test]
fn test_stopped_connection_drops_and_restart_restores() {
    let received = Arc::new(Mutex::new(Vec::new()));
    let mut runtime = build(Arc::clone(&received), 2, 4, false);

    timed_emit(&runtime, 3);
    assert!(wait_until(Duration::from_secs(10), || received.lock().len() == 3));

    runtime.stop().unwrap();
    // sends on a stopped connection are dropped with a warning; the caller
    // proceeds normally
    timed_emit(&runtime, 3);
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(received.lock().len(), 3);

    // restart restores normal operation and resets the credits
    runtime.start().unwrap();
    assert_eq!(runtime.connections()[0].available_credits(), Some(2));
    timed_emit(&runtime, 2);
    assert!(wait_until(Duration::from_secs(10), || received.lock().len() == 5));
    assert_eq!(&received.lock()[3..], &[0, 1]);

    runtime.shutdown().unwrap();
}
