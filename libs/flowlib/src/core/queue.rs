// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Bounded history buffer behind every input port.
//!
//! Newest sample first (index 0). The queue is trimmed after every insert by
//! two independent dimensions: a maximum sample count and a maximum timestamp
//! span in seconds. Either dimension is disabled by a non-positive value, but
//! never both at once.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::core::error::{FlowError, Result};
use crate::core::sample::{DataSample, TIMESTAMP_RES};

pub struct InputQueue {
    entries: VecDeque<Arc<DataSample>>,
    size_samples: i64,
    size_seconds: f64,
}

impl InputQueue {
    pub fn new(size_samples: i64, size_seconds: f64) -> Self {
        let (size_samples, size_seconds) = coerce_sizes(size_samples, size_seconds);
        Self {
            entries: VecDeque::new(),
            size_samples,
            size_seconds,
        }
    }

    /// Reconfigure the sizing dimensions. Trims immediately so the queue
    /// never exceeds its configured bounds between inserts.
    pub fn set_sizes(&mut self, size_samples: i64, size_seconds: f64) {
        let (size_samples, size_seconds) = coerce_sizes(size_samples, size_seconds);
        self.size_samples = size_samples;
        self.size_seconds = size_seconds;
        self.evict();
    }

    pub fn sizes(&self) -> (i64, f64) {
        (self.size_samples, self.size_seconds)
    }

    pub fn push(&mut self, sample: Arc<DataSample>) {
        self.entries.push_front(sample);
        self.evict();
    }

    fn evict(&mut self) {
        if self.size_samples > 0 {
            while self.entries.len() as i64 > self.size_samples {
                self.entries.pop_back();
            }
        }
        if self.size_seconds > 0.0 {
            while self.span_seconds() > self.size_seconds {
                self.entries.pop_back();
            }
        }
    }

    /// Timestamp span between the newest and the oldest retained sample.
    pub fn span_seconds(&self) -> f64 {
        match (self.entries.front(), self.entries.back()) {
            (Some(newest), Some(oldest)) => {
                (newest.timestamp() - oldest.timestamp()) as f64 * TIMESTAMP_RES
            }
            _ => 0.0,
        }
    }

    /// Sample at `delay` positions behind the newest one.
    pub fn get_by_delay_samples(&self, delay: usize) -> Result<Arc<DataSample>> {
        self.entries.get(delay).cloned().ok_or_else(|| {
            FlowError::OutOfRange(format!(
                "delay of {} samples requested but only {} retained",
                delay,
                self.entries.len()
            ))
        })
    }

    /// First sample that is at least `delay` seconds older than the newest.
    pub fn get_by_delay_seconds(&self, delay: f64) -> Result<Arc<DataSample>> {
        let newest = match self.entries.front() {
            Some(s) => s.timestamp(),
            None => return Err(FlowError::OutOfRange("queue is empty".into())),
        };
        for sample in &self.entries {
            if (newest - sample.timestamp()) as f64 * TIMESTAMP_RES >= delay {
                return Ok(Arc::clone(sample));
            }
        }
        Err(FlowError::OutOfRange(format!(
            "no retained sample is {delay} seconds old"
        )))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn coerce_sizes(size_samples: i64, size_seconds: f64) -> (i64, f64) {
    if size_samples <= 0 && size_seconds <= 0.0 {
        tracing::warn!(
            "input queue configured with no positive sizing dimension, coercing to 1 sample"
        );
        (1, size_seconds)
    } else {
        (size_samples, size_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(timestamp: i64) -> Arc<DataSample> {
        Arc::new(DataSample::new(vec![], "test/empty", timestamp))
    }

    #[test]
    fn test_newest_first() {
        let mut q = InputQueue::new(3, -1.0);
        q.push(sample(1));
        q.push(sample(2));
        assert_eq!(q.get_by_delay_samples(0).unwrap().timestamp(), 2);
        assert_eq!(q.get_by_delay_samples(1).unwrap().timestamp(), 1);
    }

    #[test]
    fn test_sample_count_eviction() {
        let mut q = InputQueue::new(2, -1.0);
        for t in 0..5 {
            q.push(sample(t));
            assert!(q.len() <= 2);
        }
        assert_eq!(q.get_by_delay_samples(0).unwrap().timestamp(), 4);
        assert_eq!(q.get_by_delay_samples(1).unwrap().timestamp(), 3);
        assert!(q.get_by_delay_samples(2).is_err());
    }

    #[test]
    fn test_time_span_eviction() {
        // 0.5 second span, timestamps in microseconds
        let mut q = InputQueue::new(-1, 0.5);
        q.push(sample(0));
        q.push(sample(200_000));
        q.push(sample(400_000));
        assert_eq!(q.len(), 3);
        q.push(sample(600_000));
        // the t=0 sample is now 0.6s older than the newest
        assert_eq!(q.len(), 3);
        assert_eq!(q.get_by_delay_samples(2).unwrap().timestamp(), 200_000);
    }

    #[test]
    fn test_both_dimensions() {
        let mut q = InputQueue::new(10, 0.3);
        for t in 0..6 {
            q.push(sample(t * 100_000));
        }
        // span limited to 0.3s: keeps 500000, 400000, 300000, 200000
        assert_eq!(q.len(), 4);
        assert!(q.span_seconds() <= 0.3 + f64::EPSILON);
    }

    #[test]
    fn test_coercion_to_one_sample() {
        let mut q = InputQueue::new(0, 0.0);
        q.push(sample(1));
        q.push(sample(2));
        assert_eq!(q.len(), 1);
        assert_eq!(q.get_by_delay_samples(0).unwrap().timestamp(), 2);
    }

    #[test]
    fn test_get_by_delay_seconds() {
        let mut q = InputQueue::new(10, -1.0);
        for t in 0..5 {
            q.push(sample(t * 100_000));
        }
        // newest is 400000; first sample at least 0.25s older is 100000
        assert_eq!(
            q.get_by_delay_seconds(0.25).unwrap().timestamp(),
            100_000
        );
        // exact boundary matches
        assert_eq!(q.get_by_delay_seconds(0.4).unwrap().timestamp(), 0);
        assert!(q.get_by_delay_seconds(0.5).is_err());
    }

    #[test]
    fn test_get_from_empty() {
        let q = InputQueue::new(1, -1.0);
        assert!(q.get_by_delay_samples(0).is_err());
        assert!(q.get_by_delay_seconds(0.0).is_err());
    }

    #[test]
    fn test_reconfigure_trims() {
        let mut q = InputQueue::new(5, -1.0);
        for t in 0..5 {
            q.push(sample(t));
        }
        q.set_sizes(2, -1.0);
        assert_eq!(q.len(), 2);
    }
}
