// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The immutable data carrier flowing through pipelines.
//!
//! A `DataSample` pairs an opaque byte payload with a short datatype tag and
//! a microsecond timestamp. Samples are shared as `Arc<DataSample>` between
//! queues, in-flight deliveries and filters; they are never mutated after
//! construction, so sharing needs no further synchronization.

use std::time::{SystemTime, UNIX_EPOCH};

/// Resolution of sample timestamps in seconds (timestamps count microseconds).
pub const TIMESTAMP_RES: f64 = 1e-6;

#[derive(Debug, Clone)]
pub struct DataSample {
    content: Vec<u8>,
    datatype: String,
    timestamp: i64,
}

impl DataSample {
    /// Create a sample from a payload, a datatype tag and a timestamp in
    /// microseconds (see [`current_time`]).
    pub fn new(content: impl Into<Vec<u8>>, datatype: impl Into<String>, timestamp: i64) -> Self {
        Self {
            content: content.into(),
            datatype: datatype.into(),
            timestamp,
        }
    }

    /// Deep copy: the result shares no storage with `src`.
    pub fn copy(src: &DataSample) -> DataSample {
        src.clone()
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn datatype(&self) -> &str {
        &self.datatype
    }

    /// Timestamp in multiples of [`TIMESTAMP_RES`] seconds.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

/// Current wall-clock time in microseconds since the epoch, suitable for
/// stamping new samples.
pub fn current_time() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_micros() as i64,
        // Clock before 1970; report a negative timestamp rather than panic.
        Err(e) => -(e.duration().as_micros() as i64),
    }
}
