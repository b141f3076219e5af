// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Commonly used types for filter authors.
//!
//! ```ignore
//! use flowlib::core::prelude::*;
//! ```

pub use crate::core::environment::FilterEnvironment;
pub use crate::core::error::{FlowError, Result};
pub use crate::core::filter::{Filter, FilterState};
pub use crate::core::ports::{InputPort, OutputPort};
pub use crate::core::properties::PropertyValue;
pub use crate::core::runtime::FlowRuntime;
pub use crate::core::sample::{DataSample, current_time};
