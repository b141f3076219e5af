// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Per-filter property collection.
//!
//! Filters declare their properties (with defaults) during construction; the
//! configuration layer assigns values before the filter is initialized.
//! Assignments notify subscribed listeners synchronously on the calling
//! thread, which for filter-owned collections is the filter's owning thread.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::error::{FlowError, Result};

/// A typed property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl PropertyValue {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
        }
    }

    /// Convert a JSON literal from the graph document.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Bool(b) => Ok(Self::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Self::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Self::Float(f))
                } else {
                    Err(FlowError::Configuration(format!(
                        "number {n} is not representable as a property value"
                    )))
                }
            }
            serde_json::Value::String(s) => Ok(Self::Str(s.clone())),
            other => Err(FlowError::Configuration(format!(
                "unsupported property literal: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v}"),
        }
    }
}

struct PropertyEntry {
    value: PropertyValue,
    default: PropertyValue,
    description: Option<String>,
}

type PropertyListener = Arc<dyn Fn(&str, &PropertyValue) + Send + Sync>;

/// Ordered collection of named, typed properties with change notifications.
#[derive(Default)]
pub struct PropertyCollection {
    entries: Mutex<Vec<(String, PropertyEntry)>>,
    listeners: Mutex<Vec<PropertyListener>>,
}

impl PropertyCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a property with its default value. Re-declaring an existing
    /// property with the same value kind is a no-op (the current value is
    /// kept); a kind change is a configuration error.
    pub fn define_property(
        &self,
        name: &str,
        default: PropertyValue,
        description: Option<&str>,
    ) -> Result<()> {
        let mut entries = self.entries.lock();
        if let Some((_, entry)) = entries.iter().find(|(n, _)| n == name) {
            if entry.default.kind() != default.kind() {
                return Err(FlowError::Configuration(format!(
                    "property '{}' redefined with kind {} (was {})",
                    name,
                    default.kind(),
                    entry.default.kind()
                )));
            }
            return Ok(());
        }
        entries.push((
            name.to_string(),
            PropertyEntry {
                value: default.clone(),
                default,
                description: description.map(str::to_string),
            },
        ));
        Ok(())
    }

    pub fn get_property(&self, name: &str) -> Result<PropertyValue> {
        let entries = self.entries.lock();
        entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, e)| e.value.clone())
            .ok_or_else(|| FlowError::Configuration(format!("unknown property '{name}'")))
    }

    /// Assign a property. The value kind must match the declared default.
    /// Listeners are notified when the value actually changes.
    pub fn set_property(&self, name: &str, value: PropertyValue) -> Result<()> {
        let changed = {
            let mut entries = self.entries.lock();
            let Some((_, entry)) = entries.iter_mut().find(|(n, _)| n == name) else {
                return Err(FlowError::Configuration(format!(
                    "cannot set undeclared property '{name}'"
                )));
            };
            if entry.default.kind() != value.kind() {
                return Err(FlowError::Configuration(format!(
                    "property '{}' expects {} but got {}",
                    name,
                    entry.default.kind(),
                    value.kind()
                )));
            }
            if entry.value == value {
                false
            } else {
                entry.value = value.clone();
                true
            }
        };
        if changed {
            let listeners: Vec<PropertyListener> = self.listeners.lock().clone();
            for listener in listeners {
                listener(name, &value);
            }
        }
        Ok(())
    }

    /// Subscribe to property changes. Listeners run synchronously on the
    /// thread performing the assignment.
    pub fn subscribe(&self, listener: impl Fn(&str, &PropertyValue) + Send + Sync + 'static) {
        self.listeners.lock().push(Arc::new(listener));
    }

    pub fn description(&self, name: &str) -> Option<String> {
        let entries = self.entries.lock();
        entries
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, e)| e.description.clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.lock().iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
