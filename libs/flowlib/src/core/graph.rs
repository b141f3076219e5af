// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Persisted graph document and application topology.
//!
//! The external loader hands the core a JSON document listing
//! composite-filter definitions and applications. This module owns the serde
//! data model, the `from.port -> to.port` connection grammar (width encoded
//! in the arrow, `a.out -3> b.in`), and a petgraph-backed topology used to
//! validate an application before it is instantiated. Variable substitution
//! and composite expansion happen in the loader, not here.

use std::collections::{BTreeMap, HashMap, HashSet};

use petgraph::graph::{DiGraph, NodeIndex};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::core::error::{FlowError, Result};

/// Identifier grammar shared by filter, port, thread and application names.
pub const IDENTIFIER_PATTERN: &str = "^[A-Za-z_][A-Za-z0-9_-]*$";

pub fn is_valid_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// A property assignment in the document: either a plain JSON literal or a
/// `{value, subst}` pair whose string is substituted by the loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum PropertyConfig {
    Substituted {
        value: serde_json::Value,
        subst: bool,
    },
    Literal(serde_json::Value),
}

impl PropertyConfig {
    pub fn value(&self) -> &serde_json::Value {
        match self {
            Self::Substituted { value, .. } => value,
            Self::Literal(value) => value,
        }
    }

    pub fn needs_substitution(&self) -> bool {
        matches!(self, Self::Substituted { subst: true, .. })
    }
}

fn default_thread() -> String {
    "main".to_string()
}

/// One graph node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    pub name: String,
    /// Plugin module hosting the factory; recorded for the loader, opaque to
    /// the core.
    #[serde(default)]
    pub library: String,
    pub factory_function: String,
    #[serde(default = "default_thread")]
    pub thread: String,
    #[serde(default)]
    pub static_input_ports: Vec<String>,
    #[serde(default)]
    pub dynamic_input_ports: Vec<String>,
    #[serde(default)]
    pub static_output_ports: Vec<String>,
    #[serde(default)]
    pub dynamic_output_ports: Vec<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyConfig>,
}

/// A named sub-graph usable as a filter; expanded by the loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CompositeFilterConfig {
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
    #[serde(default)]
    pub connections: Vec<String>,
}

/// A runnable pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationConfig {
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
    #[serde(default)]
    pub connections: Vec<String>,
}

/// The whole persisted document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GraphConfig {
    #[serde(default)]
    pub composite_filters: Vec<CompositeFilterConfig>,
    #[serde(default)]
    pub applications: Vec<ApplicationConfig>,
}

impl GraphConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| FlowError::Configuration(format!("invalid graph document: {e}")))
    }

    pub fn application(&self, name: &str) -> Option<&ApplicationConfig> {
        self.applications.iter().find(|a| a.name == name)
    }
}

/// JSON Schema of the persisted document.
pub fn graph_config_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(GraphConfig)
}

/// One parsed connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub from_filter: String,
    pub from_port: String,
    pub to_filter: String,
    pub to_port: String,
    /// Credit count for inter-thread edges; 0 disables flow control.
    pub width: usize,
}

impl std::fmt::Display for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.width == 1 {
            write!(
                f,
                "{}.{} -> {}.{}",
                self.from_filter, self.from_port, self.to_filter, self.to_port
            )
        } else {
            write!(
                f,
                "{}.{} -{}> {}.{}",
                self.from_filter, self.from_port, self.width, self.to_filter, self.to_port
            )
        }
    }
}

/// Parse `from.port -> to.port`, with an optional width in the arrow
/// (`a.out -3> b.in`). Plain `->` means width 1.
pub fn parse_connection(text: &str) -> Result<ConnectionConfig> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let [from, arrow, to] = tokens.as_slice() else {
        return Err(FlowError::Configuration(format!(
            "connection '{text}' is not of the form 'from.port -> to.port'"
        )));
    };
    let width = parse_arrow(text, arrow)?;
    let (from_filter, from_port) = split_endpoint(text, from)?;
    let (to_filter, to_port) = split_endpoint(text, to)?;
    Ok(ConnectionConfig {
        from_filter,
        from_port,
        to_filter,
        to_port,
        width,
    })
}

fn parse_arrow(text: &str, arrow: &str) -> Result<usize> {
    let inner = arrow
        .strip_prefix('-')
        .and_then(|s| s.strip_suffix('>'))
        .ok_or_else(|| {
            FlowError::Configuration(format!("connection '{text}' has a malformed arrow '{arrow}'"))
        })?;
    if inner.is_empty() {
        return Ok(1);
    }
    inner.parse::<usize>().map_err(|_| {
        FlowError::Configuration(format!(
            "connection '{text}' has a non-numeric width '{inner}'"
        ))
    })
}

fn split_endpoint(text: &str, endpoint: &str) -> Result<(String, String)> {
    let parts: Vec<&str> = endpoint.split('.').collect();
    let [filter, port] = parts.as_slice() else {
        return Err(FlowError::Configuration(format!(
            "endpoint '{endpoint}' in connection '{text}' must be 'filter.port'"
        )));
    };
    for name in [filter, port] {
        if !is_valid_identifier(name) {
            return Err(FlowError::Configuration(format!(
                "'{name}' in connection '{text}' is not a valid identifier"
            )));
        }
    }
    Ok((filter.to_string(), port.to_string()))
}

/// Validated topology of one application.
pub struct Topology {
    graph: DiGraph<NodeConfig, ConnectionConfig>,
    indices: HashMap<String, NodeIndex>,
}

impl Topology {
    pub fn from_application(app: &ApplicationConfig) -> Result<Self> {
        if !is_valid_identifier(&app.name) {
            return Err(FlowError::Configuration(format!(
                "'{}' is not a valid application name",
                app.name
            )));
        }
        let mut graph = DiGraph::new();
        let mut indices = HashMap::new();
        for node in &app.nodes {
            if !is_valid_identifier(&node.name) {
                return Err(FlowError::Configuration(format!(
                    "'{}' is not a valid filter name",
                    node.name
                )));
            }
            if indices.contains_key(&node.name) {
                return Err(FlowError::Configuration(format!(
                    "application '{}' declares filter '{}' twice",
                    app.name, node.name
                )));
            }
            let index = graph.add_node(node.clone());
            indices.insert(node.name.clone(), index);
        }
        let mut seen = HashSet::new();
        for text in &app.connections {
            let connection = parse_connection(text)?;
            let from = *indices.get(&connection.from_filter).ok_or_else(|| {
                FlowError::Configuration(format!(
                    "connection '{text}' references unknown filter '{}'",
                    connection.from_filter
                ))
            })?;
            let to = *indices.get(&connection.to_filter).ok_or_else(|| {
                FlowError::Configuration(format!(
                    "connection '{text}' references unknown filter '{}'",
                    connection.to_filter
                ))
            })?;
            let key = (
                connection.from_filter.clone(),
                connection.from_port.clone(),
                connection.to_filter.clone(),
                connection.to_port.clone(),
            );
            if !seen.insert(key) {
                return Err(FlowError::Configuration(format!(
                    "duplicate connection '{text}'"
                )));
            }
            graph.add_edge(from, to, connection);
        }
        let topology = Self { graph, indices };
        if topology.is_cyclic() {
            // legal: bounded credits plus the cooperative executor pump keep
            // cyclic graphs live
            tracing::debug!("application '{}' contains cycles", app.name);
        }
        Ok(topology)
    }

    /// Nodes in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeConfig> {
        self.graph.node_indices().map(|i| &self.graph[i])
    }

    /// Connections in declaration order.
    pub fn connections(&self) -> impl Iterator<Item = &ConnectionConfig> {
        self.graph.edge_indices().map(|e| &self.graph[e])
    }

    pub fn node(&self, name: &str) -> Option<&NodeConfig> {
        self.indices.get(name).map(|i| &self.graph[*i])
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn connection_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_cyclic(&self) -> bool {
        petgraph::algo::is_cyclic_directed(&self.graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifiers() {
        assert!(is_valid_identifier("camera_1"));
        assert!(is_valid_identifier("_tmp"));
        assert!(is_valid_identifier("edge-detect"));
        assert!(!is_valid_identifier("1camera"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("a.b"));
        assert!(!is_valid_identifier("-dash"));
    }

    #[test]
    fn test_parse_plain_connection() {
        let c = parse_connection("camera.out -> viewer.in").unwrap();
        assert_eq!(c.from_filter, "camera");
        assert_eq!(c.from_port, "out");
        assert_eq!(c.to_filter, "viewer");
        assert_eq!(c.to_port, "in");
        assert_eq!(c.width, 1);
    }

    #[test]
    fn test_parse_width_in_arrow() {
        let c = parse_connection("camera.out -3> viewer.in").unwrap();
        assert_eq!(c.width, 3);
        let c = parse_connection("camera.out -0> viewer.in").unwrap();
        assert_eq!(c.width, 0);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_connection("camera.out viewer.in").is_err());
        assert!(parse_connection("camera.out => viewer.in").is_err());
        assert!(parse_connection("camera.out -x> viewer.in").is_err());
        assert!(parse_connection("camera -> viewer.in").is_err());
        assert!(parse_connection("1camera.out -> viewer.in").is_err());
    }

    #[test]
    fn test_display_roundtrip() {
        for text in ["a.out -> b.in", "a.out -4> b.in"] {
            let c = parse_connection(text).unwrap();
            assert_eq!(c.to_string(), text);
        }
    }

    fn node(name: &str, thread: &str) -> NodeConfig {
        NodeConfig {
            name: name.to_string(),
            library: String::new(),
            factory_function: "Test".to_string(),
            thread: thread.to_string(),
            static_input_ports: vec![],
            dynamic_input_ports: vec![],
            static_output_ports: vec![],
            dynamic_output_ports: vec![],
            properties: BTreeMap::new(),
        }
    }

    #[test]
    fn test_topology_validation() {
        let app = ApplicationConfig {
            name: "app".to_string(),
            nodes: vec![node("a", "main"), node("b", "worker")],
            connections: vec!["a.out -> b.in".to_string()],
        };
        let topology = Topology::from_application(&app).unwrap();
        assert_eq!(topology.node_count(), 2);
        assert_eq!(topology.connection_count(), 1);
        assert!(!topology.is_cyclic());
        assert_eq!(topology.node("b").unwrap().thread, "worker");
    }

    #[test]
    fn test_topology_rejects_unknown_and_duplicates() {
        let mut app = ApplicationConfig {
            name: "app".to_string(),
            nodes: vec![node("a", "main")],
            connections: vec!["a.out -> missing.in".to_string()],
        };
        assert!(Topology::from_application(&app).is_err());

        app.connections = vec!["a.out -> a.in".to_string(), "a.out -> a.in".to_string()];
        assert!(Topology::from_application(&app).is_err());

        app.connections.clear();
        app.nodes.push(node("a", "main"));
        assert!(Topology::from_application(&app).is_err());
    }

    #[test]
    fn test_cycles_are_allowed() {
        let app = ApplicationConfig {
            name: "loopy".to_string(),
            nodes: vec![node("a", "t1"), node("b", "t2")],
            connections: vec!["a.out -> b.in".to_string(), "b.out -> a.in".to_string()],
        };
        let topology = Topology::from_application(&app).unwrap();
        assert!(topology.is_cyclic());
    }

    #[test]
    fn test_document_parsing() {
        let doc = r#"{
            "applications": [{
                "name": "demo",
                "nodes": [{
                    "name": "source",
                    "library": "builtin",
                    "factoryFunction": "TestSource",
                    "properties": {
                        "rate": 25,
                        "label": {"value": "$NAME", "subst": true}
                    }
                }],
                "connections": []
            }]
        }"#;
        let config = GraphConfig::from_json_str(doc).unwrap();
        let app = config.application("demo").unwrap();
        let source = &app.nodes[0];
        assert_eq!(source.thread, "main");
        assert_eq!(source.factory_function, "TestSource");
        assert_eq!(
            source.properties["rate"],
            PropertyConfig::Literal(serde_json::json!(25))
        );
        assert!(source.properties["label"].needs_substitution());
        assert_eq!(source.properties["label"].value(), &serde_json::json!("$NAME"));
    }

    #[test]
    fn test_schema_generation() {
        let schema = graph_config_schema();
        let rendered = serde_json::to_string(&schema).unwrap();
        assert!(rendered.contains("applications"));
        assert!(rendered.contains("factoryFunction"));
    }
}
