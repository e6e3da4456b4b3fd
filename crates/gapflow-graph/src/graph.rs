//! Canonical endpoint/call graph
//!
//! Node and edge identifiers are content hashes, so building twice from the
//! same scan yields byte-identical output. The graph carries no timestamp for
//! the same reason.

use crate::normalize::{methods_match, normalize_path, paths_match};
use crate::scan::ScanResult;
use gapflow_artifact::{stable_id, Versioned};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Current `graph.json` schema version
pub const GRAPH_SCHEMA_VERSION: u32 = 1;

/// Confidence assigned to a method + path match
pub const MATCH_CONFIDENCE: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Endpoint,
    Call,
}

impl NodeKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Endpoint => "endpoint",
            Self::Call => "call",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub method: String,
    pub path: String,
    pub normalized_path: String,
    pub file: String,
    pub line: u32,
    pub orphan: bool,
}

impl GraphNode {
    fn new(kind: NodeKind, method: &str, path: &str, file: &str, line: u32) -> Self {
        let normalized_path = normalize_path(path);
        let line_str = line.to_string();
        let id = stable_id(&[kind.as_str(), method, &normalized_path, &line_str]);
        Self {
            id,
            kind,
            method: method.to_string(),
            path: path.to_string(),
            normalized_path,
            file: file.to_string(),
            line,
            orphan: true,
        }
    }

    /// `METHOD path`, used in reports and diagrams
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} {}", self.method.to_uppercase(), self.path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeKind {
    ApiCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    pub id: String,
    /// Call node
    pub from: String,
    /// Endpoint node
    pub to: String,
    #[serde(rename = "type")]
    pub kind: EdgeKind,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphStats {
    pub endpoints: usize,
    pub calls: usize,
    pub orphan_endpoints: usize,
    pub orphan_calls: usize,
    pub edges: usize,
}

/// Content of `graph.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Graph {
    pub schema_version: u32,
    /// Endpoints in scan order, then calls in scan order
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub stats: GraphStats,
}

impl Versioned for Graph {
    const SCHEMA: &'static str = "graph";
    const VERSION: u32 = GRAPH_SCHEMA_VERSION;
}

impl Graph {
    pub fn endpoints(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.iter().filter(|n| n.kind == NodeKind::Endpoint)
    }

    pub fn calls(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.iter().filter(|n| n.kind == NodeKind::Call)
    }

    #[must_use]
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Ids of every orphan node; these are the coverage gaps
    #[must_use]
    pub fn gap_ids(&self) -> HashSet<&str> {
        self.nodes.iter().filter(|n| n.orphan).map(|n| n.id.as_str()).collect()
    }

    #[must_use]
    pub fn endpoint_ids(&self) -> HashSet<&str> {
        self.endpoints().map(|n| n.id.as_str()).collect()
    }
}

/// Derive the canonical graph from a raw scan.
///
/// Every call is compared against every endpoint; each match yields one
/// `api-call` edge and clears the orphan flag on both nodes.
///
/// Every discovered site becomes a node. The id does not cover the file, so
/// two sites on the same line of different files share an id; such nodes
/// agree on kind, method, path and line, hence on every match and on their
/// orphan flag.
#[must_use]
pub fn build_graph(scan: &ScanResult) -> Graph {
    let mut endpoints: Vec<GraphNode> = scan
        .endpoints
        .iter()
        .map(|ep| GraphNode::new(NodeKind::Endpoint, &ep.method, &ep.path, &ep.file, ep.line))
        .collect();
    let mut calls: Vec<GraphNode> = scan
        .api_calls
        .iter()
        .map(|call| GraphNode::new(NodeKind::Call, &call.method, &call.endpoint, &call.file, call.line))
        .collect();

    let mut edges = Vec::new();
    for call in &mut calls {
        for endpoint in &mut endpoints {
            if methods_match(&call.method, &endpoint.method)
                && paths_match(&call.normalized_path, &endpoint.normalized_path)
            {
                edges.push(GraphEdge {
                    id: stable_id(&[&call.id, &endpoint.id]),
                    from: call.id.clone(),
                    to: endpoint.id.clone(),
                    kind: EdgeKind::ApiCall,
                    confidence: MATCH_CONFIDENCE,
                });
                call.orphan = false;
                endpoint.orphan = false;
            }
        }
    }

    let stats = GraphStats {
        endpoints: endpoints.len(),
        calls: calls.len(),
        orphan_endpoints: endpoints.iter().filter(|n| n.orphan).count(),
        orphan_calls: calls.iter().filter(|n| n.orphan).count(),
        edges: edges.len(),
    };
    tracing::debug!(
        endpoints = stats.endpoints,
        calls = stats.calls,
        edges = stats.edges,
        "graph built"
    );

    let mut nodes = endpoints;
    nodes.extend(calls);
    Graph {
        schema_version: GRAPH_SCHEMA_VERSION,
        nodes,
        edges,
        stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::{ScanCall, ScanEndpoint};
    use pretty_assertions::assert_eq;

    fn endpoint(method: &str, path: &str, file: &str, line: u32) -> ScanEndpoint {
        ScanEndpoint {
            method: method.into(),
            path: path.into(),
            file: file.into(),
            line,
        }
    }

    fn call(method: &str, url: &str, file: &str, line: u32) -> ScanCall {
        ScanCall {
            method: method.into(),
            endpoint: url.into(),
            file: file.into(),
            line,
        }
    }

    #[test]
    fn single_match_produces_one_edge() {
        let scan = ScanResult::new(
            vec![endpoint("GET", "/users", "users.ts", 12)],
            vec![call("GET", "/users", "Users.tsx", 50)],
        );
        let graph = build_graph(&scan);
        assert_eq!(graph.edges.len(), 1);
        assert!((graph.edges[0].confidence - 0.95).abs() < f64::EPSILON);
        assert!(graph.nodes.iter().all(|n| !n.orphan));
        assert_eq!(
            graph.stats,
            GraphStats {
                endpoints: 1,
                calls: 1,
                orphan_endpoints: 0,
                orphan_calls: 0,
                edges: 1
            }
        );
    }

    #[test]
    fn ids_follow_hash_recipe() {
        let scan = ScanResult::new(
            vec![endpoint("GET", "/Users/", "users.ts", 12)],
            vec![call("get", "/users", "Users.tsx", 50)],
        );
        let graph = build_graph(&scan);
        let ep = &graph.nodes[0];
        assert_eq!(ep.id, stable_id(&["endpoint", "GET", "users", "12"]));
        let c = &graph.nodes[1];
        assert_eq!(c.id, stable_id(&["call", "get", "users", "50"]));
        assert_eq!(graph.edges[0].id, stable_id(&[&c.id, &ep.id]));
        assert_eq!(graph.edges[0].from, c.id);
        assert_eq!(graph.edges[0].to, ep.id);
    }

    #[test]
    fn method_mismatch_leaves_orphans() {
        let scan = ScanResult::new(
            vec![endpoint("POST", "/users", "users.ts", 1)],
            vec![call("GET", "/users", "a.ts", 2)],
        );
        let graph = build_graph(&scan);
        assert!(graph.edges.is_empty());
        assert_eq!(graph.stats.orphan_endpoints, 1);
        assert_eq!(graph.stats.orphan_calls, 1);
        assert_eq!(graph.gap_ids().len(), 2);
    }

    #[test]
    fn parameterized_routes_match() {
        let scan = ScanResult::new(
            vec![endpoint("GET", "/users/:id", "users.ts", 1)],
            vec![
                call("GET", "/users/{id}", "a.ts", 2),
                call("GET", "/users/42?expand=1", "b.ts", 3),
                call("GET", "/users/42/posts", "c.ts", 4),
            ],
        );
        let graph = build_graph(&scan);
        assert_eq!(graph.edges.len(), 2);
        assert_eq!(graph.stats.orphan_calls, 1);
    }

    #[test]
    fn same_line_in_different_files_keeps_both_sites() {
        let scan = ScanResult::new(
            vec![
                endpoint("GET", "/a", "x.ts", 1),
                endpoint("GET", "/A/", "y.ts", 1),
            ],
            vec![call("GET", "/a", "app.ts", 9)],
        );
        let graph = build_graph(&scan);
        assert_eq!(graph.stats.endpoints, 2);
        assert_eq!(graph.stats.orphan_endpoints, 0);
        assert_eq!(graph.stats.edges, 2);
        let files: Vec<_> = graph.endpoints().map(|n| n.file.as_str()).collect();
        assert_eq!(files, vec!["x.ts", "y.ts"]);
        assert_eq!(graph.nodes[0].id, graph.nodes[1].id);

        let report = crate::report::build_report(&graph);
        assert_eq!(report.summary.total_endpoints, 2);
        assert!((report.summary.coverage_ratio - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_scan() {
        let graph = build_graph(&ScanResult::default());
        assert!(graph.nodes.is_empty());
        assert_eq!(graph.stats, GraphStats::default());
    }

    #[test]
    fn serialized_form_is_stable() {
        let scan = ScanResult::new(
            vec![endpoint("GET", "/users", "users.ts", 12)],
            vec![call("GET", "/users", "Users.tsx", 50)],
        );
        let a = serde_json::to_string(&build_graph(&scan)).unwrap();
        let b = serde_json::to_string(&build_graph(&scan)).unwrap();
        assert_eq!(a, b);
        assert!(a.contains("\"type\":\"api-call\""));
        assert!(a.contains("\"normalizedPath\":\"users\""));
    }
}
