//! Diagram rendering
//!
//! Rendering is pluggable through [`DiagramRenderer`]; [`MermaidRenderer`] is
//! the built-in implementation. The pipeline writes each diagram under
//! `diagrams/` and an index to `diagrams/diagrams.json`.

use crate::graph::{Graph, GraphNode};
use crate::report::Report;
use gapflow_artifact::Versioned;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

pub const DIAGRAM_INDEX_SCHEMA_VERSION: u32 = 1;

/// One rendered diagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagram {
    /// Short name, e.g. `api-overview`
    pub name: String,
    pub title: String,
    pub description: String,
    pub content: String,
}

impl Diagram {
    /// File name under `diagrams/`
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}.mmd", self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagramEntry {
    pub name: String,
    pub file: String,
    pub title: String,
    pub description: String,
}

/// Content of `diagrams/diagrams.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagramIndex {
    pub schema_version: u32,
    pub diagrams: Vec<DiagramEntry>,
}

impl Versioned for DiagramIndex {
    const SCHEMA: &'static str = "diagrams";
    const VERSION: u32 = DIAGRAM_INDEX_SCHEMA_VERSION;
}

impl DiagramIndex {
    #[must_use]
    pub fn from_diagrams(diagrams: &[Diagram]) -> Self {
        Self {
            schema_version: DIAGRAM_INDEX_SCHEMA_VERSION,
            diagrams: diagrams
                .iter()
                .map(|d| DiagramEntry {
                    name: d.name.clone(),
                    file: d.file_name(),
                    title: d.title.clone(),
                    description: d.description.clone(),
                })
                .collect(),
        }
    }
}

/// Turns a graph and its report into diagram text
pub trait DiagramRenderer: Send + Sync {
    fn render(&self, graph: &Graph, report: &Report) -> Vec<Diagram>;
}

/// Mermaid flowcharts, truncated to `max_nodes` per section for readability
#[derive(Debug, Clone, Copy)]
pub struct MermaidRenderer {
    pub max_nodes: usize,
}

impl Default for MermaidRenderer {
    fn default() -> Self {
        Self { max_nodes: 25 }
    }
}

// Stable ids may start with a digit, which Mermaid rejects as a node id.
fn node_ref(id: &str) -> String {
    format!("n_{id}")
}

fn escape_label(node: &GraphNode) -> String {
    node.label().replace('"', "'")
}

impl MermaidRenderer {
    fn api_overview(&self, graph: &Graph) -> String {
        let mut out = String::from("graph LR\n");
        for node in graph.endpoints().take(self.max_nodes) {
            let class = if node.orphan { "epOrphan" } else { "ep" };
            let _ = writeln!(out, "  {}[\"{}\"]:::{class}", node_ref(&node.id), escape_label(node));
        }
        for node in graph.calls().take(self.max_nodes) {
            let class = if node.orphan { "callOrphan" } else { "call" };
            let _ = writeln!(out, "  {}[\"{}\"]:::{class}", node_ref(&node.id), escape_label(node));
        }
        for edge in graph.edges.iter().take(self.max_nodes) {
            let _ = writeln!(out, "  {} -->|matched| {}", node_ref(&edge.from), node_ref(&edge.to));
        }
        out.push('\n');
        out.push_str("  classDef ep fill:#51cf66,color:#000\n");
        out.push_str("  classDef epOrphan fill:#ff6b6b,color:#fff\n");
        out.push_str("  classDef call fill:#94d82d,color:#000\n");
        out.push_str("  classDef callOrphan fill:#ffd43b,color:#000\n");
        out
    }

    fn call_flow(&self, graph: &Graph) -> String {
        let mut out = String::from("graph TD\n");
        for call in graph.calls().filter(|c| !c.orphan).take(self.max_nodes) {
            let _ = writeln!(out, "  {}[\"Call: {}\"]", node_ref(&call.id), escape_label(call));
            for edge in graph.edges.iter().filter(|e| e.from == call.id) {
                if let Some(target) = graph.node(&edge.to) {
                    let _ = writeln!(out, "  {}[\"{}\"]", node_ref(&target.id), escape_label(target));
                    let _ = writeln!(out, "  {} -->|calls| {}", node_ref(&call.id), node_ref(&target.id));
                }
            }
        }
        out
    }

    fn orphan_analysis(&self, graph: &Graph, report: &Report) -> String {
        let mut out = String::from("graph LR\n");
        out.push_str("  subgraph orphan_endpoints [\"Orphaned Endpoints\"]\n");
        for node in graph.endpoints().filter(|n| n.orphan).take(self.max_nodes) {
            let _ = writeln!(out, "    {}[\"{}\"]", node_ref(&node.id), escape_label(node));
        }
        out.push_str("  end\n");
        out.push_str("  subgraph orphan_calls [\"Unmatched Calls\"]\n");
        for node in graph.calls().filter(|n| n.orphan).take(self.max_nodes) {
            let _ = writeln!(out, "    {}[\"{}\"]", node_ref(&node.id), escape_label(node));
        }
        out.push_str("  end\n");
        let _ = writeln!(
            out,
            "  info[\"Coverage: {:.1}% ({})\"]",
            report.summary.coverage_ratio * 100.0,
            report.severity
        );
        out
    }
}

impl DiagramRenderer for MermaidRenderer {
    fn render(&self, graph: &Graph, report: &Report) -> Vec<Diagram> {
        vec![
            Diagram {
                name: "api-overview".into(),
                title: "API Overview".into(),
                description: "Endpoints and calls with their matches".into(),
                content: self.api_overview(graph),
            },
            Diagram {
                name: "call-flow".into(),
                title: "Call Flow".into(),
                description: "Matched calls and the endpoints they reach".into(),
                content: self.call_flow(graph),
            },
            Diagram {
                name: "orphan-analysis".into(),
                title: "Orphan Analysis".into(),
                description: "Unused endpoints and unmatched calls".into(),
                content: self.orphan_analysis(graph, report),
            },
        ]
    }
}
