//! gapflow Graph
//!
//! Deterministic derivation from raw scan output to the canonical
//! endpoint/call graph, its coverage report, and run-to-run deltas.
//!
//! # Example
//!
//! ```rust,ignore
//! use gapflow_graph::{build_graph, build_report, compute_delta, validate_delta, RunView};
//!
//! let graph = build_graph(&scan);
//! let report = build_report(&graph);
//! let delta = compute_delta(
//!     RunView { run_id: "prev", graph: &prev_graph, report: &prev_report },
//!     RunView { run_id: "next", graph: &graph, report: &report },
//! );
//! validate_delta(&delta)?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod delta;
pub mod diagram;
pub mod graph;
mod normalize;
pub mod report;
pub mod scan;

pub use delta::{compute_delta, round2, validate_delta, Delta, DeltaError, DeltaIssue, DeltaStats, RunView, Trend};
pub use diagram::{Diagram, DiagramEntry, DiagramIndex, DiagramRenderer, MermaidRenderer};
pub use graph::{build_graph, EdgeKind, Graph, GraphEdge, GraphNode, GraphStats, NodeKind, MATCH_CONFIDENCE};
pub use normalize::{methods_match, normalize_path, paths_match, strip_query};
pub use report::{
    build_report, classify_severity, Gap, GapReason, Recommendation, RecommendationCategory, Report,
    ReportSummary, Severity,
};
pub use scan::{ScanCall, ScanEndpoint, ScanResult};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::{
        build_graph, build_report, compute_delta, validate_delta, Delta, Graph, Report, RunView, ScanResult,
        Severity, Trend,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
