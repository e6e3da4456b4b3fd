//! Coverage report derived from a [`Graph`]

use crate::graph::{Graph, GraphNode, NodeKind};
use gapflow_artifact::Versioned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Current `report.json` schema version
pub const REPORT_SCHEMA_VERSION: u32 = 1;

/// Overall severity of the coverage situation, most severe first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Critical => "CRITICAL",
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub total_endpoints: usize,
    pub matched_endpoints: usize,
    pub orphan_endpoints: usize,
    pub total_calls: usize,
    pub orphan_calls: usize,
    pub total_edges: usize,
    /// Matched endpoints over total endpoints; 0 when there are none
    pub coverage_ratio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapReason {
    /// Endpoint that no call reaches
    NoIncomingCalls,
    /// Call that reaches no known endpoint
    EndpointNotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gap {
    pub node_id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub method: String,
    pub path: String,
    pub file: String,
    pub line: u32,
    pub reason: GapReason,
}

impl Gap {
    fn from_node(node: &GraphNode) -> Self {
        let reason = match node.kind {
            NodeKind::Endpoint => GapReason::NoIncomingCalls,
            NodeKind::Call => GapReason::EndpointNotFound,
        };
        Self {
            node_id: node.id.clone(),
            kind: node.kind,
            method: node.method.clone(),
            path: node.path.clone(),
            file: node.file.clone(),
            line: node.line,
            reason,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecommendationCategory {
    MissingEndpoints,
    UnusedEndpoints,
    CoverageTarget,
}

/// A ranked, actionable suggestion. Rank 1 is the most urgent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub id: String,
    pub rank: u32,
    pub category: RecommendationCategory,
    pub description: String,
}

/// Content of `report/report.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub schema_version: u32,
    pub summary: ReportSummary,
    pub severity: Severity,
    pub gaps: Vec<Gap>,
    pub recommendations: Vec<Recommendation>,
}

impl Versioned for Report {
    const SCHEMA: &'static str = "report";
    const VERSION: u32 = REPORT_SCHEMA_VERSION;
}

impl Report {
    /// Ids of every gap in this report
    pub fn gap_ids(&self) -> impl Iterator<Item = &str> {
        self.gaps.iter().map(|g| g.node_id.as_str())
    }

    #[must_use]
    pub fn recommendation(&self, id: &str) -> Option<&Recommendation> {
        self.recommendations.iter().find(|r| r.id == id)
    }
}

/// Compute coverage, severity, gaps and ranked recommendations
#[must_use]
pub fn build_report(graph: &Graph) -> Report {
    let summary = summarize(graph);
    let severity = classify_severity(&summary);
    let gaps: Vec<Gap> = graph.nodes.iter().filter(|n| n.orphan).map(Gap::from_node).collect();
    let recommendations = recommend(&summary);
    tracing::debug!(coverage = summary.coverage_ratio, %severity, gaps = gaps.len(), "report built");
    Report {
        schema_version: REPORT_SCHEMA_VERSION,
        summary,
        severity,
        gaps,
        recommendations,
    }
}

fn summarize(graph: &Graph) -> ReportSummary {
    let total_endpoints = graph.endpoints().count();
    let orphan_endpoints = graph.endpoints().filter(|n| n.orphan).count();
    let matched_endpoints = total_endpoints - orphan_endpoints;
    #[allow(clippy::cast_precision_loss)]
    let coverage_ratio = if total_endpoints == 0 {
        0.0
    } else {
        matched_endpoints as f64 / total_endpoints as f64
    };
    ReportSummary {
        total_endpoints,
        matched_endpoints,
        orphan_endpoints,
        total_calls: graph.calls().count(),
        orphan_calls: graph.calls().filter(|n| n.orphan).count(),
        total_edges: graph.edges.len(),
        coverage_ratio,
    }
}

/// CRITICAL when more than half the endpoints or half the calls are orphans,
/// otherwise graded by coverage ratio.
#[must_use]
pub fn classify_severity(summary: &ReportSummary) -> Severity {
    // 2 * orphans > total avoids float rounding at exactly one half
    if 2 * summary.orphan_endpoints > summary.total_endpoints || 2 * summary.orphan_calls > summary.total_calls {
        Severity::Critical
    } else if summary.coverage_ratio < 0.5 {
        Severity::High
    } else if summary.coverage_ratio < 0.8 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

fn recommend(summary: &ReportSummary) -> Vec<Recommendation> {
    let mut out: Vec<(RecommendationCategory, String)> = Vec::new();
    if summary.orphan_calls > 0 {
        out.push((
            RecommendationCategory::MissingEndpoints,
            format!(
                "Implement or remove {} API call(s) whose endpoint was not found.",
                summary.orphan_calls
            ),
        ));
    }
    if summary.coverage_ratio < 0.5 {
        out.push((
            RecommendationCategory::CoverageTarget,
            "Coverage is below 50%. Prioritize exercising the unused endpoints.".to_string(),
        ));
    } else if summary.coverage_ratio < 0.8 {
        out.push((
            RecommendationCategory::CoverageTarget,
            "Aim for at least 80% endpoint coverage.".to_string(),
        ));
    }
    if summary.orphan_endpoints > 0 {
        out.push((
            RecommendationCategory::UnusedEndpoints,
            format!(
                "Add tests for or remove {} endpoint(s) with no incoming calls.",
                summary.orphan_endpoints
            ),
        ));
    }
    out.into_iter()
        .enumerate()
        .map(|(i, (category, description))| {
            let rank = u32::try_from(i + 1).unwrap_or(u32::MAX);
            Recommendation {
                id: format!("rec-{rank}"),
                rank,
                category,
                description,
            }
        })
        .collect()
}
