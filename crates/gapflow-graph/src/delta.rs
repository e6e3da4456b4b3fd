//! Run-to-run delta and its consistency check
//!
//! The trend label and the raw counts come from different code paths, so
//! [`validate_delta`] re-derives the trend from the coverage change and
//! rejects any record where the two disagree.

use crate::graph::Graph;
use crate::report::Report;
use gapflow_artifact::Versioned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Current `delta.json` schema version
pub const DELTA_SCHEMA_VERSION: u32 = 1;

/// Coverage change beyond which a trend is not STABLE
pub const TREND_THRESHOLD: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Trend {
    Improving,
    Degrading,
    Stable,
}

impl Trend {
    /// Trend implied by a (rounded) coverage change
    #[must_use]
    pub fn from_change(change: f64) -> Self {
        if change > TREND_THRESHOLD {
            Self::Improving
        } else if change < -TREND_THRESHOLD {
            Self::Degrading
        } else {
            Self::Stable
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Improving => "IMPROVING",
            Self::Degrading => "DEGRADING",
            Self::Stable => "STABLE",
        })
    }
}

/// Counts are signed so a corrupted or hand-edited record can still be
/// represented and rejected by [`validate_delta`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaStats {
    pub new_endpoints: i64,
    pub removed_endpoints: i64,
    pub new_gaps: i64,
    pub resolved_gaps: i64,
    /// Rounded to two decimals
    pub coverage_change: f64,
}

/// Content of `delta/delta.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delta {
    pub schema_version: u32,
    pub run_id_from: String,
    pub run_id_to: String,
    pub trend: Trend,
    pub statistics: DeltaStats,
}

impl Versioned for Delta {
    const SCHEMA: &'static str = "delta";
    const VERSION: u32 = DELTA_SCHEMA_VERSION;
}

/// One run's inputs to [`compute_delta`]
#[derive(Debug, Clone, Copy)]
pub struct RunView<'a> {
    pub run_id: &'a str,
    pub graph: &'a Graph,
    pub report: &'a Report,
}

fn count_missing(a: &HashSet<&str>, b: &HashSet<&str>) -> i64 {
    i64::try_from(a.difference(b).count()).unwrap_or(i64::MAX)
}

/// Round to two decimal places
#[must_use]
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Compare two runs: endpoint and gap id sets plus coverage change
#[must_use]
pub fn compute_delta(from: RunView<'_>, to: RunView<'_>) -> Delta {
    let endpoints_from = from.graph.endpoint_ids();
    let endpoints_to = to.graph.endpoint_ids();
    let gaps_from: HashSet<&str> = from.report.gap_ids().collect();
    let gaps_to: HashSet<&str> = to.report.gap_ids().collect();

    let coverage_change = round2(to.report.summary.coverage_ratio - from.report.summary.coverage_ratio);
    let statistics = DeltaStats {
        new_endpoints: count_missing(&endpoints_to, &endpoints_from),
        removed_endpoints: count_missing(&endpoints_from, &endpoints_to),
        new_gaps: count_missing(&gaps_to, &gaps_from),
        resolved_gaps: count_missing(&gaps_from, &gaps_to),
        coverage_change,
    };
    let trend = Trend::from_change(coverage_change);
    tracing::debug!(from = from.run_id, to = to.run_id, %trend, coverage_change, "delta computed");
    Delta {
        schema_version: DELTA_SCHEMA_VERSION,
        run_id_from: from.run_id.to_string(),
        run_id_to: to.run_id.to_string(),
        trend,
        statistics,
    }
}

/// A single inconsistency found by [`validate_delta`]
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeltaIssue {
    #[error("missing run id: {0}")]
    MissingRunId(&'static str),

    #[error("{field} is negative ({value})")]
    NegativeCount { field: &'static str, value: i64 },

    #[error("trend {trend} does not match coverage change {change}")]
    TrendMismatch { trend: Trend, change: f64 },
}

/// Rejected delta with every issue found
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid delta: {}", .issues.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
pub struct DeltaError {
    pub issues: Vec<DeltaIssue>,
}

/// Check a delta for internal consistency
///
/// # Errors
/// Returns every issue found: missing run ids, negative counts, or a trend
/// that disagrees with the coverage change
pub fn validate_delta(delta: &Delta) -> Result<(), DeltaError> {
    let mut issues = Vec::new();
    if delta.run_id_from.trim().is_empty() {
        issues.push(DeltaIssue::MissingRunId("runIdFrom"));
    }
    if delta.run_id_to.trim().is_empty() {
        issues.push(DeltaIssue::MissingRunId("runIdTo"));
    }
    let stats = &delta.statistics;
    for (field, value) in [
        ("newEndpoints", stats.new_endpoints),
        ("removedEndpoints", stats.removed_endpoints),
        ("newGaps", stats.new_gaps),
        ("resolvedGaps", stats.resolved_gaps),
    ] {
        if value < 0 {
            issues.push(DeltaIssue::NegativeCount { field, value });
        }
    }
    if Trend::from_change(stats.coverage_change) != delta.trend {
        issues.push(DeltaIssue::TrendMismatch {
            trend: delta.trend,
            change: stats.coverage_change,
        });
    }
    if issues.is_empty() {
        Ok(())
    } else {
        Err(DeltaError { issues })
    }
}
